//! TimeTrust Command Line Interface
//!
//! Synchronizes the local clock against authoritative time sources, obtains
//! signed timestamps for digests and verifies them.

mod authority;

use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{bail, Context, Result};
use chrono::SecondsFormat;
use clap::{Args, Parser, Subcommand};
use serde_json::json;
use timetrust_time::{
    digest_payload, global_context, ClockSync, HttpAuthority, LocalAuthority, SyncOutcome,
    TimeConfig, TimeSig, TimestampSigner, TimestampVerifier,
};
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "timetrust")]
#[command(about = "Authoritative time and verifiable signed timestamps", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one sync round over the configured source chain
    Sync,
    /// Print the corrected current time
    Now {
        /// Sync before reading the clock
        #[arg(long)]
        sync: bool,
    },
    /// Print the BLAKE3 digest of a file or string
    Digest {
        #[command(flatten)]
        input: PayloadInput,
    },
    /// Generate an Ed25519 authority key
    Keygen {
        /// Write the secret seed (hex) to this file instead of stdout
        #[arg(long, value_name = "PATH")]
        out: Option<PathBuf>,
    },
    /// Obtain a signed timestamp for a digest
    Sign(SignCommand),
    /// Verify a signed timestamp
    Verify(VerifyCommand),
    /// Run an HTTP timestamp authority
    Authority(AuthorityCommand),
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct PayloadInput {
    /// File whose contents are hashed
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,
    /// Literal text that is hashed
    #[arg(long)]
    text: Option<String>,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct DigestInput {
    /// Hex-encoded digest (1 to 64 bytes)
    #[arg(long, value_name = "HEX")]
    digest: Option<String>,
    /// File to hash with BLAKE3 first
    #[arg(long, value_name = "PATH")]
    file: Option<PathBuf>,
}

#[derive(Args)]
struct SignCommand {
    #[command(flatten)]
    input: DigestInput,
    /// Authority URL (overrides `authority_url` from the configuration)
    #[arg(long, conflicts_with = "key_file")]
    authority: Option<String>,
    /// Sign in-process with this key file instead of a remote authority
    #[arg(long, value_name = "PATH")]
    key_file: Option<PathBuf>,
    /// Write the TimeSig JSON here instead of stdout
    #[arg(long, value_name = "PATH")]
    out: Option<PathBuf>,
}

#[derive(Args)]
struct VerifyCommand {
    #[command(flatten)]
    input: DigestInput,
    /// File holding the TimeSig JSON
    #[arg(long, value_name = "PATH")]
    timesig: PathBuf,
    /// Hex-encoded authority public key
    #[arg(long, value_name = "HEX")]
    public_key: String,
    /// Sync before checking plausibility
    #[arg(long)]
    sync: bool,
}

#[derive(Args)]
struct AuthorityCommand {
    /// Address to listen on
    #[arg(long, default_value = "127.0.0.1:8700")]
    listen: SocketAddr,
    /// File holding the hex secret seed
    #[arg(long, value_name = "PATH")]
    key_file: PathBuf,
    /// Skip the background clock sync task
    #[arg(long)]
    no_sync: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = TimeConfig::load(cli.config.as_deref()).context("failed to load configuration")?;
    init_logging(&config);
    log_config_source(cli.config.as_deref(), &config);

    match cli.command {
        Commands::Sync => handle_sync(&config).await,
        Commands::Now { sync } => handle_now(&config, sync).await,
        Commands::Digest { input } => handle_digest(input),
        Commands::Keygen { out } => handle_keygen(out.as_deref()),
        Commands::Sign(cmd) => handle_sign(&config, cmd).await,
        Commands::Verify(cmd) => handle_verify(&config, cmd).await,
        Commands::Authority(cmd) => handle_authority(&config, cmd).await,
    }
}

fn init_logging(config: &TimeConfig) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&config.log_level));

    // stdout carries command output; logs go to stderr.
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();
}

fn log_config_source(path: Option<&Path>, config: &TimeConfig) {
    match path {
        Some(path) => info!("configuration loaded from {}", path.display()),
        None => info!("using built-in configuration defaults"),
    }
    info!(
        sources = config.sources.len(),
        authority = ?config.authority_url,
        "time sources configured"
    );
}

async fn sync_once(config: &TimeConfig) -> SyncOutcome {
    ClockSync::from_config(config, global_context()).sync().await
}

async fn handle_sync(config: &TimeConfig) -> Result<()> {
    let outcome = sync_once(config).await;
    println!("{}", serde_json::to_string_pretty(&outcome)?);
    outcome.into_result()?;
    Ok(())
}

async fn handle_now(config: &TimeConfig, sync: bool) -> Result<()> {
    let synced = if sync {
        sync_once(config).await.is_synced()
    } else {
        false
    };

    let now = timetrust_time::now();
    let report = json!({
        "utc": now.to_rfc3339_opts(SecondsFormat::Micros, true),
        "unix_us": now.timestamp_micros(),
        "offset_us": global_context().offset_us(),
        "synced": synced,
    });
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn handle_digest(input: PayloadInput) -> Result<()> {
    let payload = match (input.file, input.text) {
        (Some(path), _) => read_file(&path)?,
        (None, Some(text)) => text.into_bytes(),
        (None, None) => bail!("either --file or --text must be provided"),
    };
    println!("{}", hex::encode(digest_payload(&payload)));
    Ok(())
}

fn handle_keygen(out: Option<&Path>) -> Result<()> {
    let authority = LocalAuthority::generate(global_context().reader());
    let seed = hex::encode(authority.seed());

    if let Some(path) = out {
        fs::write(path, format!("{seed}\n"))
            .with_context(|| format!("failed to write key file {}", path.display()))?;
        info!("secret seed written to {}", path.display());
    }

    let mut report = json!({
        "public_key": hex::encode(authority.public_key_bytes()),
        "key_id": authority.key_id(),
    });
    if out.is_none() {
        report["secret_seed"] = json!(seed);
    }
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

async fn handle_sign(config: &TimeConfig, cmd: SignCommand) -> Result<()> {
    let digest = resolve_digest(&cmd.input)?;

    let sig = if let Some(path) = &cmd.key_file {
        if !sync_once(config).await.is_synced() {
            warn!("signing with an unsynchronized clock");
        }
        let authority = LocalAuthority::from_seed(&load_seed(path)?, global_context().reader());
        TimestampSigner::new(authority, config.sign_timeout())
            .sign(&digest)
            .await?
    } else {
        let Some(url) = cmd.authority.clone().or_else(|| config.authority_url.clone()) else {
            bail!("no authority configured: pass --authority, --key-file or set authority_url");
        };
        TimestampSigner::new(HttpAuthority::new(url), config.sign_timeout())
            .sign(&digest)
            .await?
    };

    let rendered = serde_json::to_string_pretty(&sig)?;
    match &cmd.out {
        Some(path) => {
            fs::write(path, rendered)
                .with_context(|| format!("failed to write TimeSig {}", path.display()))?;
            info!(time = %sig.time, "TimeSig written to {}", path.display());
        }
        None => println!("{rendered}"),
    }
    Ok(())
}

async fn handle_verify(config: &TimeConfig, cmd: VerifyCommand) -> Result<()> {
    let digest = resolve_digest(&cmd.input)?;
    let raw = fs::read_to_string(&cmd.timesig)
        .with_context(|| format!("failed to read TimeSig {}", cmd.timesig.display()))?;
    let sig = TimeSig::from_json(&raw).map_err(anyhow::Error::msg)?;
    let public_key = hex::decode(cmd.public_key.trim()).context("public key is not hex")?;

    if cmd.sync && !sync_once(config).await.is_synced() {
        warn!("plausibility check uses the unsynchronized local clock");
    }

    let verifier = TimestampVerifier::from_config(config, global_context().reader());
    if verifier.verify(&digest, &sig, &public_key) {
        println!("valid: signed at {}", sig.time.to_rfc3339_opts(SecondsFormat::Micros, true));
        Ok(())
    } else {
        bail!("invalid timestamp signature")
    }
}

async fn handle_authority(config: &TimeConfig, cmd: AuthorityCommand) -> Result<()> {
    let context = global_context();
    if !cmd.no_sync {
        let sync = Arc::new(ClockSync::from_config(config, context.clone()));
        let _periodic = sync.spawn_periodic(config.sync_interval());
    }

    let authority = LocalAuthority::from_seed(&load_seed(&cmd.key_file)?, context.reader());
    authority::serve(authority, cmd.listen).await
}

fn resolve_digest(input: &DigestInput) -> Result<Vec<u8>> {
    match (&input.digest, &input.file) {
        (Some(hex_digest), _) => hex::decode(hex_digest.trim()).context("digest is not hex"),
        (None, Some(path)) => Ok(digest_payload(&read_file(path)?).to_vec()),
        (None, None) => bail!("either --digest or --file must be provided"),
    }
}

fn read_file(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).with_context(|| format!("failed to read {}", path.display()))
}

fn load_seed(path: &Path) -> Result<[u8; 32]> {
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read key file {}", path.display()))?;
    parse_seed(&raw).with_context(|| format!("invalid key file {}", path.display()))
}

fn parse_seed(raw: &str) -> Result<[u8; 32]> {
    let bytes = hex::decode(raw.trim()).context("seed is not hex")?;
    let len = bytes.len();
    bytes
        .try_into()
        .map_err(|_| anyhow::anyhow!("seed must be 32 bytes, got {len}"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;
    use std::io::Write;

    #[test]
    fn cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn sign_requires_exactly_one_digest_source() {
        assert!(Cli::try_parse_from(["timetrust", "sign", "--authority", "http://a"]).is_err());
        assert!(Cli::try_parse_from([
            "timetrust", "sign", "--digest", "aa", "--file", "x", "--authority", "http://a"
        ])
        .is_err());
        assert!(Cli::try_parse_from(["timetrust", "sign", "--digest", "aa"]).is_ok());
    }

    #[derive(Clone, Default)]
    struct CapturedLogs(Arc<std::sync::Mutex<Vec<u8>>>);

    impl Write for CapturedLogs {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn config_source_is_logged_once_a_subscriber_is_installed() {
        let logs = CapturedLogs::default();
        let writer = logs.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .finish();

        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "log_level = \"debug\"").unwrap();
        let config = TimeConfig::load(Some(file.path())).unwrap();
        tracing::subscriber::with_default(subscriber, || {
            log_config_source(Some(file.path()), &config);
        });

        let output = String::from_utf8(logs.0.lock().unwrap().clone()).unwrap();
        assert!(output.contains("configuration loaded from"), "{output}");
        assert!(output.contains(&file.path().display().to_string()), "{output}");
    }

    #[test]
    fn seed_parsing() {
        let seed = parse_seed(&format!("{}\n", "ab".repeat(32))).unwrap();
        assert_eq!(seed, [0xAB; 32]);
        assert!(parse_seed("abcd").is_err());
        assert!(parse_seed("zz").is_err());
    }

    #[test]
    fn digest_from_file_is_blake3_of_contents() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(b"ledger export").unwrap();
        let input = DigestInput {
            digest: None,
            file: Some(file.path().to_path_buf()),
        };
        assert_eq!(resolve_digest(&input).unwrap(), digest_payload(b"ledger export").to_vec());

        let input = DigestInput {
            digest: Some("00ff".into()),
            file: None,
        };
        assert_eq!(resolve_digest(&input).unwrap(), vec![0x00, 0xFF]);
    }

    #[test]
    fn key_file_round_trip() {
        let file = tempfile::NamedTempFile::new().unwrap();
        handle_keygen(Some(file.path())).unwrap();
        let seed = load_seed(file.path()).unwrap();
        let reader = global_context().reader();
        let authority = LocalAuthority::from_seed(&seed, reader);
        assert_eq!(authority.seed(), seed);
    }
}
