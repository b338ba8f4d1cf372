//! Runtime configuration.
//!
//! Layered the same way as the node configuration: built-in defaults, then an
//! optional TOML file, then `TIMETRUST__*` environment variables.

use std::path::Path;
use std::time::Duration;

use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::daytime::DEFAULT_DAYTIME_ENDPOINT;
use crate::error::ConfigError;
use crate::http_date::DEFAULT_HTTP_DATE_URL;
use crate::source::{TimeSource, TimeSourceKind};

pub const ENV_PREFIX: &str = "TIMETRUST";

fn default_source_timeout_ms() -> u64 {
    3_000
}

/// One entry of the ordered source chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceConfig {
    pub kind: TimeSourceKind,
    /// Falls back to the built-in endpoint for `kind` when omitted.
    #[serde(default)]
    pub endpoint: Option<String>,
    #[serde(default = "default_source_timeout_ms")]
    pub timeout_ms: u64,
}

impl SourceConfig {
    pub fn to_source(&self) -> TimeSource {
        let timeout = Duration::from_millis(self.timeout_ms);
        match self.kind {
            TimeSourceKind::DaytimeProtocol => TimeSource::daytime(
                self.endpoint.as_deref().unwrap_or(DEFAULT_DAYTIME_ENDPOINT),
                timeout,
            ),
            TimeSourceKind::HttpDateHeader => {
                TimeSource::http_date(self.endpoint.as_deref(), timeout)
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeConfig {
    /// Sources in priority order.
    pub sources: Vec<SourceConfig>,
    /// How far in the future a signed time may lie and still verify.
    pub plausibility_tolerance_secs: u64,
    /// Period of the background re-sync task.
    pub sync_interval_secs: u64,
    /// HTTP endpoint of the timestamp authority, if any.
    pub authority_url: Option<String>,
    pub sign_timeout_ms: u64,
    pub log_level: String,
}

impl Default for TimeConfig {
    fn default() -> Self {
        Self {
            sources: vec![
                SourceConfig {
                    kind: TimeSourceKind::DaytimeProtocol,
                    endpoint: Some(DEFAULT_DAYTIME_ENDPOINT.to_string()),
                    timeout_ms: default_source_timeout_ms(),
                },
                SourceConfig {
                    kind: TimeSourceKind::HttpDateHeader,
                    endpoint: Some(DEFAULT_HTTP_DATE_URL.to_string()),
                    timeout_ms: default_source_timeout_ms(),
                },
            ],
            plausibility_tolerance_secs: 300,
            sync_interval_secs: 3_600,
            authority_url: None,
            sign_timeout_ms: 5_000,
            log_level: "info".to_string(),
        }
    }
}

impl TimeConfig {
    /// Load defaults, then `path` (if given), then environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut builder = Config::builder();

        if let Some(path) = path {
            if !path.exists() {
                return Err(ConfigError::Invalid(format!(
                    "configuration file {} not found",
                    path.display()
                )));
            }
            builder = builder.add_source(File::from(path));
        }

        builder = builder.add_source(
            Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        );

        let config: TimeConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.sources.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one time source is required".into(),
            ));
        }
        for source in &self.sources {
            if source.timeout_ms == 0 {
                return Err(ConfigError::Invalid(format!(
                    "{} source timeout must be non-zero",
                    source.kind
                )));
            }
            if source.kind == TimeSourceKind::HttpDateHeader {
                if let Some(endpoint) = &source.endpoint {
                    Url::parse(endpoint).map_err(|e| {
                        ConfigError::Invalid(format!("invalid http-date URL {endpoint}: {e}"))
                    })?;
                }
            }
        }
        if let Some(url) = &self.authority_url {
            Url::parse(url)
                .map_err(|e| ConfigError::Invalid(format!("invalid authority URL {url}: {e}")))?;
        }
        if self.sign_timeout_ms == 0 {
            return Err(ConfigError::Invalid("sign timeout must be non-zero".into()));
        }
        if self.sync_interval_secs == 0 {
            return Err(ConfigError::Invalid("sync interval must be non-zero".into()));
        }
        Ok(())
    }

    pub fn time_sources(&self) -> Vec<TimeSource> {
        self.sources.iter().map(SourceConfig::to_source).collect()
    }

    pub fn plausibility_tolerance(&self) -> Duration {
        Duration::from_secs(self.plausibility_tolerance_secs)
    }

    pub fn sync_interval(&self) -> Duration {
        Duration::from_secs(self.sync_interval_secs)
    }

    pub fn sign_timeout(&self) -> Duration {
        Duration::from_millis(self.sign_timeout_ms)
    }
}
