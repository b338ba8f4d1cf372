//! Timestamp signing through an external authority.
//!
//! The core never holds the authority's private key. [`TimestampSigner`]
//! validates the digest, forwards it to a [`TimestampAuthority`] and packages
//! the reply as a [`TimeSig`].

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use ed25519_dalek::{Signer, SigningKey, VerifyingKey};
use hex::ToHex;
use rand_core::OsRng;
use serde::{Deserialize, Serialize};
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::clock::ClockReader;
use crate::error::SigningError;
use crate::timesig::{signed_message, truncate_to_micros, validate_digest, TimeSig};

/// What an authority returns for one digest.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthorityReceipt {
    pub signature: Vec<u8>,
    /// Authority time that was signed together with the digest.
    pub time: DateTime<Utc>,
    pub key_id: Option<String>,
}

impl From<AuthorityReceipt> for TimeSig {
    fn from(receipt: AuthorityReceipt) -> Self {
        Self {
            time: receipt.time,
            signature: receipt.signature,
            signer_key_id: receipt.key_id,
        }
    }
}

/// A trusted party that signs `digest || time` with its private key.
#[async_trait]
pub trait TimestampAuthority: Send + Sync {
    async fn sign(&self, digest: &[u8]) -> Result<AuthorityReceipt, SigningError>;
}

#[async_trait]
impl<A: TimestampAuthority + ?Sized> TimestampAuthority for std::sync::Arc<A> {
    async fn sign(&self, digest: &[u8]) -> Result<AuthorityReceipt, SigningError> {
        (**self).sign(digest).await
    }
}

/// Turns digests into [`TimeSig`]s via an authority.
pub struct TimestampSigner<A> {
    authority: A,
    timeout: Duration,
}

impl<A: TimestampAuthority> TimestampSigner<A> {
    pub fn new(authority: A, timeout: Duration) -> Self {
        Self { authority, timeout }
    }

    pub fn authority(&self) -> &A {
        &self.authority
    }

    pub async fn sign(&self, digest: &[u8]) -> Result<TimeSig, SigningError> {
        self.sign_within(digest, self.timeout).await
    }

    /// Sign with a caller-supplied deadline instead of the default one.
    ///
    /// Dropping the future cancels the request; no TimeSig exists until the
    /// authority's reply is complete.
    pub async fn sign_within(
        &self,
        digest: &[u8],
        limit: Duration,
    ) -> Result<TimeSig, SigningError> {
        validate_digest(digest).map_err(SigningError::SigningRejected)?;

        let receipt = match timeout(limit, self.authority.sign(digest)).await {
            Ok(Ok(receipt)) => receipt,
            Ok(Err(err)) => {
                warn!(error = %err, "timestamp authority refused to sign");
                return Err(err);
            }
            Err(_) => {
                return Err(SigningError::SigningUnavailable(format!(
                    "no reply within {limit:?}"
                )))
            }
        };

        if receipt.signature.is_empty() {
            return Err(SigningError::SigningUnavailable(
                "authority returned an empty signature".into(),
            ));
        }
        debug!(time = %receipt.time, key_id = ?receipt.key_id, "digest timestamped");

        Ok(receipt.into())
    }
}

// ==== LOCAL AUTHORITY ====

/// Ed25519 authority running in-process, e.g. inside a dedicated signing
/// service or a test. Time comes from the supplied [`ClockReader`].
#[derive(Debug, Clone)]
pub struct LocalAuthority {
    signing_key: SigningKey,
    clock: ClockReader,
    key_id: Option<String>,
}

impl LocalAuthority {
    pub fn new(signing_key: SigningKey, clock: ClockReader) -> Self {
        let key_id = Some(key_id_for(&signing_key.verifying_key()));
        Self {
            signing_key,
            clock,
            key_id,
        }
    }

    pub fn generate(clock: ClockReader) -> Self {
        let mut rng = OsRng;
        Self::new(SigningKey::generate(&mut rng), clock)
    }

    pub fn from_seed(seed: &[u8; 32], clock: ClockReader) -> Self {
        Self::new(SigningKey::from_bytes(seed), clock)
    }

    /// The 32-byte secret seed, for persisting a generated key.
    pub fn seed(&self) -> [u8; 32] {
        self.signing_key.to_bytes()
    }

    pub fn verifying_key(&self) -> VerifyingKey {
        self.signing_key.verifying_key()
    }

    pub fn public_key_bytes(&self) -> [u8; 32] {
        self.verifying_key().to_bytes()
    }

    pub fn key_id(&self) -> Option<&str> {
        self.key_id.as_deref()
    }

    /// Synchronous signing used by [`TimestampAuthority::sign`].
    pub fn sign_now(&self, digest: &[u8]) -> Result<AuthorityReceipt, SigningError> {
        validate_digest(digest).map_err(SigningError::SigningRejected)?;
        let time = truncate_to_micros(self.clock.now());
        let signature = self.signing_key.sign(&signed_message(digest, time));
        Ok(AuthorityReceipt {
            signature: signature.to_bytes().to_vec(),
            time,
            key_id: self.key_id.clone(),
        })
    }
}

#[async_trait]
impl TimestampAuthority for LocalAuthority {
    async fn sign(&self, digest: &[u8]) -> Result<AuthorityReceipt, SigningError> {
        self.sign_now(digest)
    }
}

/// Short identifier for a public key: first 8 bytes of its BLAKE3 hash, hex.
pub fn key_id_for(key: &VerifyingKey) -> String {
    hex::encode(&blake3::hash(key.as_bytes()).as_bytes()[..8])
}

// ==== HTTP AUTHORITY ====

/// Body posted to an HTTP timestamp authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignRequest {
    /// Hex-encoded digest.
    pub digest: String,
}

/// Body returned by an HTTP timestamp authority.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignResponse {
    /// Hex-encoded signature.
    pub signature: String,
    pub time_us: i64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_id: Option<String>,
}

impl From<AuthorityReceipt> for SignResponse {
    fn from(receipt: AuthorityReceipt) -> Self {
        Self {
            signature: receipt.signature.encode_hex::<String>(),
            time_us: receipt.time.timestamp_micros(),
            key_id: receipt.key_id,
        }
    }
}

/// Authority reached over HTTP: `POST url` with a [`SignRequest`].
///
/// 4xx replies map to [`SigningError::SigningRejected`]; transport failures,
/// 5xx replies and unreadable bodies map to [`SigningError::SigningUnavailable`].
#[derive(Debug, Clone)]
pub struct HttpAuthority {
    client: reqwest::Client,
    url: String,
}

impl HttpAuthority {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            url: url.into(),
        }
    }

    pub fn url(&self) -> &str {
        &self.url
    }
}

#[async_trait]
impl TimestampAuthority for HttpAuthority {
    async fn sign(&self, digest: &[u8]) -> Result<AuthorityReceipt, SigningError> {
        let request = SignRequest {
            digest: hex::encode(digest),
        };
        let response = self
            .client
            .post(&self.url)
            .json(&request)
            .send()
            .await
            .map_err(|e| SigningError::SigningUnavailable(e.to_string()))?;

        let status = response.status();
        if status.is_client_error() {
            let body = response.text().await.unwrap_or_default();
            return Err(SigningError::SigningRejected(format!("{status}: {body}")));
        }
        if !status.is_success() {
            return Err(SigningError::SigningUnavailable(format!(
                "authority answered {status}"
            )));
        }

        let reply: SignResponse = response
            .json()
            .await
            .map_err(|e| SigningError::SigningUnavailable(format!("unreadable reply: {e}")))?;
        let signature = hex::decode(&reply.signature).map_err(|e| {
            SigningError::SigningUnavailable(format!("signature is not hex: {e}"))
        })?;
        let time = DateTime::from_timestamp_micros(reply.time_us).ok_or_else(|| {
            SigningError::SigningUnavailable(format!("time {} out of range", reply.time_us))
        })?;

        Ok(AuthorityReceipt {
            signature,
            time,
            key_id: reply.key_id,
        })
    }
}
