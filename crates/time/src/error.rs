//! Error types for time sources, synchronization and timestamp signing.

use thiserror::Error;

/// Failure of a single time source attempt.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TimeSourceError {
    #[error("time source {endpoint} unreachable: {reason}")]
    ProtocolUnreachable { endpoint: String, reason: String },

    #[error("malformed response from {endpoint}: {reason}")]
    MalformedResponse { endpoint: String, reason: String },
}

impl TimeSourceError {
    pub(crate) fn unreachable(endpoint: &str, reason: impl Into<String>) -> Self {
        Self::ProtocolUnreachable {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }

    pub(crate) fn malformed(endpoint: &str, reason: impl Into<String>) -> Self {
        Self::MalformedResponse {
            endpoint: endpoint.to_string(),
            reason: reason.into(),
        }
    }
}

/// Every configured time source failed during one sync round.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("all time sources exhausted")]
pub struct SyncUnavailable;

/// Failure reported by the external timestamp authority.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SigningError {
    #[error("timestamp authority unavailable: {0}")]
    SigningUnavailable(String),

    #[error("timestamp authority rejected the request: {0}")]
    SigningRejected(String),
}

/// Configuration could not be loaded or is inconsistent.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

pub type Result<T> = std::result::Result<T, TimeSourceError>;
