//! Time source configuration and the client capability shared by the
//! daytime and HTTP-date transports.

use std::fmt;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::daytime::{DaytimeClient, DEFAULT_DAYTIME_ENDPOINT};
use crate::error::Result;
use crate::http_date::{HttpDateClient, DEFAULT_HTTP_DATE_URL};

/// Per-source timeout used when none is configured.
pub const DEFAULT_SOURCE_TIMEOUT: Duration = Duration::from_secs(3);

/// Transport used to reach a time authority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TimeSourceKind {
    /// Daytime protocol over TCP (conventionally port 13).
    DaytimeProtocol,
    /// `Date` header of an HTTP response.
    HttpDateHeader,
}

impl fmt::Display for TimeSourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TimeSourceKind::DaytimeProtocol => write!(f, "daytime"),
            TimeSourceKind::HttpDateHeader => write!(f, "http-date"),
        }
    }
}

/// Immutable description of one time authority.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TimeSource {
    pub kind: TimeSourceKind,
    /// `host:port` for daytime, a URL for HTTP-date.
    pub endpoint: String,
    pub timeout: Duration,
}

impl TimeSource {
    pub fn daytime(endpoint: impl Into<String>, timeout: Duration) -> Self {
        Self {
            kind: TimeSourceKind::DaytimeProtocol,
            endpoint: endpoint.into(),
            timeout,
        }
    }

    /// HTTP-date source; falls back to a well-known host when `url` is `None`.
    pub fn http_date(url: Option<&str>, timeout: Duration) -> Self {
        Self {
            kind: TimeSourceKind::HttpDateHeader,
            endpoint: url.unwrap_or(DEFAULT_HTTP_DATE_URL).to_string(),
            timeout,
        }
    }

    /// The default two-tier chain: daytime first, HTTP-date second.
    pub fn default_chain() -> Vec<TimeSource> {
        vec![
            TimeSource::daytime(DEFAULT_DAYTIME_ENDPOINT, DEFAULT_SOURCE_TIMEOUT),
            TimeSource::http_date(None, DEFAULT_SOURCE_TIMEOUT),
        ]
    }
}

/// One network round trip to a time authority.
///
/// Implementations never retry; fallback and retry policy live in
/// [`crate::sync::ClockSync`]. Every call must be bounded by
/// [`TimeSource::timeout`].
#[async_trait]
pub trait TimeSourceClient: Send + Sync {
    fn source(&self) -> &TimeSource;

    async fn fetch(&self) -> Result<DateTime<Utc>>;
}

/// Build the transport client matching `source.kind`.
pub fn client_for(source: TimeSource) -> Box<dyn TimeSourceClient> {
    match source.kind {
        TimeSourceKind::DaytimeProtocol => Box::new(DaytimeClient::new(source)),
        TimeSourceKind::HttpDateHeader => Box::new(HttpDateClient::new(source)),
    }
}
