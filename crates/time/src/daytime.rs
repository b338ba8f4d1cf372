//! Daytime protocol client.
//!
//! The server answers a bare TCP connection with one ASCII line such as
//!
//! ```text
//! 58912 20-03-04 15:46:52 55 0 0 793.7 UTC(NIST) *
//! ```
//!
//! and closes the connection. NIST servers prefix the line with a line feed;
//! counting that byte, the UTC timestamp occupies the fixed-width field
//! starting at byte 7.

use std::borrow::Cow;

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use tokio::io::AsyncReadExt;
use tokio::net::TcpStream;
use tokio::time::timeout;
use tracing::debug;

use crate::error::{Result, TimeSourceError};
use crate::source::{TimeSource, TimeSourceClient};

pub const DEFAULT_DAYTIME_ENDPOINT: &str = "time.nist.gov:13";

/// Byte offset of the timestamp field, measured from the leading line feed.
pub const DAYTIME_FIELD_OFFSET: usize = 7;
/// Width of the `yy-MM-dd HH:mm:ss` field.
pub const DAYTIME_FIELD_LEN: usize = 17;

// `%y` expands 00-69 to 20xx and 70-99 to 19xx.
const DAYTIME_FORMAT: &str = "%y-%m-%d %H:%M:%S";

// A daytime line is well under 100 bytes; anything longer is not a daytime server.
const MAX_RESPONSE_BYTES: u64 = 1024;

/// Parse the timestamp embedded in a raw daytime response.
///
/// A response that arrives without the leading line feed is framed with one
/// before the fixed-offset field is sliced out.
pub fn parse_daytime(response: &[u8]) -> std::result::Result<DateTime<Utc>, String> {
    let response: Cow<'_, [u8]> = if response.first() == Some(&b'\n') {
        Cow::Borrowed(response)
    } else {
        let mut framed = Vec::with_capacity(response.len() + 1);
        framed.push(b'\n');
        framed.extend_from_slice(response);
        Cow::Owned(framed)
    };
    let end = DAYTIME_FIELD_OFFSET + DAYTIME_FIELD_LEN;
    let field = response.get(DAYTIME_FIELD_OFFSET..end).ok_or_else(|| {
        format!(
            "response is {} bytes, timestamp field needs {end}",
            response.len()
        )
    })?;
    let field =
        std::str::from_utf8(field).map_err(|e| format!("timestamp field is not ASCII: {e}"))?;

    NaiveDateTime::parse_from_str(field, DAYTIME_FORMAT)
        .map(|naive| naive.and_utc())
        .map_err(|e| format!("invalid timestamp {field:?}: {e}"))
}

/// Client for a single daytime server.
#[derive(Debug, Clone)]
pub struct DaytimeClient {
    source: TimeSource,
}

impl DaytimeClient {
    pub fn new(source: TimeSource) -> Self {
        Self { source }
    }

    async fn exchange(&self) -> std::io::Result<Vec<u8>> {
        let stream = TcpStream::connect(self.source.endpoint.as_str()).await?;
        let mut buf = Vec::with_capacity(64);
        stream
            .take(MAX_RESPONSE_BYTES)
            .read_to_end(&mut buf)
            .await?;
        Ok(buf)
    }
}

#[async_trait]
impl TimeSourceClient for DaytimeClient {
    fn source(&self) -> &TimeSource {
        &self.source
    }

    async fn fetch(&self) -> Result<DateTime<Utc>> {
        let endpoint = &self.source.endpoint;
        let response = match timeout(self.source.timeout, self.exchange()).await {
            Ok(Ok(buf)) => buf,
            Ok(Err(e)) => return Err(TimeSourceError::unreachable(endpoint, e.to_string())),
            Err(_) => {
                return Err(TimeSourceError::unreachable(
                    endpoint,
                    format!("no response within {:?}", self.source.timeout),
                ))
            }
        };
        debug!(endpoint = %endpoint, bytes = response.len(), "daytime response received");

        parse_daytime(&response).map_err(|reason| TimeSourceError::malformed(endpoint, reason))
    }
}
