//! HTTP `Date` header client.
//!
//! Reachable through most proxies and firewalls, but only second precision and
//! subject to whatever the origin's clock says. Used as the fallback tier.

use async_trait::async_trait;
use chrono::{DateTime, NaiveDateTime, Utc};
use reqwest::header::DATE;
use reqwest::redirect::Policy;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::error::{Result, TimeSourceError};
use crate::source::{TimeSource, TimeSourceClient};

pub const DEFAULT_HTTP_DATE_URL: &str = "https://www.google.com";

/// `Tue, 04 Mar 2025 15:46:52 GMT`
const IMF_FIXDATE: &str = "%a, %d %b %Y %H:%M:%S GMT";
/// `Tuesday, 04-Mar-25 15:46:52 GMT` (obsolete RFC 850 form)
const RFC850_DATE: &str = "%A, %d-%b-%y %H:%M:%S GMT";
/// `Tue Mar  4 15:46:52 2025` (obsolete asctime form, space-padded day)
const ASCTIME_DATE: &str = "%a %b %e %H:%M:%S %Y";
/// `Sun Nov 16 08:49:37 1994` (asctime with a two-digit day)
const ASCTIME_DATE_WIDE: &str = "%a %b %d %H:%M:%S %Y";

/// Parse an HTTP-date (RFC 9110 §5.6.7) into a UTC instant.
pub fn parse_http_date(value: &str) -> std::result::Result<DateTime<Utc>, String> {
    let value = value.trim();
    [IMF_FIXDATE, RFC850_DATE, ASCTIME_DATE, ASCTIME_DATE_WIDE]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(value, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| format!("not an HTTP-date: {value:?}"))
}

/// Client reading the `Date` header of a single URL.
#[derive(Debug, Clone)]
pub struct HttpDateClient {
    source: TimeSource,
    /// Build failure is kept and reported by every fetch.
    client: std::result::Result<reqwest::Client, String>,
}

impl HttpDateClient {
    pub fn new(source: TimeSource) -> Self {
        // Redirect responses carry a Date header too; following them only adds round trips.
        let client = reqwest::Client::builder()
            .redirect(Policy::none())
            .build()
            .map_err(|e| {
                warn!(endpoint = %source.endpoint, error = %e, "cannot build HTTP client");
                format!("HTTP client unavailable: {e}")
            });
        Self { source, client }
    }
}

#[async_trait]
impl TimeSourceClient for HttpDateClient {
    fn source(&self) -> &TimeSource {
        &self.source
    }

    async fn fetch(&self) -> Result<DateTime<Utc>> {
        let endpoint = &self.source.endpoint;
        let client = self
            .client
            .as_ref()
            .map_err(|reason| TimeSourceError::unreachable(endpoint, reason.clone()))?;

        // `send` resolves once the response head is in; the body is never polled.
        let response = match timeout(self.source.timeout, client.get(endpoint).send()).await {
            Ok(Ok(response)) => response,
            Ok(Err(e)) => return Err(TimeSourceError::unreachable(endpoint, e.to_string())),
            Err(_) => {
                return Err(TimeSourceError::unreachable(
                    endpoint,
                    format!("no response head within {:?}", self.source.timeout),
                ))
            }
        };
        debug!(
            endpoint = %endpoint,
            status = %response.status(),
            "http-date response head received"
        );

        let header = response
            .headers()
            .get(DATE)
            .ok_or_else(|| TimeSourceError::malformed(endpoint, "response has no Date header"))?;
        let value = header
            .to_str()
            .map_err(|e| TimeSourceError::malformed(endpoint, format!("Date header: {e}")))?;

        parse_http_date(value).map_err(|reason| TimeSourceError::malformed(endpoint, reason))
    }
}
