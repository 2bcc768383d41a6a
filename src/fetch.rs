//! Remote JSON source client
//!
//! The cache engine consumes exactly one capability from its environment:
//! fetching the flat record list from the configured remote source. Failures
//! are classified into a status/text/reason triple that the update caller
//! receives verbatim; the engine never retries and never interprets them
//! further.

use crate::error::{CacheError, Result};
use crate::grouper::JsonMap;
use async_trait::async_trait;
use std::fmt;
use std::time::Duration;

/// Default remote request timeout in seconds
const FETCH_TIMEOUT_SECS: u64 = 30;

/// A classified remote fetch failure: the status code to propagate plus a
/// short human-readable label and detail string
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteSourceError {
    pub status: u16,
    pub text: String,
    pub reason: String,
}

impl fmt::Display for RemoteSourceError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}: {}", self.status, self.text, self.reason)
    }
}

/// Source of flat records for the rebuild pipeline.
///
/// The production implementation is [`HttpSource`]; tests substitute stubs.
#[async_trait]
pub trait RecordSource: Send + Sync {
    /// Fetch the full record list from the source.
    async fn fetch_records(&self) -> Result<Vec<JsonMap>>;
}

/// HTTP record source backed by `reqwest`, expecting the remote endpoint to
/// return a JSON array of flat objects
pub struct HttpSource {
    client: reqwest::Client,
    url: String,
}

impl HttpSource {
    pub fn new(source_url: &str, source_path: &str) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(FETCH_TIMEOUT_SECS))
            .build()
            .map_err(|e| CacheError::Config(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            url: format!("{source_url}{source_path}"),
        })
    }
}

#[async_trait]
impl RecordSource for HttpSource {
    async fn fetch_records(&self) -> Result<Vec<JsonMap>> {
        log::debug!("fetching records from {}", self.url);

        let response = match self.client.get(&self.url).send().await {
            Ok(response) => response,
            Err(err) => return Err(CacheError::Remote(classify_transport_error(&err))),
        };

        let status = response.status();
        if !status.is_success() {
            let text = if status == reqwest::StatusCode::NOT_FOUND {
                "Id not found"
            } else {
                "Remote Response Error"
            };
            return Err(CacheError::Remote(RemoteSourceError {
                status: status.as_u16(),
                text: text.to_string(),
                reason: format!(
                    "Other Response Error: {}",
                    status.canonical_reason().unwrap_or("unknown status")
                ),
            }));
        }

        match response.json::<Vec<JsonMap>>().await {
            Ok(records) => {
                log::info!("fetched {} records from remote source", records.len());
                Ok(records)
            }
            Err(err) => Err(CacheError::Remote(RemoteSourceError {
                status: 500,
                text: "Wrong Remote Source Response".to_string(),
                reason: format!("undecodable response body: {err}"),
            })),
        }
    }
}

/// Classify a transport-level failure (the request never produced a status).
fn classify_transport_error(err: &reqwest::Error) -> RemoteSourceError {
    if err.is_timeout() {
        RemoteSourceError {
            status: 408,
            text: "Remote Source Request timed out".to_string(),
            reason: format!("request timed out after {FETCH_TIMEOUT_SECS}s: {err}"),
        }
    } else if err.is_connect() {
        RemoteSourceError {
            status: 500,
            text: "Connect to Remote Source error".to_string(),
            reason: format!("connection error: {err}"),
        }
    } else {
        RemoteSourceError {
            status: 500,
            text: "Remote Source Error".to_string(),
            reason: format!("other transport error: {err}"),
        }
    }
}
