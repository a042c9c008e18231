//! Fetch results as printed lines and JSON reports.

use std::fmt;

use furqaan_net::Request;
use furqaan_sw::{FetchOutcome, ResponseSource, SwResult};
use serde::{Deserialize, Serialize};

/// Outcome of one probed request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FetchRecord {
    pub url: String,
    /// `network`, `cache:<bucket>`, `fallback`, `passthrough` or `error`.
    pub source: String,
    pub status: Option<u16>,
    /// Media type of the response, without parameters.
    pub content_type: Option<String>,
    pub bytes: usize,
    pub error: Option<String>,
}

impl FetchRecord {
    pub fn from_outcome(request: &Request, outcome: SwResult<FetchOutcome>) -> Self {
        let url = request.url.to_string();
        match outcome {
            Ok(FetchOutcome::Respond(served)) => Self {
                url,
                source: match served.source {
                    ResponseSource::Network => "network".to_string(),
                    ResponseSource::Cache { bucket } => format!("cache:{bucket}"),
                    ResponseSource::OfflineFallback => "fallback".to_string(),
                },
                status: Some(served.response.status.as_u16()),
                content_type: served
                    .response
                    .content_type()
                    .map(|mime| mime.essence_str().to_string()),
                bytes: served.response.body.len(),
                error: None,
            },
            Ok(FetchOutcome::Passthrough(reason)) => Self {
                url,
                source: "passthrough".to_string(),
                status: None,
                content_type: None,
                bytes: 0,
                error: Some(format!("{reason:?}")),
            },
            Err(e) => Self {
                url,
                source: "error".to_string(),
                status: None,
                content_type: None,
                bytes: 0,
                error: Some(e.to_string()),
            },
        }
    }

    pub fn is_error(&self) -> bool {
        self.source == "error"
    }
}

impl fmt::Display for FetchRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.status, &self.error) {
            (Some(status), _) => write!(
                f,
                "{} {:<24} {} ({} bytes, {})",
                status,
                self.source,
                self.url,
                self.bytes,
                self.content_type.as_deref().unwrap_or("no content type")
            ),
            (None, Some(error)) => write!(f, "--- {:<24} {} ({})", self.source, self.url, error),
            (None, None) => write!(f, "--- {:<24} {}", self.source, self.url),
        }
    }
}

/// Summary written by `fetch --report`.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct FetchReport {
    pub total: usize,
    pub failed: usize,
    pub requests: Vec<FetchRecord>,
}

impl FetchReport {
    pub fn push(&mut self, record: FetchRecord) {
        self.total += 1;
        if record.is_error() {
            self.failed += 1;
        }
        self.requests.push(record);
    }
}
