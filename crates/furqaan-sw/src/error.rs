//! Errors raised by the offline worker.

use furqaan_net::NetError;
use thiserror::Error;

/// Result alias for worker operations.
pub type SwResult<T> = Result<T, ServiceWorkerError>;

/// Errors that can occur in service worker operations.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ServiceWorkerError {
    #[error("Install of {version} failed: {reason}")]
    InstallFailed { version: String, reason: String },

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("State error: {0}")]
    StateError(String),

    #[error("Cache error: {0}")]
    CacheError(String),

    #[error("Storage error: {0}")]
    StorageError(String),

    #[error("Config error: {0}")]
    ConfigError(String),

    #[error("Offline fallback {0} is not cached")]
    FallbackMissing(String),

    #[error("Not found: {0}")]
    NotFound(String),
}

impl ServiceWorkerError {
    /// Whether the error came from the network rather than the worker itself.
    pub fn is_network(&self) -> bool {
        matches!(self, Self::NetworkError(_))
    }
}

impl From<NetError> for ServiceWorkerError {
    fn from(err: NetError) -> Self {
        Self::NetworkError(err.to_string())
    }
}

impl From<std::io::Error> for ServiceWorkerError {
    fn from(err: std::io::Error) -> Self {
        Self::StorageError(err.to_string())
    }
}
