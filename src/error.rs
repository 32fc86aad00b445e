use std::path::PathBuf;

use thiserror::Error;

/// Errors raised by a persistent store backend.
#[derive(Debug, Error)]
pub enum StoreError {
    /// The backend could not be reached or rejected the operation.
    #[error("{backend} store unavailable: {reason}")]
    Unavailable {
        backend: &'static str,
        reason: String,
    },
}

impl StoreError {
    pub fn unavailable(backend: &'static str, reason: impl ToString) -> Self {
        StoreError::Unavailable {
            backend,
            reason: reason.to_string(),
        }
    }
}

/// Errors returned by registry operations.
#[derive(Debug, Error)]
pub enum RegistryError {
    /// Persistence failed; in-memory state was left untouched.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// The subscription can never be a delivery target.
    #[error("invalid subscription: {0}")]
    InvalidSubscription(String),

    /// The registry task has stopped.
    #[error("registry is shut down")]
    Closed,
}

impl From<StoreError> for RegistryError {
    fn from(err: StoreError) -> Self {
        RegistryError::StoreUnavailable(err.to_string())
    }
}

/// Reasons why a push delivery attempt failed.
///
/// The dispatcher treats every reason the same way: the subscriber is
/// removed. The variants exist for logging.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FailureReason {
    #[error("subscription no longer exists at the push service")]
    Gone,

    #[error("rate limited by push service")]
    RateLimited,

    #[error("push service rejected request ({0})")]
    ClientError(u16),

    #[error("push service returned error ({0})")]
    RemoteError(u16),

    #[error("request timed out")]
    Timeout,

    #[error("network error")]
    Network,

    #[error("invalid subscription material: {0}")]
    InvalidSubscription(String),

    #[error("delivery task aborted")]
    Aborted,
}

/// Errors loading the server configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("{0}")]
    Invalid(String),
}
