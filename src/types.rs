use std::fmt;

use serde::{Deserialize, Serialize};

/// Push service URL identifying one browser subscription.
///
/// This is a strongly-typed wrapper to avoid accidental mixing
/// of endpoints with key material or other strings.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Endpoint(pub String);

impl Endpoint {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self(endpoint.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Endpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Endpoint {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl From<String> for Endpoint {
    fn from(value: String) -> Self {
        Self(value)
    }
}

/// A browser's push subscription.
///
/// `key` is the client's P-256 ECDH public key and `auth_secret` the shared
/// authentication secret, both base64 as sent by the browser. Either may be
/// empty, in which case pushes to this endpoint carry no payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Subscription {
    pub endpoint: Endpoint,

    #[serde(default)]
    pub key: String,

    #[serde(default, rename = "authSecret")]
    pub auth_secret: String,
}

impl Subscription {
    pub fn new(
        endpoint: impl Into<Endpoint>,
        key: impl Into<String>,
        auth_secret: impl Into<String>,
    ) -> Self {
        Self {
            endpoint: endpoint.into(),
            key: key.into(),
            auth_secret: auth_secret.into(),
        }
    }

    /// Whether both halves of the encryption material are present.
    pub fn has_keys(&self) -> bool {
        !self.key.is_empty() && !self.auth_secret.is_empty()
    }
}

/// Whether an `unregister` call removed anything.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnregisterOutcome {
    Removed,
    NotFound,
}

/// Result of delivering to a single subscriber.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Delivered,
    Failed(crate::error::FailureReason),
}

/// Summary of one broadcast, available once every delivery task finished.
#[derive(Debug, Clone, Default)]
pub struct BroadcastReport {
    /// Subscribers present in the snapshot.
    pub attempted: usize,
    pub delivered: usize,
    pub failed: Vec<(Endpoint, crate::error::FailureReason)>,
    /// Failed subscribers actually removed from the registry.
    pub pruned: usize,
}
