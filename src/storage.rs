use std::collections::{BTreeSet, HashMap};

use async_trait::async_trait;
use tokio::sync::Mutex;

use crate::error::StoreError;
use crate::types::{Endpoint, Subscription};

/// Durable home of the subscriber set.
///
/// Backends model a set of endpoints plus two scalar fields per endpoint.
/// Each write must be all-or-nothing: a failed `add` or `remove` leaves the
/// previous record intact.
#[async_trait]
pub trait SubscriptionStore: Send + Sync {
    /// Add the endpoint to the set and write its `key` / `authSecret`.
    async fn add(&self, subscription: &Subscription) -> Result<(), StoreError>;

    /// Drop the endpoint from the set together with both scalar fields.
    async fn remove(&self, endpoint: &Endpoint) -> Result<(), StoreError>;

    /// Read the whole set and the scalar fields of every member.
    async fn load_all(&self) -> Result<Vec<Subscription>, StoreError>;
}

#[derive(Default)]
struct Records {
    members: BTreeSet<Endpoint>,
    keys: HashMap<Endpoint, String>,
    auth_secrets: HashMap<Endpoint, String>,
}

/// In-memory storage for tests and throwaway deployments.
#[derive(Default)]
pub struct InMemoryStore {
    records: Mutex<Records>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store pre-populated with the given subscriptions.
    pub fn with_subscriptions(subscriptions: impl IntoIterator<Item = Subscription>) -> Self {
        let mut records = Records::default();
        for sub in subscriptions {
            records.keys.insert(sub.endpoint.clone(), sub.key);
            records.auth_secrets.insert(sub.endpoint.clone(), sub.auth_secret);
            records.members.insert(sub.endpoint);
        }
        Self {
            records: Mutex::new(records),
        }
    }

    /// Whether any record (set membership or scalar) exists for the endpoint.
    pub async fn contains(&self, endpoint: &Endpoint) -> bool {
        let records = self.records.lock().await;
        records.members.contains(endpoint)
            || records.keys.contains_key(endpoint)
            || records.auth_secrets.contains_key(endpoint)
    }

    pub async fn len(&self) -> usize {
        self.records.lock().await.members.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }
}

#[async_trait]
impl SubscriptionStore for InMemoryStore {
    async fn add(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        let endpoint = subscription.endpoint.clone();
        records.members.insert(endpoint.clone());
        records.keys.insert(endpoint.clone(), subscription.key.clone());
        records
            .auth_secrets
            .insert(endpoint, subscription.auth_secret.clone());
        Ok(())
    }

    async fn remove(&self, endpoint: &Endpoint) -> Result<(), StoreError> {
        let mut records = self.records.lock().await;
        records.members.remove(endpoint);
        records.keys.remove(endpoint);
        records.auth_secrets.remove(endpoint);
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Subscription>, StoreError> {
        let records = self.records.lock().await;
        Ok(records
            .members
            .iter()
            .map(|endpoint| Subscription {
                endpoint: endpoint.clone(),
                key: records.keys.get(endpoint).cloned().unwrap_or_default(),
                auth_secret: records.auth_secrets.get(endpoint).cloned().unwrap_or_default(),
            })
            .collect())
    }
}
