use async_trait::async_trait;
use redis::AsyncCommands;

use crate::error::StoreError;
use crate::storage::SubscriptionStore;
use crate::types::{Endpoint, Subscription};

const BACKEND: &str = "redis";

/// Redis-backed subscription store.
///
/// Layout: a set holding every endpoint, plus `key-<endpoint>` and
/// `authSecret-<endpoint>` strings. Without a namespace these are exactly
/// the keys earlier deployments wrote, so their data loads unchanged.
pub struct RedisStore {
    client: redis::Client,
    prefix: String,
}

impl RedisStore {
    pub fn new(client: redis::Client) -> Self {
        Self {
            client,
            prefix: String::new(),
        }
    }

    pub fn open(url: &str) -> Result<Self, StoreError> {
        let client = redis::Client::open(url).map_err(|e| StoreError::unavailable(BACKEND, e))?;
        Ok(Self::new(client))
    }

    /// Prefix every key with `<namespace>:`.
    pub fn with_namespace(mut self, namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        self.prefix = if namespace.is_empty() {
            String::new()
        } else {
            format!("{}:", namespace)
        };
        self
    }

    fn set_key(&self) -> String {
        format!("{}subscriptions", self.prefix)
    }

    fn key_field(&self, endpoint: &str) -> String {
        format!("{}key-{}", self.prefix, endpoint)
    }

    fn auth_field(&self, endpoint: &str) -> String {
        format!("{}authSecret-{}", self.prefix, endpoint)
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        self.client
            .get_multiplexed_async_connection()
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, e))
    }
}

#[async_trait]
impl SubscriptionStore for RedisStore {
    async fn add(&self, subscription: &Subscription) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let endpoint = subscription.endpoint.as_str();
        redis::pipe()
            .atomic()
            .sadd(self.set_key(), endpoint)
            .ignore()
            .set(self.key_field(endpoint), &subscription.key)
            .ignore()
            .set(self.auth_field(endpoint), &subscription.auth_secret)
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, e))
    }

    async fn remove(&self, endpoint: &Endpoint) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let endpoint = endpoint.as_str();
        redis::pipe()
            .atomic()
            .srem(self.set_key(), endpoint)
            .ignore()
            .del(self.key_field(endpoint))
            .ignore()
            .del(self.auth_field(endpoint))
            .ignore()
            .query_async::<_, ()>(&mut conn)
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, e))
    }

    async fn load_all(&self) -> Result<Vec<Subscription>, StoreError> {
        let mut conn = self.connection().await?;
        let endpoints: Vec<String> = conn
            .smembers(self.set_key())
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, e))?;

        if endpoints.is_empty() {
            return Ok(Vec::new());
        }

        let mut pipe = redis::pipe();
        for endpoint in &endpoints {
            pipe.get(self.key_field(endpoint)).get(self.auth_field(endpoint));
        }
        let values: Vec<Option<String>> = pipe
            .query_async(&mut conn)
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, e))?;

        let subscriptions = pair_values(endpoints, values);
        tracing::debug!(count = subscriptions.len(), "loaded subscriptions from redis");
        Ok(subscriptions)
    }
}

/// Zip endpoints with the flat `[key, authSecret, key, authSecret, ..]`
/// reply of the load pipeline. Missing strings become empty keys.
fn pair_values(endpoints: Vec<String>, values: Vec<Option<String>>) -> Vec<Subscription> {
    let mut values = values.into_iter();
    endpoints
        .into_iter()
        .map(|endpoint| {
            let key = values.next().flatten().unwrap_or_default();
            let auth_secret = values.next().flatten().unwrap_or_default();
            Subscription::new(endpoint, key, auth_secret)
        })
        .collect()
}
