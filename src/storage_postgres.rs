use async_trait::async_trait;
use tokio_postgres::Client;

use crate::error::StoreError;
use crate::storage::SubscriptionStore;
use crate::types::{Endpoint, Subscription};

const BACKEND: &str = "postgres";

/// Postgres-backed subscription store.
///
/// One row per endpoint; the primary key provides the set semantics.
pub struct PostgresStore {
    client: Client,
}

impl PostgresStore {
    pub async fn new(client: Client) -> Result<Self, StoreError> {
        client
            .execute(
                "CREATE TABLE IF NOT EXISTS push_subscriptions (
                    endpoint TEXT PRIMARY KEY,
                    key TEXT NOT NULL DEFAULT '',
                    auth_secret TEXT NOT NULL DEFAULT ''
                )",
                &[],
            )
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, e))?;

        Ok(Self { client })
    }
}

#[async_trait]
impl SubscriptionStore for PostgresStore {
    async fn add(&self, subscription: &Subscription) -> Result<(), StoreError> {
        self.client
            .execute(
                "INSERT INTO push_subscriptions (endpoint, key, auth_secret)
                 VALUES ($1, $2, $3)
                 ON CONFLICT (endpoint) DO UPDATE
                 SET key = EXCLUDED.key, auth_secret = EXCLUDED.auth_secret",
                &[
                    &subscription.endpoint.as_str(),
                    &subscription.key,
                    &subscription.auth_secret,
                ],
            )
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, e))?;
        Ok(())
    }

    async fn remove(&self, endpoint: &Endpoint) -> Result<(), StoreError> {
        self.client
            .execute(
                "DELETE FROM push_subscriptions WHERE endpoint = $1",
                &[&endpoint.as_str()],
            )
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, e))?;
        Ok(())
    }

    async fn load_all(&self) -> Result<Vec<Subscription>, StoreError> {
        let rows = self
            .client
            .query(
                "SELECT endpoint, key, auth_secret FROM push_subscriptions ORDER BY endpoint",
                &[],
            )
            .await
            .map_err(|e| StoreError::unavailable(BACKEND, e))?;

        rows.into_iter()
            .map(|row| {
                let endpoint: String = row.try_get(0).map_err(|e| StoreError::unavailable(BACKEND, e))?;
                let key: String = row.try_get(1).map_err(|e| StoreError::unavailable(BACKEND, e))?;
                let auth_secret: String = row.try_get(2).map_err(|e| StoreError::unavailable(BACKEND, e))?;
                Ok(Subscription::new(endpoint, key, auth_secret))
            })
            .collect()
    }
}
