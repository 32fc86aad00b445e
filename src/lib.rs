//! A web push subscription registry and broadcast engine.
//!
//! Browsers register their push endpoint (plus encryption keys); an operator
//! broadcasts a short text alert to every registered endpoint.
//!
//! ## Guarantees
//! - One subscription per endpoint; re-registering overwrites its keys
//! - Every registry mutation is persisted before it becomes visible
//! - Mutations issued during the startup load apply on top of the loaded state
//! - Exactly one delivery attempt per subscriber per broadcast
//! - Subscribers whose delivery fails are removed from memory and the store
//!
//! ## Non-Guarantees
//! - Retries or backoff for failed deliveries
//! - Delivery receipts
//! - Authentication of registration requests
//! - Multi-tenant partitioning

mod alert;
mod config;
mod delivery;
mod dispatcher;
mod error;
mod registry;
mod storage;
mod types;
mod vapid;

pub mod http;

#[cfg(feature = "redis")]
mod storage_redis;

#[cfg(feature = "postgres")]
mod storage_postgres;

pub use alert::{format_alert, format_alert_at, DEFAULT_ALERT_TEXT};
pub use config::{DispatchConfig, PushConfig, ServerConfig, StoreConfig};
pub use delivery::{classify_status, normalize_key, PushDelivery, WebPushConfig, WebPushDelivery};
pub use dispatcher::{Dispatcher, DispatcherConfig};
pub use error::{ConfigError, FailureReason, RegistryError, StoreError};
pub use registry::{Registry, RegistryConfig};
pub use storage::{InMemoryStore, SubscriptionStore};
pub use types::{BroadcastReport, DeliveryOutcome, Endpoint, Subscription, UnregisterOutcome};
pub use vapid::VapidKeys;

#[cfg(feature = "redis")]
pub use storage_redis::RedisStore;

#[cfg(feature = "postgres")]
pub use storage_postgres::PostgresStore;
