use std::collections::BTreeMap;
use std::sync::Arc;

use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use crate::error::RegistryError;
use crate::storage::SubscriptionStore;
use crate::types::{Endpoint, Subscription, UnregisterOutcome};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[derive(Debug, Clone)]
pub struct RegistryConfig {
    /// Capacity of the mutation queue. Callers wait when it is full.
    pub queue_size: usize,
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self { queue_size: 1_024 }
    }
}

/// Published view of the subscriber set.
#[derive(Debug, Clone)]
enum Snapshot {
    Loading,
    Ready(Arc<Vec<Subscription>>),
    Failed(String),
}

enum Command {
    Register {
        subscription: Subscription,
        reply: oneshot::Sender<Result<(), RegistryError>>,
    },
    Unregister {
        endpoint: Endpoint,
        reply: oneshot::Sender<Result<UnregisterOutcome, RegistryError>>,
    },
    Prune {
        subscription: Subscription,
        reply: oneshot::Sender<Result<UnregisterOutcome, RegistryError>>,
    },
}

/// Handle to the subscription registry.
///
/// A single background task owns the subscriber map. It first loads the
/// store, then applies mutations strictly in the order they were queued, so
/// calls issued before the load finished act on the loaded state. Every
/// mutation is written to the store before memory changes.
///
/// Handles are cheap to clone. The task stops once every handle is dropped.
#[derive(Clone)]
pub struct Registry {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<Snapshot>,
}

impl Registry {
    /// Start the registry task and begin loading from `store`.
    pub fn spawn(store: Arc<dyn SubscriptionStore>) -> (Self, JoinHandle<()>) {
        Self::spawn_with_config(store, RegistryConfig::default())
    }

    pub fn spawn_with_config(
        store: Arc<dyn SubscriptionStore>,
        config: RegistryConfig,
    ) -> (Self, JoinHandle<()>) {
        let (commands, rx) = mpsc::channel(config.queue_size.max(1));
        let (snapshot_tx, snapshot) = watch::channel(Snapshot::Loading);
        let handle = tokio::spawn(registry_loop(store, rx, snapshot_tx));
        (Self { commands, snapshot }, handle)
    }

    /// Wait for the initial load and return the number of loaded subscribers.
    pub async fn ready(&self) -> Result<usize, RegistryError> {
        self.list().await.map(|subs| subs.len())
    }

    /// Insert or update a subscription.
    pub async fn register(
        &self,
        endpoint: impl Into<Endpoint>,
        key: impl Into<String>,
        auth_secret: impl Into<String>,
    ) -> Result<(), RegistryError> {
        let subscription = Subscription::new(endpoint, key, auth_secret);
        if subscription.endpoint.as_str().is_empty() {
            return Err(RegistryError::InvalidSubscription("endpoint is empty".into()));
        }

        let (reply, rx) = oneshot::channel();
        self.send(Command::Register { subscription, reply }).await?;
        rx.await.map_err(|_| RegistryError::Closed)?
    }

    /// Remove a subscription. Unknown endpoints are not an error.
    pub async fn unregister(
        &self,
        endpoint: impl Into<Endpoint>,
    ) -> Result<UnregisterOutcome, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Unregister {
            endpoint: endpoint.into(),
            reply,
        })
        .await?;
        rx.await.map_err(|_| RegistryError::Closed)?
    }

    /// Remove `subscription` only if the registry still holds exactly these
    /// keys for its endpoint. A re-registration with new keys survives.
    pub async fn prune(&self, subscription: Subscription) -> Result<UnregisterOutcome, RegistryError> {
        let (reply, rx) = oneshot::channel();
        self.send(Command::Prune { subscription, reply }).await?;
        rx.await.map_err(|_| RegistryError::Closed)?
    }

    /// Point-in-time snapshot of every subscription, ordered by endpoint.
    ///
    /// Waits for the initial load. Later mutations never alter a snapshot
    /// already handed out.
    pub async fn list(&self) -> Result<Arc<Vec<Subscription>>, RegistryError> {
        let mut rx = self.snapshot.clone();
        let current = rx
            .wait_for(|s| !matches!(s, Snapshot::Loading))
            .await
            .map_err(|_| RegistryError::Closed)?
            .clone();

        match current {
            Snapshot::Ready(subs) => Ok(subs),
            Snapshot::Failed(reason) => Err(RegistryError::StoreUnavailable(reason)),
            Snapshot::Loading => Err(RegistryError::Closed),
        }
    }

    async fn send(&self, command: Command) -> Result<(), RegistryError> {
        self.commands
            .send(command)
            .await
            .map_err(|_| RegistryError::Closed)
    }
}

async fn registry_loop(
    store: Arc<dyn SubscriptionStore>,
    mut rx: mpsc::Receiver<Command>,
    snapshot_tx: watch::Sender<Snapshot>,
) {
    let mut subscriptions = match store.load_all().await {
        Ok(loaded) => {
            let map: BTreeMap<Endpoint, Subscription> = loaded
                .into_iter()
                .map(|sub| (sub.endpoint.clone(), sub))
                .collect();
            info!(count = map.len(), "subscriptions loaded");
            publish(&snapshot_tx, &map);
            map
        }
        Err(err) => {
            error!(error = %err, "failed to load subscriptions");
            metric_inc("push.registry.load_failed");
            let reason = err.to_string();
            snapshot_tx.send_replace(Snapshot::Failed(reason.clone()));
            reject_all(rx, reason).await;
            return;
        }
    };

    while let Some(command) = rx.recv().await {
        match command {
            Command::Register { subscription, reply } => {
                let result = apply_register(store.as_ref(), &mut subscriptions, subscription).await;
                if result.is_ok() {
                    publish(&snapshot_tx, &subscriptions);
                }
                let _ = reply.send(result);
            }
            Command::Unregister { endpoint, reply } => {
                let result = apply_unregister(store.as_ref(), &mut subscriptions, &endpoint).await;
                if matches!(result, Ok(UnregisterOutcome::Removed)) {
                    publish(&snapshot_tx, &subscriptions);
                }
                let _ = reply.send(result);
            }
            Command::Prune { subscription, reply } => {
                let result = if subscriptions.get(&subscription.endpoint) == Some(&subscription) {
                    apply_unregister(store.as_ref(), &mut subscriptions, &subscription.endpoint).await
                } else {
                    debug!(endpoint = %subscription.endpoint, "keys changed since broadcast, keeping");
                    Ok(UnregisterOutcome::NotFound)
                };
                if matches!(result, Ok(UnregisterOutcome::Removed)) {
                    publish(&snapshot_tx, &subscriptions);
                }
                let _ = reply.send(result);
            }
        }
    }

    debug!("registry task stopped");
}

async fn apply_register(
    store: &dyn SubscriptionStore,
    subscriptions: &mut BTreeMap<Endpoint, Subscription>,
    subscription: Subscription,
) -> Result<(), RegistryError> {
    if let Err(err) = store.add(&subscription).await {
        error!(endpoint = %subscription.endpoint, error = %err, "failed to persist subscription");
        metric_inc("push.registry.store_error");
        return Err(err.into());
    }

    let endpoint = subscription.endpoint.clone();
    match subscriptions.insert(endpoint.clone(), subscription) {
        Some(_) => {
            info!(endpoint = %endpoint, "subscription updated");
            metric_inc("push.registry.updated");
        }
        None => {
            info!(endpoint = %endpoint, "subscription registered");
            metric_inc("push.registry.registered");
        }
    }
    Ok(())
}

async fn apply_unregister(
    store: &dyn SubscriptionStore,
    subscriptions: &mut BTreeMap<Endpoint, Subscription>,
    endpoint: &Endpoint,
) -> Result<UnregisterOutcome, RegistryError> {
    if !subscriptions.contains_key(endpoint) {
        debug!(endpoint = %endpoint, "unregister for unknown endpoint");
        return Ok(UnregisterOutcome::NotFound);
    }

    if let Err(err) = store.remove(endpoint).await {
        error!(endpoint = %endpoint, error = %err, "failed to remove subscription from store");
        metric_inc("push.registry.store_error");
        return Err(err.into());
    }

    subscriptions.remove(endpoint);
    info!(endpoint = %endpoint, "subscription unregistered");
    metric_inc("push.registry.unregistered");
    Ok(UnregisterOutcome::Removed)
}

fn publish(snapshot_tx: &watch::Sender<Snapshot>, subscriptions: &BTreeMap<Endpoint, Subscription>) {
    let snapshot: Vec<Subscription> = subscriptions.values().cloned().collect();
    snapshot_tx.send_replace(Snapshot::Ready(Arc::new(snapshot)));
}

/// After a failed load, answer every queued and future command with the
/// load error until all handles are gone.
async fn reject_all(mut rx: mpsc::Receiver<Command>, reason: String) {
    while let Some(command) = rx.recv().await {
        match command {
            Command::Register { reply, .. } => {
                let _ = reply.send(Err(RegistryError::StoreUnavailable(reason.clone())));
            }
            Command::Unregister { reply, .. } | Command::Prune { reply, .. } => {
                let _ = reply.send(Err(RegistryError::StoreUnavailable(reason.clone())));
            }
        }
    }
}
