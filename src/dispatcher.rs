use std::collections::HashSet;
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::{JoinHandle, JoinSet};
use tracing::{error, info, warn};

use crate::alert::{format_alert, DEFAULT_ALERT_TEXT};
use crate::delivery::PushDelivery;
use crate::error::{FailureReason, RegistryError};
use crate::registry::Registry;
use crate::types::{BroadcastReport, DeliveryOutcome, Endpoint, Subscription, UnregisterOutcome};

#[cfg(feature = "metrics")]
fn metric_inc(name: &'static str) {
    metrics::increment_counter!(name);
}

#[cfg(not(feature = "metrics"))]
fn metric_inc(_name: &'static str) {}

#[derive(Debug, Clone)]
pub struct DispatcherConfig {
    /// Upper bound on concurrently running delivery requests.
    pub max_in_flight: usize,

    /// Alert text used when the operator sends none.
    pub default_message: String,
}

impl Default for DispatcherConfig {
    fn default() -> Self {
        Self {
            max_in_flight: 100,
            default_message: DEFAULT_ALERT_TEXT.to_string(),
        }
    }
}

/// Fans a payload out to every registered subscriber.
///
/// Each broadcast makes exactly one delivery attempt per subscriber in the
/// snapshot. Attempts run concurrently as independent tasks; a failing or
/// panicking delivery never affects the others. A failed subscriber is
/// unregistered unless it re-registered with new keys in the meantime.
pub struct Dispatcher {
    registry: Registry,
    delivery: Arc<dyn PushDelivery>,
    permits: Arc<Semaphore>,
    config: DispatcherConfig,
}

struct SubscriberResult {
    endpoint: Endpoint,
    outcome: DeliveryOutcome,
    pruned: bool,
}

impl Dispatcher {
    pub fn new(registry: Registry, delivery: Arc<dyn PushDelivery>, config: DispatcherConfig) -> Self {
        let permits = Arc::new(Semaphore::new(config.max_in_flight.max(1)));
        Self {
            registry,
            delivery,
            permits,
            config,
        }
    }

    pub fn registry(&self) -> &Registry {
        &self.registry
    }

    /// Format operator text and broadcast it.
    pub async fn send_alert(&self, text: Option<&str>) -> Result<BroadcastReport, RegistryError> {
        let payload = format_alert(text, &self.config.default_message);
        self.broadcast(payload).await
    }

    /// Run `send_alert` in the background and return immediately.
    pub fn spawn_alert(self: &Arc<Self>, text: Option<String>) -> JoinHandle<()> {
        let dispatcher = Arc::clone(self);
        tokio::spawn(async move {
            match dispatcher.send_alert(text.as_deref()).await {
                Ok(report) => info!(
                    attempted = report.attempted,
                    delivered = report.delivered,
                    failed = report.failed.len(),
                    pruned = report.pruned,
                    "broadcast finished"
                ),
                Err(err) => error!(error = %err, "broadcast could not start"),
            }
        })
    }

    /// Deliver `payload` to every subscriber present right now.
    ///
    /// Resolves once every delivery task has finished and failed subscribers
    /// have been unregistered.
    pub async fn broadcast(&self, payload: impl Into<String>) -> Result<BroadcastReport, RegistryError> {
        let payload: Arc<str> = Arc::from(payload.into());
        let subscribers = self.registry.list().await?;

        info!(count = subscribers.len(), message = %payload, "sending notifications");
        metric_inc("push.broadcast.started");

        let mut tasks = JoinSet::new();
        let mut spawned = Vec::with_capacity(subscribers.len());
        for subscription in subscribers.iter().cloned() {
            spawned.push(subscription.endpoint.clone());
            tasks.spawn(deliver_one(
                subscription,
                Arc::clone(&payload),
                Arc::clone(&self.delivery),
                Arc::clone(&self.permits),
                self.registry.clone(),
            ));
        }

        let mut report = BroadcastReport {
            attempted: subscribers.len(),
            ..Default::default()
        };
        let mut finished = HashSet::with_capacity(spawned.len());

        while let Some(joined) = tasks.join_next().await {
            match joined {
                Ok(result) => {
                    finished.insert(result.endpoint.clone());
                    match result.outcome {
                        DeliveryOutcome::Delivered => report.delivered += 1,
                        DeliveryOutcome::Failed(reason) => report.failed.push((result.endpoint, reason)),
                    }
                    if result.pruned {
                        report.pruned += 1;
                    }
                }
                Err(err) => error!(error = %err, "delivery task aborted"),
            }
        }

        // Tasks that panicked never reported; account for them as failures.
        for endpoint in spawned {
            if !finished.contains(&endpoint) {
                report.failed.push((endpoint, FailureReason::Aborted));
            }
        }

        Ok(report)
    }
}

async fn deliver_one(
    subscription: Subscription,
    payload: Arc<str>,
    delivery: Arc<dyn PushDelivery>,
    permits: Arc<Semaphore>,
    registry: Registry,
) -> SubscriberResult {
    let result = {
        // The semaphore is never closed.
        let _permit = permits.acquire_owned().await.ok();
        delivery.deliver(&subscription, payload.as_bytes()).await
    };

    let endpoint = subscription.endpoint.clone();
    match result {
        Ok(()) => {
            info!(endpoint = %endpoint, "notification sent");
            metric_inc("push.delivery.success");
            SubscriberResult {
                endpoint,
                outcome: DeliveryOutcome::Delivered,
                pruned: false,
            }
        }
        Err(reason) => {
            warn!(endpoint = %endpoint, reason = %reason, "delivery failed, removing endpoint");
            metric_inc("push.delivery.failure");
            let pruned = match registry.prune(subscription).await {
                Ok(UnregisterOutcome::Removed) => true,
                Ok(UnregisterOutcome::NotFound) => false,
                Err(err) => {
                    error!(endpoint = %endpoint, error = %err, "failed to remove dead endpoint");
                    false
                }
            };
            SubscriberResult {
                endpoint,
                outcome: DeliveryOutcome::Failed(reason),
                pruned,
            }
        }
    }
}
