use std::collections::HashSet;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use webpush_dispatcher::{
    Dispatcher, DispatcherConfig, Endpoint, FailureReason, InMemoryStore, PushDelivery, Registry,
    Subscription,
};

/// Records every call; fails for endpoints in `failing` or keys in
/// `failing_keys`, panics for `panicking`.
#[derive(Default)]
struct MockDelivery {
    calls: Mutex<Vec<(String, Vec<u8>)>>,
    failing: HashSet<String>,
    failing_keys: HashSet<String>,
    panicking: HashSet<String>,
    delay: Option<Duration>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl MockDelivery {
    fn failing_for(endpoints: &[&str]) -> Self {
        Self {
            failing: endpoints.iter().map(|e| e.to_string()).collect(),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<(String, Vec<u8>)> {
        self.calls.lock().unwrap().clone()
    }
}

#[async_trait]
impl PushDelivery for MockDelivery {
    async fn deliver(&self, subscription: &Subscription, payload: &[u8]) -> Result<(), FailureReason> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);

        self.calls
            .lock()
            .unwrap()
            .push((subscription.endpoint.to_string(), payload.to_vec()));

        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.in_flight.fetch_sub(1, Ordering::SeqCst);

        let endpoint = subscription.endpoint.as_str();
        if self.panicking.contains(endpoint) {
            panic!("delivery blew up");
        }
        if self.failing.contains(endpoint) || self.failing_keys.contains(&subscription.key) {
            return Err(FailureReason::Gone);
        }
        Ok(())
    }
}

async fn setup(
    subs: &[(&str, &str, &str)],
    delivery: Arc<MockDelivery>,
    config: DispatcherConfig,
) -> (Dispatcher, Arc<InMemoryStore>) {
    let store = Arc::new(InMemoryStore::new());
    let (registry, _task) = Registry::spawn(store.clone());
    for (endpoint, key, secret) in subs {
        registry.register(*endpoint, *key, *secret).await.unwrap();
    }
    (Dispatcher::new(registry, delivery, config), store)
}

#[tokio::test]
async fn failed_endpoint_is_pruned_after_broadcast() {
    let delivery = Arc::new(MockDelivery::failing_for(&["A"]));
    let (dispatcher, store) = setup(
        &[("A", "k1", "s1"), ("B", "k2", "s2")],
        delivery.clone(),
        DispatcherConfig::default(),
    )
    .await;

    let report = dispatcher.broadcast("Hi").await.unwrap();

    assert_eq!(report.attempted, 2);
    assert_eq!(report.delivered, 1);
    assert_eq!(report.failed, vec![(Endpoint::from("A"), FailureReason::Gone)]);
    assert_eq!(report.pruned, 1);

    let remaining = dispatcher.registry().list().await.unwrap();
    assert_eq!(remaining.as_slice(), &[Subscription::new("B", "k2", "s2")]);
    assert!(!store.contains(&Endpoint::from("A")).await);
    assert!(store.contains(&Endpoint::from("B")).await);
}

#[tokio::test]
async fn delivers_exactly_once_per_subscriber() {
    let delivery = Arc::new(MockDelivery::default());
    let subs: Vec<(String, String, String)> = (0..5)
        .map(|i| (format!("https://push/{}", i), format!("k{}", i), format!("s{}", i)))
        .collect();
    let borrowed: Vec<(&str, &str, &str)> = subs
        .iter()
        .map(|(e, k, s)| (e.as_str(), k.as_str(), s.as_str()))
        .collect();
    let (dispatcher, _store) = setup(&borrowed, delivery.clone(), DispatcherConfig::default()).await;

    let report = dispatcher.broadcast("payload").await.unwrap();
    assert_eq!(report.attempted, 5);
    assert_eq!(report.delivered, 5);
    assert!(report.failed.is_empty());

    let calls = delivery.calls();
    assert_eq!(calls.len(), 5);
    let distinct: HashSet<&str> = calls.iter().map(|(e, _)| e.as_str()).collect();
    assert_eq!(distinct.len(), 5);
    assert!(calls.iter().all(|(_, body)| body == b"payload"));
    assert_eq!(dispatcher.registry().list().await.unwrap().len(), 5);
}

#[tokio::test]
async fn empty_registry_broadcast_is_a_noop() {
    let delivery = Arc::new(MockDelivery::default());
    let (dispatcher, _store) = setup(&[], delivery.clone(), DispatcherConfig::default()).await;

    let report = dispatcher.broadcast("nobody listens").await.unwrap();
    assert_eq!(report.attempted, 0);
    assert!(delivery.calls().is_empty());
}

#[tokio::test]
async fn send_alert_formats_default_text() {
    let delivery = Arc::new(MockDelivery::default());
    let config = DispatcherConfig {
        default_message: "Default!".to_string(),
        ..Default::default()
    };
    let (dispatcher, _store) = setup(&[("A", "k", "s")], delivery.clone(), config).await;

    dispatcher.send_alert(None).await.unwrap();
    dispatcher.send_alert(Some("Doors open")).await.unwrap();

    let calls = delivery.calls();
    let first = String::from_utf8(calls[0].1.clone()).unwrap();
    let second = String::from_utf8(calls[1].1.clone()).unwrap();
    assert!(first.starts_with('[') && first.ends_with("] Default!"), "{}", first);
    assert!(second.ends_with("] Doors open"), "{}", second);
    // "[HH:MM:SS] " prefix
    assert_eq!(&second[9..11], "] ");
}

#[tokio::test]
async fn panicking_delivery_does_not_affect_others() {
    let delivery = Arc::new(MockDelivery {
        panicking: ["boom".to_string()].into_iter().collect(),
        ..Default::default()
    });
    let (dispatcher, _store) = setup(
        &[("boom", "k", "s"), ("ok-1", "k", "s"), ("ok-2", "k", "s")],
        delivery.clone(),
        DispatcherConfig::default(),
    )
    .await;

    let report = dispatcher.broadcast("x").await.unwrap();
    assert_eq!(report.attempted, 3);
    assert_eq!(report.delivered, 2);
    assert_eq!(report.failed, vec![(Endpoint::from("boom"), FailureReason::Aborted)]);
}

#[tokio::test]
async fn in_flight_limit_is_respected() {
    let delivery = Arc::new(MockDelivery {
        delay: Some(Duration::from_millis(10)),
        ..Default::default()
    });
    let config = DispatcherConfig {
        max_in_flight: 2,
        ..Default::default()
    };
    let (dispatcher, _store) = setup(
        &[("a", "", ""), ("b", "", ""), ("c", "", ""), ("d", "", ""), ("e", "", "")],
        delivery.clone(),
        config,
    )
    .await;

    let report = dispatcher.broadcast("x").await.unwrap();
    assert_eq!(report.delivered, 5);
    assert!(delivery.max_in_flight.load(Ordering::SeqCst) <= 2);
}

#[tokio::test]
async fn broadcast_uses_snapshot_taken_at_call_time() {
    let delivery = Arc::new(MockDelivery {
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let (dispatcher, _store) = setup(&[("early", "k", "s")], delivery.clone(), DispatcherConfig::default()).await;
    let dispatcher = Arc::new(dispatcher);

    let running = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.broadcast("x").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    dispatcher.registry().register("late", "k", "s").await.unwrap();

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.attempted, 1);
    assert_eq!(delivery.calls()[0].0, "early");
    assert_eq!(dispatcher.registry().list().await.unwrap().len(), 2);
}

#[tokio::test]
async fn re_registration_during_broadcast_survives_failure_of_old_keys() {
    let delivery = Arc::new(MockDelivery {
        failing_keys: ["old".to_string()].into_iter().collect(),
        delay: Some(Duration::from_millis(50)),
        ..Default::default()
    });
    let (dispatcher, store) = setup(&[("A", "old", "s")], delivery.clone(), DispatcherConfig::default()).await;
    let dispatcher = Arc::new(dispatcher);

    let running = {
        let dispatcher = Arc::clone(&dispatcher);
        tokio::spawn(async move { dispatcher.broadcast("x").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    dispatcher.registry().register("A", "new", "s2").await.unwrap();

    let report = running.await.unwrap().unwrap();
    assert_eq!(report.failed, vec![(Endpoint::from("A"), FailureReason::Gone)]);
    assert_eq!(report.pruned, 0);

    let remaining = dispatcher.registry().list().await.unwrap();
    assert_eq!(remaining.as_slice(), &[Subscription::new("A", "new", "s2")]);
    assert!(store.contains(&Endpoint::from("A")).await);
}
