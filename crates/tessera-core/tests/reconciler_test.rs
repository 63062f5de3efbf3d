//! Integration tests for the topology reconciler

use std::{
    collections::{HashMap, HashSet},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use metrics::{
    Counter, Gauge, GaugeFn, Histogram, Key, KeyName, Metadata, Recorder, SharedString, Unit,
};
use parking_lot::Mutex;
use tessera_core::{
    Address, ClusterError, ClusterMembership, ConnectionState, Connector, HealthSink,
    NodeHealthCheck, PeerConnection, PeerDirectory, ReconcilerConfig, RefreshOutcome,
    TopologyReconciler,
};
use tonic::transport::{Channel, Endpoint};

#[derive(Default)]
struct MockMembership {
    peers: Mutex<Vec<Address>>,
    registered: Mutex<Vec<Address>>,
    fail_query: Mutex<Option<String>>,
    queries: AtomicUsize,
}

impl MockMembership {
    fn set_peers(&self, peers: &[&str]) {
        *self.peers.lock() = peers.iter().map(|p| p.parse().unwrap()).collect();
    }

    fn fail_with(&self, reason: Option<&str>) {
        *self.fail_query.lock() = reason.map(str::to_string);
    }
}

#[async_trait]
impl ClusterMembership for MockMembership {
    async fn query_peers(&self) -> Result<Vec<Address>, ClusterError> {
        self.queries.fetch_add(1, Ordering::SeqCst);
        if let Some(reason) = self.fail_query.lock().clone() {
            return Err(ClusterError::Query(reason));
        }
        Ok(self.peers.lock().clone())
    }

    async fn register_self(&self, address: &Address) -> Result<(), ClusterError> {
        self.registered.lock().push(address.clone());
        Ok(())
    }
}

#[derive(Default)]
struct RecordingHealthSink {
    events: Mutex<Vec<String>>,
}

impl RecordingHealthSink {
    fn last(&self) -> Option<String> {
        self.events.lock().last().cloned()
    }
}

impl HealthSink for RecordingHealthSink {
    fn healthy(&self) {
        self.events.lock().push("healthy".to_string());
    }

    fn unhealthy(&self, reason: &str) {
        self.events.lock().push(format!("unhealthy: {reason}"));
    }
}

/// Hands out lazy channels, so no server is needed. Hosts in `refuse` fail;
/// with `hang` set, connects never complete.
#[derive(Default)]
struct CountingConnector {
    connects: Mutex<Vec<String>>,
    refuse: Mutex<HashSet<String>>,
    hang: AtomicBool,
}

impl CountingConnector {
    fn count(&self) -> usize {
        self.connects.lock().len()
    }
}

#[async_trait]
impl Connector for CountingConnector {
    async fn connect(&self, address: &Address) -> Result<Channel, ClusterError> {
        self.connects.lock().push(address.to_string());
        if self.hang.load(Ordering::SeqCst) {
            futures::future::pending::<()>().await;
        }
        if self.refuse.lock().contains(address.host()) {
            return Err(ClusterError::Connect {
                address: address.to_string(),
                source: "connection refused".into(),
            });
        }
        let endpoint = Endpoint::from_shared(format!("http://{address}"))
            .map_err(|_| ClusterError::InvalidAddress(address.to_string()))?;
        Ok(endpoint.connect_lazy())
    }
}

struct Fixture {
    membership: Arc<MockMembership>,
    connector: Arc<CountingConnector>,
    health: Arc<RecordingHealthSink>,
    directory: Arc<PeerDirectory>,
    reconciler: Arc<TopologyReconciler>,
}

/// Keeps the last value set on every gauge.
#[derive(Default)]
struct GaugeRecorder {
    gauges: Arc<Mutex<HashMap<String, f64>>>,
}

impl GaugeRecorder {
    fn value(&self, name: &str) -> Option<f64> {
        self.gauges.lock().get(name).copied()
    }
}

struct RecordedGauge {
    name: String,
    gauges: Arc<Mutex<HashMap<String, f64>>>,
}

impl GaugeFn for RecordedGauge {
    fn increment(&self, value: f64) {
        *self.gauges.lock().entry(self.name.clone()).or_default() += value;
    }

    fn decrement(&self, value: f64) {
        *self.gauges.lock().entry(self.name.clone()).or_default() -= value;
    }

    fn set(&self, value: f64) {
        self.gauges.lock().insert(self.name.clone(), value);
    }
}

impl Recorder for GaugeRecorder {
    fn describe_counter(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn describe_gauge(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn describe_histogram(&self, _: KeyName, _: Option<Unit>, _: SharedString) {}

    fn register_counter(&self, _: &Key, _: &Metadata<'_>) -> Counter {
        Counter::noop()
    }

    fn register_gauge(&self, key: &Key, _: &Metadata<'_>) -> Gauge {
        Gauge::from_arc(Arc::new(RecordedGauge {
            name: key.name().to_string(),
            gauges: self.gauges.clone(),
        }))
    }

    fn register_histogram(&self, _: &Key, _: &Metadata<'_>) -> Histogram {
        Histogram::noop()
    }
}

fn fixture(config: ReconcilerConfig) -> Fixture {
    fixture_with_check(config, NodeHealthCheck::default())
}

fn fixture_with_check(config: ReconcilerConfig, health_check: NodeHealthCheck) -> Fixture {
    let membership = Arc::new(MockMembership::default());
    let connector = Arc::new(CountingConnector::default());
    let health = Arc::new(RecordingHealthSink::default());
    let directory = Arc::new(PeerDirectory::new());
    let reconciler = Arc::new(
        TopologyReconciler::new(
            config,
            membership.clone(),
            connector.clone(),
            directory.clone(),
            health.clone(),
        )
        .with_health_check(Box::new(health_check)),
    );
    Fixture {
        membership,
        connector,
        health,
        directory,
        reconciler,
    }
}

fn rendered(peers: &[Arc<PeerConnection>]) -> Vec<String> {
    peers
        .iter()
        .map(|p| {
            let kind = if p.is_self() { "Self" } else { "Remote" };
            format!("{kind}({})", p.address())
        })
        .collect()
}

fn find(peers: &[Arc<PeerConnection>], address: &str) -> Arc<PeerConnection> {
    peers
        .iter()
        .find(|p| p.address().to_string() == address)
        .cloned()
        .unwrap()
}

#[tokio::test]
async fn test_end_to_end_register_and_refresh() {
    let f = fixture(ReconcilerConfig::default());
    f.reconciler
        .register_remote(Address::new("10.0.0.1", 11800))
        .await
        .unwrap();
    f.membership.set_peers(&["10.0.0.2:11800", "10.0.0.1:11800"]);

    f.reconciler.refresh().await;

    let peers = f.directory.snapshot();
    assert_eq!(
        rendered(&peers),
        vec!["Self(10.0.0.1:11800)", "Remote(10.0.0.2:11800)"]
    );
    assert_eq!(peers[1].state(), ConnectionState::Connected);
    assert!(peers[0].channel().is_none());
    assert_eq!(f.connector.count(), 1);
    assert_eq!(f.health.last().as_deref(), Some("healthy"));
}

#[tokio::test]
async fn test_unchanged_membership_keeps_instances() {
    let f = fixture(ReconcilerConfig::default());
    f.membership
        .set_peers(&["10.0.0.2:11800", "10.0.0.3:11800"]);

    f.reconciler.try_refresh().await.unwrap();
    let first = f.directory.snapshot();

    // Same set, different backend order
    f.membership
        .set_peers(&["10.0.0.3:11800", "10.0.0.2:11800"]);
    let outcome = f.reconciler.try_refresh().await.unwrap();
    let second = f.directory.snapshot();

    assert_eq!(outcome, RefreshOutcome::Unchanged);
    assert!(Arc::ptr_eq(&first, &second));
    for (a, b) in first.iter().zip(second.iter()) {
        assert!(Arc::ptr_eq(a, b));
    }
    assert_eq!(f.connector.count(), 2);
}

#[tokio::test]
async fn test_diff_keeps_closes_and_creates() {
    let f = fixture(ReconcilerConfig::default());
    f.membership
        .set_peers(&["10.0.0.1:11800", "10.0.0.2:11800", "10.0.0.3:11800"]);
    f.reconciler.try_refresh().await.unwrap();
    let before = f.directory.snapshot();
    let a = find(&before, "10.0.0.1:11800");
    let b = find(&before, "10.0.0.2:11800");
    let c = find(&before, "10.0.0.3:11800");

    f.membership
        .set_peers(&["10.0.0.2:11800", "10.0.0.3:11800", "10.0.0.4:11800"]);
    let outcome = f.reconciler.try_refresh().await.unwrap();
    let after = f.directory.snapshot();

    assert_eq!(
        outcome,
        RefreshOutcome::Rebuilt {
            created: 1,
            kept: 2,
            closed: 1
        }
    );
    assert_eq!(a.state(), ConnectionState::Closed);
    assert!(Arc::ptr_eq(&b, &find(&after, "10.0.0.2:11800")));
    assert!(Arc::ptr_eq(&c, &find(&after, "10.0.0.3:11800")));
    assert_eq!(
        find(&after, "10.0.0.4:11800").state(),
        ConnectionState::Connected
    );
    assert_eq!(f.connector.count(), 4);
}

#[tokio::test]
async fn test_duplicate_registrations_collapse() {
    let f = fixture(ReconcilerConfig::default());
    f.membership
        .set_peers(&["10.0.0.2:11800", "10.0.0.2:11800", "10.0.0.3:11800"]);

    f.reconciler.try_refresh().await.unwrap();

    assert_eq!(
        rendered(&f.directory.snapshot()),
        vec!["Remote(10.0.0.2:11800)", "Remote(10.0.0.3:11800)"]
    );
    assert_eq!(f.connector.count(), 2);
}

#[tokio::test]
async fn test_self_is_never_connected_or_closed() {
    let f = fixture(ReconcilerConfig::default());
    f.reconciler
        .register_remote(Address::new("10.0.0.1", 11800))
        .await
        .unwrap();
    f.membership.set_peers(&["10.0.0.1:11800"]);
    f.reconciler.try_refresh().await.unwrap();
    let local = find(&f.directory.snapshot(), "10.0.0.1:11800");
    assert!(local.is_self());

    // Self drops out of the membership
    f.membership.set_peers(&["10.0.0.2:11800"]);
    f.reconciler.refresh().await;

    assert_eq!(local.state(), ConnectionState::Connected);
    assert_eq!(
        f.connector.connects.lock().clone(),
        vec!["10.0.0.2:11800".to_string()]
    );
    assert_eq!(
        f.health.last().as_deref(),
        Some("unhealthy: can't find this node in the cluster")
    );
}

#[tokio::test]
async fn test_order_is_independent_of_query_order() {
    let one = fixture(ReconcilerConfig::default());
    let two = fixture(ReconcilerConfig::default());
    one.membership
        .set_peers(&["10.0.0.3:1", "10.0.0.1:2", "10.0.0.1:1", "10.0.0.2:9"]);
    two.membership
        .set_peers(&["10.0.0.1:1", "10.0.0.2:9", "10.0.0.1:2", "10.0.0.3:1"]);

    one.reconciler.try_refresh().await.unwrap();
    two.reconciler.try_refresh().await.unwrap();

    assert_eq!(one.directory.addresses(), two.directory.addresses());
    assert_eq!(
        rendered(&one.directory.snapshot()),
        vec![
            "Remote(10.0.0.1:1)",
            "Remote(10.0.0.1:2)",
            "Remote(10.0.0.2:9)",
            "Remote(10.0.0.3:1)"
        ]
    );
}

#[tokio::test]
async fn test_query_failure_keeps_last_known_list() {
    let f = fixture(ReconcilerConfig::default());
    f.membership.set_peers(&["10.0.0.2:11800"]);
    f.reconciler.refresh().await;
    let before = f.directory.snapshot();

    f.membership.fail_with(Some("backend unavailable"));
    f.reconciler.refresh().await;

    assert!(Arc::ptr_eq(&before, &f.directory.snapshot()));
    assert_eq!(
        f.health.last().as_deref(),
        Some("unhealthy: failed to query cluster nodes: backend unavailable")
    );

    // Next run recovers
    f.membership.fail_with(None);
    assert_eq!(
        f.reconciler.try_refresh().await.unwrap(),
        RefreshOutcome::Unchanged
    );
}

#[tokio::test]
async fn test_failed_connect_is_retried() {
    let f = fixture(ReconcilerConfig::default());
    f.connector.refuse.lock().insert("10.0.0.2".to_string());
    f.membership.set_peers(&["10.0.0.2:11800"]);

    f.reconciler.try_refresh().await.unwrap();
    let peer = find(&f.directory.snapshot(), "10.0.0.2:11800");
    assert_eq!(peer.state(), ConnectionState::Created);

    f.connector.refuse.lock().clear();
    let outcome = f.reconciler.try_refresh().await.unwrap();

    assert_eq!(outcome, RefreshOutcome::Unchanged);
    assert_eq!(peer.state(), ConnectionState::Connected);
    assert_eq!(f.connector.count(), 2);
}

#[tokio::test]
async fn test_internal_address_is_registered() {
    let f = fixture(ReconcilerConfig {
        internal_address: Some(Address::new("tessera-0.internal", 11801)),
        ..Default::default()
    });

    f.reconciler
        .register_remote(Address::new("10.0.0.1", 11800))
        .await
        .unwrap();

    let registered = f.membership.registered.lock().clone();
    assert_eq!(registered.len(), 1);
    assert_eq!(registered[0].to_string(), "tessera-0.internal:11801");
    assert!(registered[0].is_internal());
    assert_eq!(
        f.reconciler.self_address().map(|a| a.to_string()).as_deref(),
        Some("tessera-0.internal:11801")
    );
    assert_eq!(f.health.last().as_deref(), Some("healthy"));

    f.membership.set_peers(&["tessera-0.internal:11801"]);
    f.reconciler.try_refresh().await.unwrap();
    assert!(f.directory.snapshot()[0].is_self());
}

#[tokio::test]
async fn test_self_flip_replaces_connection() {
    let f = fixture(ReconcilerConfig::default());
    f.membership.set_peers(&["10.0.0.1:11800"]);
    f.reconciler.try_refresh().await.unwrap();
    let remote = find(&f.directory.snapshot(), "10.0.0.1:11800");
    assert!(!remote.is_self());

    f.reconciler
        .register_remote(Address::new("10.0.0.1", 11800))
        .await
        .unwrap();
    let outcome = f.reconciler.try_refresh().await.unwrap();

    assert_eq!(
        outcome,
        RefreshOutcome::Rebuilt {
            created: 1,
            kept: 0,
            closed: 1
        }
    );
    assert_eq!(remote.state(), ConnectionState::Closed);
    assert!(f.directory.snapshot()[0].is_self());
}

#[tokio::test(start_paused = true)]
async fn test_task_runs_immediately_then_periodically() {
    let f = fixture(ReconcilerConfig {
        refresh_interval: Duration::from_secs(5),
        ..Default::default()
    });
    f.membership.set_peers(&["10.0.0.2:11800"]);

    let task = f.reconciler.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(f.membership.queries.load(Ordering::SeqCst), 1);
    assert_eq!(f.directory.len(), 1);

    tokio::time::sleep(Duration::from_secs(5)).await;
    assert_eq!(f.membership.queries.load(Ordering::SeqCst), 2);

    task.stop().await;
    tokio::time::sleep(Duration::from_secs(20)).await;
    assert_eq!(f.membership.queries.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_unregistered_node_needs_no_self_entry() {
    let f = fixture_with_check(ReconcilerConfig::default(), NodeHealthCheck::new(false));
    f.membership.set_peers(&["10.0.0.2:11800", "10.0.0.3:11800"]);

    for _ in 0..3 {
        f.reconciler.refresh().await;
    }

    assert_eq!(f.reconciler.self_address(), None);
    assert_eq!(*f.health.events.lock(), vec!["healthy"; 3]);
}

#[tokio::test]
async fn test_unregistered_node_is_unhealthy_when_self_required() {
    let f = fixture(ReconcilerConfig::default());
    f.membership.set_peers(&["10.0.0.2:11800"]);

    f.reconciler.refresh().await;

    assert_eq!(
        f.health.last().as_deref(),
        Some("unhealthy: can't find this node in the cluster")
    );
}

#[tokio::test]
async fn test_cluster_size_counts_distinct_members() {
    let recorder = GaugeRecorder::default();
    let _guard = metrics::set_default_local_recorder(&recorder);

    let f = fixture(ReconcilerConfig::default());
    f.membership.set_peers(&[
        "10.0.0.2:11800",
        "10.0.0.2:11800",
        "10.0.0.2:11800",
        "10.0.0.3:11800",
    ]);

    f.reconciler.try_refresh().await.unwrap();

    assert_eq!(f.directory.len(), 2);
    assert_eq!(recorder.value("cluster_size"), Some(2.0));
}

#[tokio::test(start_paused = true)]
async fn test_zero_interval_is_raised_to_minimum() {
    let f = fixture(ReconcilerConfig {
        refresh_interval: Duration::ZERO,
        ..Default::default()
    });
    f.membership.set_peers(&["10.0.0.2:11800"]);

    let task = f.reconciler.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(f.membership.queries.load(Ordering::SeqCst), 1);

    tokio::time::sleep(tessera_core::MIN_REFRESH_INTERVAL).await;
    assert_eq!(f.membership.queries.load(Ordering::SeqCst), 2);

    task.stop().await;
}

#[tokio::test(start_paused = true)]
async fn test_stop_drops_run_in_flight() {
    let f = fixture(ReconcilerConfig::default());
    f.connector.hang.store(true, Ordering::SeqCst);
    f.membership.set_peers(&["10.0.0.2:11800"]);

    let task = f.reconciler.start();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(f.connector.count(), 1);

    tokio::time::timeout(Duration::from_secs(1), task.stop())
        .await
        .unwrap();

    // The run never published its half-connected list
    assert!(f.directory.is_empty());
    assert!(f.health.events.lock().is_empty());
}
