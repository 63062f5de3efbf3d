// Topology reconciler
// Keeps the published peer list in sync with cluster membership, minimizing churn

use std::{collections::HashSet, sync::Arc, time::Duration};

use futures::future::join_all;
use metrics::gauge;
use parking_lot::RwLock;
use tokio::{
    sync::{Mutex, broadcast},
    task::JoinHandle,
    time::MissedTickBehavior,
};
use tracing::{debug, error, info, warn};

use crate::{
    address::Address,
    directory::PeerDirectory,
    error::ClusterError,
    health::{HealthCheck, HealthSink, NodeHealthCheck},
    membership::ClusterMembership,
    peer::{ConnectionState, Connector, PeerConnection},
};

/// Shortest accepted refresh interval
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_millis(100);

/// Reconciler settings
#[derive(Clone, Debug)]
pub struct ReconcilerConfig {
    /// Delay between two runs. The first run happens immediately.
    pub refresh_interval: Duration,
    /// Address registered instead of the transport address, when set
    pub internal_address: Option<Address>,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            refresh_interval: Duration::from_secs(5),
            internal_address: None,
        }
    }
}

/// What one successful run did to the published list.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RefreshOutcome {
    /// Same addresses in the same order; the list instance was kept
    Unchanged,
    Rebuilt {
        created: usize,
        kept: usize,
        closed: usize,
    },
}

pub struct TopologyReconciler {
    config: ReconcilerConfig,
    membership: Arc<dyn ClusterMembership>,
    connector: Arc<dyn Connector>,
    directory: Arc<PeerDirectory>,
    health_check: Box<dyn HealthCheck>,
    health: Arc<dyn HealthSink>,
    self_address: RwLock<Option<Address>>,
    // Serializes runs so the reconciler stays the single writer
    run_lock: Mutex<()>,
}

impl TopologyReconciler {
    pub fn new(
        config: ReconcilerConfig,
        membership: Arc<dyn ClusterMembership>,
        connector: Arc<dyn Connector>,
        directory: Arc<PeerDirectory>,
        health: Arc<dyn HealthSink>,
    ) -> Self {
        Self {
            config,
            membership,
            connector,
            directory,
            health_check: Box::new(NodeHealthCheck::default()),
            health,
            self_address: RwLock::new(None),
            run_lock: Mutex::new(()),
        }
    }

    pub fn with_health_check(mut self, health_check: Box<dyn HealthCheck>) -> Self {
        self.health_check = health_check;
        self
    }

    pub fn directory(&self) -> &Arc<PeerDirectory> {
        &self.directory
    }

    /// The address this node registered, once `register_remote` succeeded.
    pub fn self_address(&self) -> Option<Address> {
        self.self_address.read().clone()
    }

    /// Announce this node to the membership backend.
    ///
    /// A configured internal address replaces `address`. The registered
    /// address is cached and used to recognize this node in query results.
    pub async fn register_remote(&self, address: Address) -> Result<(), ClusterError> {
        let mut address = match &self.config.internal_address {
            Some(internal) => {
                let mut internal = internal.clone();
                internal.set_internal(true);
                internal
            }
            None => address,
        };
        address.set_self(true);

        if let Err(e) = self.membership.register_self(&address).await {
            error!("Failed to register {} to the cluster: {}", address, e);
            self.health.unhealthy(&e.to_string());
            return Err(e);
        }
        self.health.healthy();

        info!("Registered {} to the cluster", address);
        *self.self_address.write() = Some(address);
        Ok(())
    }

    /// Run one reconciliation. Errors are logged and reported as unhealthy,
    /// leaving the previously published list in place.
    pub async fn refresh(&self) {
        let _guard = self.run_lock.lock().await;

        match self.try_refresh().await {
            Ok(outcome) => {
                debug!("Cluster topology refresh: {:?}", outcome);
                let peers = self.directory.snapshot();
                self.health_check.check(&peers).report(self.health.as_ref());
            }
            Err(e) => {
                error!("Failed to refresh cluster topology: {}", e);
                self.health.unhealthy(&e.to_string());
            }
        }
    }

    /// Run one reconciliation and return what it changed.
    ///
    /// Does not report health; `refresh` does.
    pub async fn try_refresh(&self) -> Result<RefreshOutcome, ClusterError> {
        let queried = self.membership.query_peers().await?;
        let addresses = self.normalize(queried);
        gauge!("cluster_size").set(addresses.len() as f64);

        let current = self.directory.snapshot();

        if Self::same_topology(&current, &addresses) {
            self.connect_pending(&current).await;
            return Ok(RefreshOutcome::Unchanged);
        }

        Ok(self.rebuild(&current, addresses).await)
    }

    /// Deduplicate (first occurrence wins), mark self and sort.
    fn normalize(&self, queried: Vec<Address>) -> Vec<Address> {
        let self_address = self.self_address.read().clone();
        let mut seen = HashSet::with_capacity(queried.len());

        let mut addresses: Vec<Address> = queried
            .into_iter()
            .filter(|address| seen.insert((address.host().to_string(), address.port())))
            .map(|mut address| {
                let is_self = self_address.as_ref() == Some(&address);
                address.set_self(is_self);
                address
            })
            .collect();

        addresses.sort();
        addresses
    }

    fn same_topology(current: &[Arc<PeerConnection>], addresses: &[Address]) -> bool {
        current.len() == addresses.len()
            && current.iter().zip(addresses).all(|(peer, address)| {
                peer.address() == address && peer.is_self() == address.is_self()
            })
    }

    async fn rebuild(
        &self,
        current: &[Arc<PeerConnection>],
        addresses: Vec<Address>,
    ) -> RefreshOutcome {
        let mut kept = 0;
        let mut created = 0;
        let mut next = Vec::with_capacity(addresses.len());

        for address in addresses {
            let existing = current.iter().find(|peer| {
                peer.address() == &address && peer.is_self() == address.is_self()
            });
            match existing {
                Some(peer) => {
                    kept += 1;
                    next.push(peer.clone());
                }
                None => {
                    created += 1;
                    next.push(Arc::new(self.create_peer(address)));
                }
            }
        }

        // Connect before the new peers become visible to readers
        self.connect_pending(&next).await;

        let superseded: Vec<Arc<PeerConnection>> = current
            .iter()
            .filter(|peer| !next.iter().any(|n| Arc::ptr_eq(n, peer)))
            .cloned()
            .collect();

        let size = next.len();
        self.directory.publish(next);

        let mut closed = 0;
        for peer in superseded.iter().filter(|peer| !peer.is_self()) {
            peer.close();
            closed += 1;
        }

        info!(
            "Cluster topology rebuilt: {} peers ({} created, {} kept, {} closed)",
            size, created, kept, closed
        );
        RefreshOutcome::Rebuilt {
            created,
            kept,
            closed,
        }
    }

    fn create_peer(&self, address: Address) -> PeerConnection {
        if address.is_self() {
            PeerConnection::local(address)
        } else {
            PeerConnection::remote(address, self.connector.clone())
        }
    }

    /// Connect every remote peer still in `Created`, concurrently.
    /// Failures keep the peer in the list for the next run to retry.
    async fn connect_pending(&self, peers: &[Arc<PeerConnection>]) {
        let pending: Vec<&Arc<PeerConnection>> = peers
            .iter()
            .filter(|peer| peer.state() == ConnectionState::Created)
            .collect();
        if pending.is_empty() {
            return;
        }

        let results = join_all(pending.iter().map(|peer| peer.connect())).await;
        for (peer, result) in pending.iter().zip(results) {
            if let Err(e) = result {
                warn!("Cluster peer {} not connected, retrying next run: {}", peer.address(), e);
            }
        }
    }

    /// Spawn the recurring task: one run now, then one per `refresh_interval`.
    ///
    /// Intervals shorter than `MIN_REFRESH_INTERVAL` are raised to it.
    pub fn start(self: &Arc<Self>) -> ReconcileTask {
        let (stop_tx, mut stop_rx) = broadcast::channel(1);
        let reconciler = self.clone();
        let mut period = self.config.refresh_interval;
        if period < MIN_REFRESH_INTERVAL {
            warn!(
                "Refresh interval {:?} is too short, using {:?}",
                period, MIN_REFRESH_INTERVAL
            );
            period = MIN_REFRESH_INTERVAL;
        }

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    _ = stop_rx.recv() => break,
                    _ = interval.tick() => {
                        // A stop drops the run in flight; nothing is published before its connects finish
                        tokio::select! {
                            _ = stop_rx.recv() => break,
                            _ = reconciler.refresh() => {}
                        }
                    }
                }
            }
            debug!("Cluster topology reconciler stopped");
        });

        info!(
            "Cluster topology reconciler started, refresh interval {:?}",
            period
        );
        ReconcileTask { stop_tx, handle }
    }
}

/// Handle to the recurring reconciliation task.
pub struct ReconcileTask {
    stop_tx: broadcast::Sender<()>,
    handle: JoinHandle<()>,
}

impl ReconcileTask {
    pub fn is_finished(&self) -> bool {
        self.handle.is_finished()
    }

    /// Stop the ticker and wait for the task to exit.
    /// A run in flight is dropped, not awaited.
    pub async fn stop(self) {
        // Fails only when the task already exited
        let _ = self.stop_tx.send(());
        if let Err(e) = self.handle.await {
            warn!("Cluster topology reconciler task failed: {}", e);
        }
    }
}
