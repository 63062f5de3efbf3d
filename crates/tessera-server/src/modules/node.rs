// Core module
// Owns this node's view of the cluster: the peer directory and the reconciler feeding it

use std::{sync::Arc, time::Duration};

use anyhow::Context;
use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use tessera_core::{
    Address, ClusterMembership, ConnectorConfig, GrpcConnector, MetricsHealthSink, NodeHealthCheck,
    PeerDirectory, PeerSelector, ReconcileTask, ReconcilerConfig, TopologyReconciler, local_ip,
};
use tessera_module::{ModuleManager, ModuleProvider, ServiceKey, ServiceRegistry};
use tracing::info;

use super::{CLUSTER_MODULE, CORE_MODULE, TELEMETRY_MODULE, telemetry::MetricsExporter};

pub const DEFAULT: &str = "default";

/// Which pipelines this node runs
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
pub enum Role {
    /// Receives and aggregates
    #[default]
    Mixed,
    /// Receives and forwards only; never a forwarding target, so not registered
    Receiver,
    /// Aggregates data forwarded by receivers
    Aggregator,
}

impl Role {
    pub fn registers_self(&self) -> bool {
        matches!(self, Role::Mixed | Role::Aggregator)
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct CoreSettings {
    /// Advertised host; the first non-loopback IPv4 address when empty
    pub grpc_host: String,
    pub grpc_port: u16,
    pub role: Role,
    /// Registered instead of `grpc_host:grpc_port` when set with a port above 0
    pub internal_com_host: String,
    pub internal_com_port: u16,
    pub remote_timeout_secs: u64,
    pub connect_timeout_ms: u64,
    pub refresh_interval_secs: u64,
    /// Peer selector for forwarding: hashcode, rolling or foreverfirst
    pub peer_selector: String,
}

impl Default for CoreSettings {
    fn default() -> Self {
        Self {
            grpc_host: String::new(),
            grpc_port: 11800,
            role: Role::Mixed,
            internal_com_host: String::new(),
            internal_com_port: 0,
            remote_timeout_secs: 20,
            connect_timeout_ms: 3000,
            refresh_interval_secs: 5,
            peer_selector: "hashcode".to_string(),
        }
    }
}

impl CoreSettings {
    pub fn advertised_address(&self) -> Address {
        let host = if self.grpc_host.trim().is_empty() {
            local_ip()
        } else {
            self.grpc_host.trim().to_string()
        };
        Address::new(host, self.grpc_port)
    }

    pub fn internal_address(&self) -> Option<Address> {
        let host = self.internal_com_host.trim();
        (!host.is_empty() && self.internal_com_port > 0)
            .then(|| Address::internal(host, self.internal_com_port))
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            refresh_interval: Duration::from_secs(self.refresh_interval_secs.max(1)),
            internal_address: self.internal_address(),
        }
    }

    pub fn connector_config(&self) -> ConnectorConfig {
        ConnectorConfig {
            connect_timeout: Duration::from_millis(self.connect_timeout_ms),
            request_timeout: Duration::from_secs(self.remote_timeout_secs),
        }
    }
}

pub struct CoreProvider {
    settings: CoreSettings,
    directory: Arc<PeerDirectory>,
    reconciler: Mutex<Option<Arc<TopologyReconciler>>>,
    task: Mutex<Option<ReconcileTask>>,
}

impl CoreProvider {
    pub fn new(settings: CoreSettings) -> Self {
        Self {
            settings,
            directory: Arc::new(PeerDirectory::new()),
            reconciler: Mutex::new(None),
            task: Mutex::new(None),
        }
    }

    pub fn reconciler(&self) -> Option<Arc<TopologyReconciler>> {
        self.reconciler.lock().clone()
    }
}

#[async_trait]
impl ModuleProvider for CoreProvider {
    fn name(&self) -> &str {
        DEFAULT
    }

    fn module_name(&self) -> &str {
        CORE_MODULE
    }

    fn required_modules(&self) -> &[&str] {
        &[CLUSTER_MODULE, TELEMETRY_MODULE]
    }

    fn services(&self) -> Vec<ServiceKey> {
        vec![
            ServiceKey::of::<PeerDirectory>(),
            ServiceKey::of::<PeerSelector>(),
        ]
    }

    async fn prepare(&self, registry: &mut ServiceRegistry) -> anyhow::Result<()> {
        let selector: PeerSelector = self
            .settings
            .peer_selector
            .parse()
            .map_err(anyhow::Error::msg)?;
        registry.register(self.directory.clone())?;
        registry.register(Arc::new(selector))?;
        Ok(())
    }

    async fn start(&self, modules: &ModuleManager) -> anyhow::Result<()> {
        let membership = modules.service::<dyn ClusterMembership>(CLUSTER_MODULE)?;
        let exporter = modules.service::<MetricsExporter>(TELEMETRY_MODULE)?;
        info!("Cluster metrics exported through {}", exporter.kind);

        let reconciler = Arc::new(TopologyReconciler::new(
            self.settings.reconciler_config(),
            membership,
            Arc::new(GrpcConnector::new(self.settings.connector_config())),
            self.directory.clone(),
            Arc::new(MetricsHealthSink::new(CLUSTER_MODULE)),
        )
        .with_health_check(Box::new(NodeHealthCheck::new(
            self.settings.role.registers_self(),
        ))));

        if self.settings.role.registers_self() {
            reconciler
                .register_remote(self.settings.advertised_address())
                .await
                .context("failed to register this node to the cluster")?;
        } else {
            info!("Role {:?} does not register to the cluster", self.settings.role);
        }

        *self.reconciler.lock() = Some(reconciler);
        Ok(())
    }

    async fn after_all_started(&self, _modules: &ModuleManager) -> anyhow::Result<()> {
        let reconciler = self
            .reconciler()
            .context("the reconciler is created when the core module starts")?;
        let task = reconciler.start();
        *self.task.lock() = Some(task);
        Ok(())
    }

    async fn stop(&self) -> anyhow::Result<()> {
        let task = self.task.lock().take();
        if let Some(task) = task {
            task.stop().await;
        }
        Ok(())
    }
}
