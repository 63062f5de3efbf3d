// Telemetry module
// Installs the global metrics recorder other modules record into

use std::net::SocketAddr;
use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use metrics::{describe_gauge, gauge};
use metrics_exporter_prometheus::PrometheusBuilder;
use serde::Deserialize;
use tessera_module::{ModuleManager, ModuleProvider, ServiceKey, ServiceRegistry};
use tracing::info;

use super::TELEMETRY_MODULE;

pub const PROMETHEUS: &str = "prometheus";
pub const NONE: &str = "none";

/// Which exporter backs the metrics recorder
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct MetricsExporter {
    pub kind: &'static str,
    /// Scrape endpoint, when the exporter serves one
    pub listen: Option<SocketAddr>,
}

impl MetricsExporter {
    pub fn is_enabled(&self) -> bool {
        self.kind != NONE
    }
}

fn describe_metrics() {
    describe_gauge!("cluster_size", "Number of nodes reported by cluster membership");
    describe_gauge!("cluster_health", "Cluster health of this node, 1 healthy or 0 unhealthy");
    describe_gauge!("uptime", "Start time of this node in seconds since the Unix epoch");
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct PrometheusSettings {
    pub host: String,
    pub port: u16,
}

impl Default for PrometheusSettings {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 1234,
        }
    }
}

impl PrometheusSettings {
    pub fn listen_address(&self) -> anyhow::Result<SocketAddr> {
        format!("{}:{}", self.host, self.port)
            .parse()
            .with_context(|| format!("invalid prometheus listen address {}:{}", self.host, self.port))
    }
}

/// Serves metrics on an HTTP scrape endpoint.
pub struct PrometheusProvider {
    settings: PrometheusSettings,
}

impl PrometheusProvider {
    pub fn new(settings: PrometheusSettings) -> Self {
        Self { settings }
    }
}

#[async_trait]
impl ModuleProvider for PrometheusProvider {
    fn name(&self) -> &str {
        PROMETHEUS
    }

    fn module_name(&self) -> &str {
        TELEMETRY_MODULE
    }

    fn services(&self) -> Vec<ServiceKey> {
        vec![ServiceKey::of::<MetricsExporter>()]
    }

    async fn prepare(&self, registry: &mut ServiceRegistry) -> anyhow::Result<()> {
        let listen = self.settings.listen_address()?;
        registry.register(Arc::new(MetricsExporter {
            kind: PROMETHEUS,
            listen: Some(listen),
        }))?;
        Ok(())
    }

    async fn start(&self, _modules: &ModuleManager) -> anyhow::Result<()> {
        let listen = self.settings.listen_address()?;
        PrometheusBuilder::new()
            .with_http_listener(listen)
            .install()
            .context("failed to install the prometheus exporter")?;

        describe_metrics();
        if let Ok(now) = std::time::SystemTime::now().duration_since(std::time::UNIX_EPOCH) {
            gauge!("uptime").set(now.as_secs_f64());
        }
        info!("Prometheus exporter listening on {}", listen);
        Ok(())
    }
}

/// Telemetry disabled; metric calls go nowhere.
pub struct NoneProvider;

#[async_trait]
impl ModuleProvider for NoneProvider {
    fn name(&self) -> &str {
        NONE
    }

    fn module_name(&self) -> &str {
        TELEMETRY_MODULE
    }

    fn services(&self) -> Vec<ServiceKey> {
        vec![ServiceKey::of::<MetricsExporter>()]
    }

    async fn prepare(&self, registry: &mut ServiceRegistry) -> anyhow::Result<()> {
        registry.register(Arc::new(MetricsExporter {
            kind: NONE,
            listen: None,
        }))?;
        Ok(())
    }

    async fn start(&self, _modules: &ModuleManager) -> anyhow::Result<()> {
        Ok(())
    }
}
