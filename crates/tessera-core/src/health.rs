// Cluster health reporting
// The reconciler evaluates a HealthCheck on every run and reports to a HealthSink

use std::sync::Arc;

use metrics::gauge;
use tracing::warn;

use crate::peer::PeerConnection;

/// Receiver of the node's cluster health signal.
pub trait HealthSink: Send + Sync {
    fn healthy(&self);

    fn unhealthy(&self, reason: &str);
}

/// Result of evaluating the published peer list.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ClusterHealthStatus {
    pub healthy: bool,
    pub reason: Option<String>,
}

impl ClusterHealthStatus {
    pub fn healthy() -> Self {
        Self {
            healthy: true,
            reason: None,
        }
    }

    pub fn unhealthy(reason: impl Into<String>) -> Self {
        Self {
            healthy: false,
            reason: Some(reason.into()),
        }
    }

    /// Forward this status to a sink.
    pub fn report(&self, sink: &dyn HealthSink) {
        match &self.reason {
            Some(reason) if !self.healthy => sink.unhealthy(reason),
            _ => sink.healthy(),
        }
    }
}

/// Predicate over the sorted peer list.
pub trait HealthCheck: Send + Sync {
    fn check(&self, peers: &[Arc<PeerConnection>]) -> ClusterHealthStatus;
}

/// Default predicate: the list must not be empty, and this node must not
/// advertise a loopback address to other nodes.
///
/// With `require_self`, this node must also be in the list. Nodes that never
/// register themselves (receivers) turn it off.
#[derive(Clone, Copy, Debug)]
pub struct NodeHealthCheck {
    require_self: bool,
}

impl NodeHealthCheck {
    pub fn new(require_self: bool) -> Self {
        Self { require_self }
    }
}

impl Default for NodeHealthCheck {
    fn default() -> Self {
        Self::new(true)
    }
}

impl HealthCheck for NodeHealthCheck {
    fn check(&self, peers: &[Arc<PeerConnection>]) -> ClusterHealthStatus {
        if peers.is_empty() {
            return ClusterHealthStatus::unhealthy("can't get the instance list");
        }

        match peers.iter().find(|peer| peer.is_self()) {
            None if self.require_self => {
                ClusterHealthStatus::unhealthy("can't find this node in the cluster")
            }
            Some(local) if peers.len() > 1 && local.address().is_loopback() => {
                ClusterHealthStatus::unhealthy(format!(
                    "the self address {} is a loopback address, other nodes can't reach it",
                    local.address()
                ))
            }
            _ => ClusterHealthStatus::healthy(),
        }
    }
}

/// Records health as gauge `<name>_health`: 1 healthy, 0 unhealthy.
#[derive(Clone, Debug)]
pub struct MetricsHealthSink {
    metric: String,
}

impl MetricsHealthSink {
    pub fn new(name: &str) -> Self {
        Self {
            metric: format!("{name}_health"),
        }
    }

    pub fn metric_name(&self) -> &str {
        &self.metric
    }
}

impl HealthSink for MetricsHealthSink {
    fn healthy(&self) {
        gauge!(self.metric.clone()).set(1.0);
    }

    fn unhealthy(&self, reason: &str) {
        warn!("{} unhealthy: {}", self.metric, reason);
        gauge!(self.metric.clone()).set(0.0);
    }
}
