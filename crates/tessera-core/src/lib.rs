//! Tessera Core - Cluster topology management
//!
//! This crate provides:
//! - Address and peer connection types
//! - The cluster membership port and built-in backends
//! - The topology reconciler keeping live peer connections in sync
//! - Health reporting and peer selection for sharded forwarding

pub mod address;
pub mod directory;
pub mod error;
pub mod health;
pub mod membership;
pub mod peer;
pub mod reconciler;
pub mod selector;
pub mod utils;

// Re-export commonly used types
pub use address::Address;
pub use directory::PeerDirectory;
pub use error::ClusterError;
pub use health::{ClusterHealthStatus, HealthCheck, HealthSink, MetricsHealthSink, NodeHealthCheck};
pub use membership::{ClusterMembership, StandaloneMembership, StaticMembership};
pub use peer::{ConnectionState, Connector, ConnectorConfig, GrpcConnector, PeerConnection};
pub use reconciler::{
    MIN_REFRESH_INTERVAL, ReconcileTask, ReconcilerConfig, RefreshOutcome, TopologyReconciler,
};
pub use selector::PeerSelector;
pub use utils::local_ip;
