//! Error types for cluster operations
//!
//! All of these are recoverable: they are logged, surfaced as an unhealthy
//! signal and retried on the next reconciliation run.

#[derive(thiserror::Error, Debug)]
pub enum ClusterError {
    #[error("failed to query cluster nodes: {0}")]
    Query(String),

    #[error("failed to register {address}: {reason}")]
    Register { address: String, reason: String },

    #[error("failed to connect to {address}: {source}")]
    Connect {
        address: String,
        #[source]
        source: Box<dyn std::error::Error + Send + Sync>,
    },

    #[error("invalid address '{0}'")]
    InvalidAddress(String),

    #[error("connection to {0} is closed")]
    ConnectionClosed(String),

    #[error("cluster configuration error: {0}")]
    Config(String),
}
