// Peer connections to cluster members
// A peer is either this node (no channel) or a remote node owning a gRPC channel

use std::{
    cmp::Ordering,
    fmt,
    sync::Arc,
    time::Duration,
};

use async_trait::async_trait;
use parking_lot::Mutex;
use tonic::transport::{Channel, Endpoint};
use tracing::{debug, info};

use crate::{address::Address, error::ClusterError};

/// Opens transport channels to remote peers.
#[async_trait]
pub trait Connector: Send + Sync {
    async fn connect(&self, address: &Address) -> Result<Channel, ClusterError>;
}

/// Configuration for the gRPC connector
#[derive(Clone, Debug)]
pub struct ConnectorConfig {
    /// Connection timeout
    pub connect_timeout: Duration,
    /// Request timeout applied to every call on the channel
    pub request_timeout: Duration,
}

impl Default for ConnectorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            request_timeout: Duration::from_secs(20),
        }
    }
}

/// Connector establishing plaintext HTTP/2 channels with tonic.
#[derive(Clone, Debug, Default)]
pub struct GrpcConnector {
    config: ConnectorConfig,
}

impl GrpcConnector {
    pub fn new(config: ConnectorConfig) -> Self {
        Self { config }
    }

    fn endpoint(&self, address: &Address) -> Result<Endpoint, ClusterError> {
        let uri = format!("http://{address}");
        Ok(Endpoint::from_shared(uri)
            .map_err(|_| ClusterError::InvalidAddress(address.to_string()))?
            .connect_timeout(self.config.connect_timeout)
            .timeout(self.config.request_timeout))
    }
}

#[async_trait]
impl Connector for GrpcConnector {
    async fn connect(&self, address: &Address) -> Result<Channel, ClusterError> {
        self.endpoint(address)?
            .connect()
            .await
            .map_err(|e| ClusterError::Connect {
                address: address.to_string(),
                source: Box::new(e),
            })
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConnectionState {
    Created,
    Connected,
    Closed,
}

enum RemoteState {
    Created,
    Connected(Channel),
    Closed,
}

impl RemoteState {
    fn kind(&self) -> ConnectionState {
        match self {
            RemoteState::Created => ConnectionState::Created,
            RemoteState::Connected(_) => ConnectionState::Connected,
            RemoteState::Closed => ConnectionState::Closed,
        }
    }
}

struct RemoteLink {
    connector: Arc<dyn Connector>,
    state: Mutex<RemoteState>,
}

enum PeerKind {
    Local,
    Remote(RemoteLink),
}

/// Live handle to one cluster member.
///
/// Equality and ordering delegate to the address, so every node ranks
/// its peers identically.
pub struct PeerConnection {
    address: Address,
    kind: PeerKind,
}

impl PeerConnection {
    /// The connection to this node itself. Always connected, never owns a channel.
    pub fn local(mut address: Address) -> Self {
        address.set_self(true);
        Self {
            address,
            kind: PeerKind::Local,
        }
    }

    /// A connection to another node, created unconnected.
    pub fn remote(mut address: Address, connector: Arc<dyn Connector>) -> Self {
        address.set_self(false);
        Self {
            address,
            kind: PeerKind::Remote(RemoteLink {
                connector,
                state: Mutex::new(RemoteState::Created),
            }),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn is_self(&self) -> bool {
        matches!(self.kind, PeerKind::Local)
    }

    pub fn state(&self) -> ConnectionState {
        match &self.kind {
            PeerKind::Local => ConnectionState::Connected,
            PeerKind::Remote(link) => link.state.lock().kind(),
        }
    }

    /// The transport channel, present only for a connected remote peer.
    pub fn channel(&self) -> Option<Channel> {
        match &self.kind {
            PeerKind::Local => None,
            PeerKind::Remote(link) => match &*link.state.lock() {
                RemoteState::Connected(channel) => Some(channel.clone()),
                _ => None,
            },
        }
    }

    /// Establish the channel. A no-op when already connected.
    pub async fn connect(&self) -> Result<(), ClusterError> {
        let PeerKind::Remote(link) = &self.kind else {
            return Ok(());
        };

        match link.state.lock().kind() {
            ConnectionState::Connected => return Ok(()),
            ConnectionState::Closed => {
                return Err(ClusterError::ConnectionClosed(self.address.to_string()));
            }
            ConnectionState::Created => {}
        }

        let channel = link.connector.connect(&self.address).await?;

        let mut state = link.state.lock();
        match state.kind() {
            ConnectionState::Created => {
                *state = RemoteState::Connected(channel);
                info!("Connected to cluster peer {}", self.address);
                Ok(())
            }
            ConnectionState::Connected => Ok(()),
            // Closed while the connect was in flight
            ConnectionState::Closed => {
                Err(ClusterError::ConnectionClosed(self.address.to_string()))
            }
        }
    }

    /// Release the channel. Idempotent; a no-op for the local peer.
    pub fn close(&self) {
        if let PeerKind::Remote(link) = &self.kind {
            let mut state = link.state.lock();
            if !matches!(*state, RemoteState::Closed) {
                *state = RemoteState::Closed;
                debug!("Closed connection to cluster peer {}", self.address);
            }
        }
    }
}

impl fmt::Debug for PeerConnection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PeerConnection")
            .field("address", &self.address.to_string())
            .field("self", &self.is_self())
            .field("state", &self.state())
            .finish()
    }
}

impl PartialEq for PeerConnection {
    fn eq(&self, other: &Self) -> bool {
        self.address == other.address
    }
}

impl Eq for PeerConnection {}

impl PartialOrd for PeerConnection {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for PeerConnection {
    fn cmp(&self, other: &Self) -> Ordering {
        self.address.cmp(&other.address)
    }
}
