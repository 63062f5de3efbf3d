// Published peer list
// Readers take a snapshot; the reconciler swaps in a whole new list

use std::sync::Arc;

use arc_swap::ArcSwap;

use crate::{address::Address, peer::PeerConnection};

/// Copy-on-write view of the live peer connections, sorted by address.
///
/// A snapshot never changes after it is handed out, so readers can iterate
/// while the reconciler publishes a replacement.
pub struct PeerDirectory {
    peers: ArcSwap<Vec<Arc<PeerConnection>>>,
}

impl Default for PeerDirectory {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for PeerDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PeerDirectory")
            .field("peers", &self.addresses())
            .finish()
    }
}

impl PeerDirectory {
    pub fn new() -> Self {
        Self {
            peers: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// The current list. Never blocks the publisher.
    pub fn snapshot(&self) -> Arc<Vec<Arc<PeerConnection>>> {
        self.peers.load_full()
    }

    /// Replace the list, returning the one it supersedes.
    pub(crate) fn publish(&self, peers: Vec<Arc<PeerConnection>>) -> Arc<Vec<Arc<PeerConnection>>> {
        self.peers.swap(Arc::new(peers))
    }

    pub fn len(&self) -> usize {
        self.peers.load().len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.load().is_empty()
    }

    pub fn addresses(&self) -> Vec<Address> {
        self.peers
            .load()
            .iter()
            .map(|peer| peer.address().clone())
            .collect()
    }

    /// This node's entry, if the current list contains it.
    pub fn local(&self) -> Option<Arc<PeerConnection>> {
        self.peers.load().iter().find(|peer| peer.is_self()).cloned()
    }
}
