// Peer selection for forwarding

use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use crate::peer::PeerConnection;

/// Strategy picking one peer out of a published snapshot.
#[derive(Debug)]
pub enum PeerSelector {
    /// `key % len`, so the same key always lands on the same peer while the list is stable
    HashCode,
    /// Round-robin across calls
    Rolling(AtomicUsize),
    /// Always the first peer in address order
    ForeverFirst,
}

impl PeerSelector {
    pub fn rolling() -> Self {
        PeerSelector::Rolling(AtomicUsize::new(0))
    }

    pub fn select(&self, peers: &[Arc<PeerConnection>], key: u64) -> Option<Arc<PeerConnection>> {
        if peers.is_empty() {
            return None;
        }
        let index = match self {
            PeerSelector::HashCode => (key % peers.len() as u64) as usize,
            PeerSelector::Rolling(cursor) => cursor.fetch_add(1, Ordering::Relaxed) % peers.len(),
            PeerSelector::ForeverFirst => 0,
        };
        peers.get(index).cloned()
    }
}

impl std::str::FromStr for PeerSelector {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "hashcode" | "hash_code" => Ok(PeerSelector::HashCode),
            "rolling" => Ok(PeerSelector::rolling()),
            "foreverfirst" | "forever_first" => Ok(PeerSelector::ForeverFirst),
            other => Err(format!("unknown peer selector '{other}'")),
        }
    }
}
