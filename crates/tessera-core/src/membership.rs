// Cluster membership port and built-in backends
// The reconciler only sees this trait; coordinators plug in behind it

use std::{
    fs,
    io::ErrorKind,
    path::{Path, PathBuf},
};

use async_trait::async_trait;
use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::{address::Address, error::ClusterError};

/// Source of truth for which nodes form the cluster.
#[async_trait]
pub trait ClusterMembership: Send + Sync {
    /// Current member addresses. Order and duplicates are not significant.
    async fn query_peers(&self) -> Result<Vec<Address>, ClusterError>;

    /// Announce this node to the rest of the cluster.
    async fn register_self(&self, address: &Address) -> Result<(), ClusterError>;
}

/// Single-node membership: the cluster is whoever registered.
#[derive(Debug, Default)]
pub struct StandaloneMembership {
    registered: RwLock<Option<Address>>,
}

impl StandaloneMembership {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ClusterMembership for StandaloneMembership {
    async fn query_peers(&self) -> Result<Vec<Address>, ClusterError> {
        Ok(self.registered.read().iter().cloned().collect())
    }

    async fn register_self(&self, address: &Address) -> Result<(), ClusterError> {
        info!("Standalone membership registered {}", address);
        *self.registered.write() = Some(address.clone());
        Ok(())
    }
}

/// Fixed membership from a configured member list, falling back to a
/// `cluster.conf` style file (one `host[:port]` per line, `#` comments).
///
/// The file is re-read on every query so edits are picked up without a restart.
#[derive(Debug)]
pub struct StaticMembership {
    members: Vec<String>,
    member_file: Option<PathBuf>,
    default_port: u16,
}

impl StaticMembership {
    pub fn new(members: Vec<String>, member_file: Option<PathBuf>, default_port: u16) -> Self {
        Self {
            members,
            member_file,
            default_port,
        }
    }

    fn read_member_file(path: &Path) -> Result<Vec<String>, ClusterError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                warn!("Cluster member file not found: {}", path.display());
                return Ok(vec![]);
            }
            Err(e) => {
                return Err(ClusterError::Query(format!(
                    "failed to read {}: {}",
                    path.display(),
                    e
                )));
            }
        };

        Ok(content
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty() && !line.starts_with('#'))
            .map(str::to_string)
            .collect())
    }

    /// Configured entries, list first. Entries may themselves be comma-separated.
    fn entries(&self) -> Result<Vec<String>, ClusterError> {
        let mut entries: Vec<String> = self
            .members
            .iter()
            .flat_map(|m| m.split(','))
            .map(str::trim)
            .filter(|m| !m.is_empty())
            .map(str::to_string)
            .collect();

        if entries.is_empty()
            && let Some(path) = &self.member_file
        {
            entries = Self::read_member_file(path)?;
        }

        Ok(entries)
    }

    /// Parse one entry. A trailing `?key=value` suffix is tolerated and ignored.
    fn parse_entry(&self, entry: &str) -> Result<Address, ClusterError> {
        let address_part = entry.split('?').next().unwrap_or_default();
        Address::parse_with_default(address_part, self.default_port)
    }

    /// Whether `address` is one of the configured members.
    fn lists(&self, address: &Address) -> Result<bool, ClusterError> {
        Ok(self
            .entries()?
            .iter()
            .filter_map(|entry| self.parse_entry(entry).ok())
            .any(|member| member == *address))
    }
}

#[async_trait]
impl ClusterMembership for StaticMembership {
    async fn query_peers(&self) -> Result<Vec<Address>, ClusterError> {
        let mut addresses = Vec::new();
        for entry in self.entries()? {
            match self.parse_entry(&entry) {
                Ok(address) => addresses.push(address),
                Err(e) => warn!("Skipping cluster member entry: {}", e),
            }
        }
        debug!("Static membership resolved {} members", addresses.len());
        Ok(addresses)
    }

    async fn register_self(&self, address: &Address) -> Result<(), ClusterError> {
        if !self.lists(address)? {
            warn!(
                "{} is not listed in the static cluster membership",
                address
            );
        }
        Ok(())
    }
}
