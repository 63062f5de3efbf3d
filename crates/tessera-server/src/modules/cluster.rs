// Cluster module
// Exposes the membership backend the core module reconciles against

use std::{path::PathBuf, sync::Arc};

use async_trait::async_trait;
use serde::Deserialize;
use tessera_core::{ClusterMembership, StandaloneMembership, StaticMembership};
use tessera_module::{ModuleManager, ModuleProvider, ServiceKey, ServiceRegistry};
use tracing::info;

use super::CLUSTER_MODULE;

pub const STANDALONE: &str = "standalone";
pub const STATIC: &str = "static";

const DEFAULT_PORT: u16 = 11800;

/// Single node: the cluster is this node alone.
pub struct StandaloneProvider {
    membership: Arc<StandaloneMembership>,
}

impl StandaloneProvider {
    pub fn new() -> Self {
        Self {
            membership: Arc::new(StandaloneMembership::new()),
        }
    }
}

impl Default for StandaloneProvider {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ModuleProvider for StandaloneProvider {
    fn name(&self) -> &str {
        STANDALONE
    }

    fn module_name(&self) -> &str {
        CLUSTER_MODULE
    }

    fn services(&self) -> Vec<ServiceKey> {
        vec![ServiceKey::of::<dyn ClusterMembership>()]
    }

    async fn prepare(&self, registry: &mut ServiceRegistry) -> anyhow::Result<()> {
        registry.register::<dyn ClusterMembership>(self.membership.clone())?;
        Ok(())
    }

    async fn start(&self, _modules: &ModuleManager) -> anyhow::Result<()> {
        info!("Cluster running in standalone mode");
        Ok(())
    }
}

#[derive(Clone, Debug, Deserialize)]
#[serde(default)]
pub struct StaticSettings {
    /// `host[:port]` entries; each may hold several comma-separated addresses
    pub members: Vec<String>,
    /// `cluster.conf` style file read when `members` is empty
    pub member_file: Option<PathBuf>,
    /// Port assumed for entries without one
    pub default_port: u16,
}

impl Default for StaticSettings {
    fn default() -> Self {
        Self {
            members: Vec::new(),
            member_file: Some(PathBuf::from("conf/cluster.conf")),
            default_port: DEFAULT_PORT,
        }
    }
}

/// Fixed member list from configuration or a member file.
pub struct StaticProvider {
    membership: Arc<StaticMembership>,
}

impl StaticProvider {
    pub fn new(settings: StaticSettings) -> Self {
        Self {
            membership: Arc::new(StaticMembership::new(
                settings.members,
                settings.member_file,
                settings.default_port,
            )),
        }
    }
}

#[async_trait]
impl ModuleProvider for StaticProvider {
    fn name(&self) -> &str {
        STATIC
    }

    fn module_name(&self) -> &str {
        CLUSTER_MODULE
    }

    fn services(&self) -> Vec<ServiceKey> {
        vec![ServiceKey::of::<dyn ClusterMembership>()]
    }

    async fn prepare(&self, registry: &mut ServiceRegistry) -> anyhow::Result<()> {
        registry.register::<dyn ClusterMembership>(self.membership.clone())?;
        Ok(())
    }

    async fn start(&self, _modules: &ModuleManager) -> anyhow::Result<()> {
        let members = self.membership.query_peers().await?;
        info!("Cluster running with {} static members", members.len());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use config::{Config, FileFormat};
    use tessera_module::provider_settings;

    #[test]
    fn test_static_settings_defaults() {
        let settings: StaticSettings = provider_settings(&config::Value::default()).unwrap();
        assert!(settings.members.is_empty());
        assert_eq!(settings.member_file, Some(PathBuf::from("conf/cluster.conf")));
        assert_eq!(settings.default_port, 11800);
    }

    #[test]
    fn test_static_settings_from_yaml() {
        let config = Config::builder()
            .add_source(config::File::from_str(
                "static:\n  members:\n    - 10.0.0.1:11800\n    - 10.0.0.2\n  default_port: 12000\n",
                FileFormat::Yaml,
            ))
            .build()
            .unwrap();
        let value: config::Value = config.get("static").unwrap();
        let settings: StaticSettings = provider_settings(&value).unwrap();
        assert_eq!(settings.members, vec!["10.0.0.1:11800", "10.0.0.2"]);
        assert_eq!(settings.default_port, 12000);
    }

    #[tokio::test]
    async fn test_static_provider_registers_membership() {
        let provider = StaticProvider::new(StaticSettings {
            members: vec!["10.0.0.1".to_string(), "10.0.0.2:12000".to_string()],
            member_file: None,
            default_port: 11800,
        });
        let mut registry = ServiceRegistry::new(CLUSTER_MODULE);
        provider.prepare(&mut registry).await.unwrap();

        let membership = registry.get::<dyn ClusterMembership>().unwrap();
        let peers: Vec<String> = membership
            .query_peers()
            .await
            .unwrap()
            .iter()
            .map(ToString::to_string)
            .collect();
        assert_eq!(peers, vec!["10.0.0.1:11800", "10.0.0.2:12000"]);
    }
}
