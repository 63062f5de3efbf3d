//! Provider contract and the static provider catalog

use std::{collections::HashMap, sync::Arc};

use async_trait::async_trait;

use crate::{
    error::ModuleError,
    manager::ModuleManager,
    service::{ServiceKey, ServiceRegistry},
};

/// The concrete implementation backing a module.
///
/// Providers are driven through `prepare`, `start` and `after_all_started`
/// in dependency order. `prepare` only registers the provider's own services;
/// `start` may look up services of every module it requires.
#[async_trait]
pub trait ModuleProvider: Send + Sync {
    /// Provider name, the value a module's `selector` picks
    fn name(&self) -> &str;

    /// Name of the module this provider backs
    fn module_name(&self) -> &str;

    /// Modules that must be prepared and started before this provider starts
    fn required_modules(&self) -> &[&str] {
        &[]
    }

    /// Capabilities this provider promises to register during `prepare`
    fn services(&self) -> Vec<ServiceKey> {
        Vec::new()
    }

    async fn prepare(&self, registry: &mut ServiceRegistry) -> anyhow::Result<()>;

    async fn start(&self, modules: &ModuleManager) -> anyhow::Result<()>;

    async fn after_all_started(&self, _modules: &ModuleManager) -> anyhow::Result<()> {
        Ok(())
    }

    /// Release resources on shutdown, called in reverse start order
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Builds a provider from its property table.
pub type ProviderFactory =
    Box<dyn Fn(&config::Value) -> anyhow::Result<Arc<dyn ModuleProvider>> + Send + Sync>;

/// Build-time list of every provider the binary ships, grouped by module.
#[derive(Default)]
pub struct ProviderCatalog {
    modules: HashMap<String, HashMap<String, ProviderFactory>>,
}

impl ProviderCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a selectable provider for `module`.
    pub fn register<F>(&mut self, module: &str, provider: &str, factory: F) -> &mut Self
    where
        F: Fn(&config::Value) -> anyhow::Result<Arc<dyn ModuleProvider>> + Send + Sync + 'static,
    {
        self.modules
            .entry(module.to_string())
            .or_default()
            .insert(provider.to_string(), Box::new(factory));
        self
    }

    pub fn has_module(&self, module: &str) -> bool {
        self.modules.contains_key(module)
    }

    /// Provider names known for `module`, sorted
    pub fn providers(&self, module: &str) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .modules
            .get(module)
            .map(|p| p.keys().map(String::as_str).collect())
            .unwrap_or_default();
        names.sort_unstable();
        names
    }

    /// Instantiate the provider `provider` of `module`.
    pub fn create(
        &self,
        module: &str,
        provider: &str,
        properties: &config::Value,
    ) -> Result<Arc<dyn ModuleProvider>, ModuleError> {
        let factory = self
            .modules
            .get(module)
            .ok_or_else(|| ModuleError::ModuleNotFound(format!("[{module}]")))?
            .get(provider)
            .ok_or_else(|| ModuleError::ProviderNotFound {
                module: module.to_string(),
                provider: provider.to_string(),
            })?;

        let instance = factory(properties).map_err(|e| {
            ModuleError::ModuleConfig(format!("{module}.{provider}: {e}"))
        })?;

        if instance.module_name() != module {
            return Err(ModuleError::ModuleConfig(format!(
                "provider {} declares module '{}' but is registered under '{}'",
                instance.name(),
                instance.module_name(),
                module
            )));
        }

        Ok(instance)
    }
}
