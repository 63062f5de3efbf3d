// Module graph and lifecycle entry point

use std::{fmt, sync::Arc};

use tracing::{info, warn};

use crate::{
    application::ApplicationConfiguration,
    bootstrap::{BootstrapFlow, LifecyclePhase},
    error::ModuleError,
    provider::{ModuleProvider, ProviderCatalog},
    service::ServiceRegistry,
};

/// A loaded module: its selected provider and the registry it populates.
pub(crate) struct ModuleDefine {
    pub(crate) provider: Arc<dyn ModuleProvider>,
    pub(crate) services: ServiceRegistry,
}

impl ModuleDefine {
    pub(crate) fn name(&self) -> &str {
        self.services.module()
    }

    pub(crate) fn phase_error(&self, phase: LifecyclePhase, source: anyhow::Error) -> ModuleError {
        ModuleError::ModuleStart {
            module: self.name().to_string(),
            provider: self.provider.name().to_string(),
            phase,
            source,
        }
    }
}

/// Owns every loaded module and drives them through bootstrap.
pub struct ModuleManager {
    modules: Vec<ModuleDefine>,
    sequence: Vec<usize>,
    in_prepare_stage: bool,
}

impl Default for ModuleManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleManager")
            .field("modules", &self.modules.iter().map(|m| m.name()).collect::<Vec<_>>())
            .field("sequence", &self.startup_sequence())
            .field("in_prepare_stage", &self.in_prepare_stage)
            .finish()
    }
}

impl ModuleManager {
    pub fn new() -> Self {
        Self {
            modules: Vec::new(),
            sequence: Vec::new(),
            in_prepare_stage: true,
        }
    }

    /// Load every configured module through the catalog, then bootstrap.
    pub async fn init(
        &mut self,
        application: &ApplicationConfiguration,
        catalog: &ProviderCatalog,
    ) -> Result<(), ModuleError> {
        let mut missing = Vec::new();
        for (name, module) in application.iter() {
            if !catalog.has_module(name) {
                missing.push(name);
                continue;
            }
            let provider = catalog.create(name, &module.selector, &module.properties)?;
            self.add_provider(provider)?;
        }

        if !missing.is_empty() {
            return Err(ModuleError::ModuleNotFound(format!(
                "[{}]",
                missing.join(", ")
            )));
        }

        self.bootstrap().await
    }

    /// Load a provider directly, bypassing the catalog.
    pub fn add_provider(&mut self, provider: Arc<dyn ModuleProvider>) -> Result<(), ModuleError> {
        if !self.in_prepare_stage {
            return Err(ModuleError::ModuleConfig(format!(
                "cannot load module '{}' after bootstrap",
                provider.module_name()
            )));
        }
        if self.has(provider.module_name()) {
            return Err(ModuleError::DuplicateModule(
                provider.module_name().to_string(),
            ));
        }

        info!(
            "Loaded module {} with provider {}",
            provider.module_name(),
            provider.name()
        );
        let services = ServiceRegistry::new(provider.module_name());
        self.modules.push(ModuleDefine { provider, services });
        Ok(())
    }

    /// Sequence the loaded modules and run every lifecycle phase.
    pub async fn bootstrap(&mut self) -> Result<(), ModuleError> {
        if !self.in_prepare_stage {
            return Err(ModuleError::ModuleConfig(
                "modules already bootstrapped".to_string(),
            ));
        }

        let flow = BootstrapFlow::new(&self.modules)?;
        flow.prepare(&mut self.modules).await?;

        self.in_prepare_stage = false;
        self.sequence = flow.sequence().to_vec();

        flow.start(self).await?;
        flow.notify_after_completed(self).await?;

        info!("Bootstrap completed: {:?}", self.startup_sequence());
        Ok(())
    }

    pub fn has(&self, module: &str) -> bool {
        self.modules.iter().any(|m| m.name() == module)
    }

    /// Registry of `module`; only available once every module is prepared.
    pub fn find(&self, module: &str) -> Result<&ServiceRegistry, ModuleError> {
        if self.in_prepare_stage {
            return Err(ModuleError::StillPreparing);
        }
        self.modules
            .iter()
            .find(|m| m.name() == module)
            .map(|m| &m.services)
            .ok_or_else(|| ModuleError::ModuleNotFound(module.to_string()))
    }

    /// Shorthand for `find(module)?.get::<T>()`.
    pub fn service<T>(&self, module: &str) -> Result<Arc<T>, ModuleError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.find(module)?.get::<T>()
    }

    /// Module names in startup order, empty before bootstrap
    pub fn startup_sequence(&self) -> Vec<&str> {
        self.sequence
            .iter()
            .map(|&idx| self.modules[idx].name())
            .collect()
    }

    pub fn is_bootstrapped(&self) -> bool {
        !self.in_prepare_stage
    }

    /// Stop every provider in reverse startup order. Failures are logged.
    pub async fn shutdown(&self) {
        for &idx in self.sequence.iter().rev() {
            let module = &self.modules[idx];
            if let Err(e) = module.provider.stop().await {
                warn!(
                    "{}",
                    module.phase_error(LifecyclePhase::Stop, e)
                );
            } else {
                info!(
                    "stopped the provider {} in {} module.",
                    module.provider.name(),
                    module.name()
                );
            }
        }
    }

    pub(crate) fn module_at(&self, idx: usize) -> &ModuleDefine {
        &self.modules[idx]
    }
}
