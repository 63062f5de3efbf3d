//! Error types for the module runtime
//!
//! Every variant here is fatal at bootstrap: the node does not start.

use std::fmt::{Display, Formatter};

use crate::bootstrap::LifecyclePhase;

/// A provider left unsequenced because its requirements could not be met.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct StuckProvider {
    pub module: String,
    pub provider: String,
    pub requires: Vec<String>,
}

impl Display for StuckProvider {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}[provider={}] requires [{}]",
            self.module,
            self.provider,
            self.requires.join(", ")
        )
    }
}

fn format_stuck(stuck: &[StuckProvider]) -> String {
    stuck
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\n")
}

fn format_blocked(blocked: &[StuckProvider]) -> String {
    if blocked.is_empty() {
        return String::new();
    }
    format!("\nblocked by the cycle:\n{}", format_stuck(blocked))
}

#[derive(thiserror::Error, Debug)]
pub enum ModuleError {
    #[error("{0} missing.")]
    ModuleNotFound(String),

    #[error("{module} module is required by {requester}, but not found.")]
    RequiredModuleNotFound { module: String, requester: String },

    #[error("no provider named '{provider}' for module '{module}'")]
    ProviderNotFound { module: String, provider: String },

    #[error("duplicate module definition: {0}")]
    DuplicateModule(String),

    #[error("service {service} already registered in module '{module}'")]
    DuplicateService { module: String, service: &'static str },

    #[error("registry of module '{0}' is frozen, services can only be registered during prepare")]
    RegistryFrozen(String),

    #[error("service {service} not provided by module '{module}'")]
    ServiceNotProvided { module: String, service: &'static str },

    #[error(
        "exist cycle module dependencies in\n{}{}",
        format_stuck(.stuck),
        format_blocked(.blocked)
    )]
    CycleDependency {
        /// Providers that sit on a dependency cycle
        stuck: Vec<StuckProvider>,
        /// Providers that are acyclic but wait on a stuck provider
        blocked: Vec<StuckProvider>,
    },

    #[error("still in preparing stage")]
    StillPreparing,

    #[error("module configuration error: {0}")]
    ModuleConfig(String),

    #[error("{phase} failed for provider {provider} in module {module}: {source}")]
    ModuleStart {
        module: String,
        provider: String,
        phase: LifecyclePhase,
        #[source]
        source: anyhow::Error,
    },
}

impl ModuleError {
    /// Names of the modules sitting on a dependency cycle, if this is a cycle error
    pub fn cycle_modules(&self) -> Vec<&str> {
        match self {
            ModuleError::CycleDependency { stuck, .. } => {
                stuck.iter().map(|s| s.module.as_str()).collect()
            }
            _ => Vec::new(),
        }
    }
}
