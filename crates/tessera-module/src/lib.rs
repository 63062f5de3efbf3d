//! Tessera Module - Module runtime
//!
//! This crate provides:
//! - Per-module service registries keyed by capability type
//! - The provider contract every functional module implements
//! - Provider catalog (static registration of selectable providers)
//! - Dependency-ordered bootstrap with cycle diagnosis

pub mod application;
pub mod bootstrap;
pub mod error;
pub mod manager;
pub mod provider;
pub mod service;

pub use application::{ApplicationConfiguration, ModuleConfiguration, provider_settings};
pub use bootstrap::{BootstrapFlow, LifecyclePhase};
pub use error::{ModuleError, StuckProvider};
pub use manager::ModuleManager;
pub use provider::{ModuleProvider, ProviderCatalog, ProviderFactory};
pub use service::{ServiceKey, ServiceRegistry};
