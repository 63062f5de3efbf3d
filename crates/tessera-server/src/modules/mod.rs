//! Built-in modules and the catalog of their selectable providers.
//!
//! | Module      | Providers             | Requires           |
//! |-------------|-----------------------|--------------------|
//! | telemetry   | prometheus, none      |                    |
//! | cluster     | standalone, static    |                    |
//! | core        | default               | cluster, telemetry |

pub mod cluster;
pub mod node;
pub mod telemetry;

use std::sync::Arc;

use tessera_module::{ModuleProvider, ProviderCatalog, provider_settings};

pub const TELEMETRY_MODULE: &str = "telemetry";
pub const CLUSTER_MODULE: &str = "cluster";
pub const CORE_MODULE: &str = "core";

/// Every provider this binary ships, keyed by module and selector.
pub fn provider_catalog() -> ProviderCatalog {
    let mut catalog = ProviderCatalog::new();
    catalog
        .register(TELEMETRY_MODULE, telemetry::PROMETHEUS, |properties| {
            let settings = provider_settings(properties)?;
            Ok(Arc::new(telemetry::PrometheusProvider::new(settings)) as Arc<dyn ModuleProvider>)
        })
        .register(TELEMETRY_MODULE, telemetry::NONE, |_| {
            Ok(Arc::new(telemetry::NoneProvider) as Arc<dyn ModuleProvider>)
        })
        .register(CLUSTER_MODULE, cluster::STANDALONE, |_| {
            Ok(Arc::new(cluster::StandaloneProvider::new()) as Arc<dyn ModuleProvider>)
        })
        .register(CLUSTER_MODULE, cluster::STATIC, |properties| {
            let settings = provider_settings(properties)?;
            Ok(Arc::new(cluster::StaticProvider::new(settings)) as Arc<dyn ModuleProvider>)
        })
        .register(CORE_MODULE, node::DEFAULT, |properties| {
            let settings = provider_settings(properties)?;
            Ok(Arc::new(node::CoreProvider::new(settings)) as Arc<dyn ModuleProvider>)
        });
    catalog
}
