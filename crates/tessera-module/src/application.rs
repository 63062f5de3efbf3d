// Application configuration model consumed by the module runtime
// One entry per module: the selected provider plus that provider's properties

use std::collections::HashMap;

use serde::de::DeserializeOwned;

use crate::error::ModuleError;

/// Key naming the provider a module uses.
pub const SELECTOR: &str = "selector";

#[derive(Clone, Debug, Default)]
pub struct ModuleConfiguration {
    /// Selected provider name
    pub selector: String,
    /// Properties of the selected provider
    pub properties: config::Value,
}

impl ModuleConfiguration {
    pub fn new(selector: impl Into<String>) -> Self {
        Self {
            selector: selector.into(),
            properties: config::Value::default(),
        }
    }

    pub fn with_properties(mut self, properties: config::Value) -> Self {
        self.properties = properties;
        self
    }
}

/// Modules to load, in a stable order.
#[derive(Clone, Debug, Default)]
pub struct ApplicationConfiguration {
    modules: Vec<(String, ModuleConfiguration)>,
}

impl ApplicationConfiguration {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_module(&mut self, name: impl Into<String>, module: ModuleConfiguration) -> &mut Self {
        let name = name.into();
        self.modules.retain(|(n, _)| *n != name);
        self.modules.push((name, module));
        self
    }

    pub fn module_list(&self) -> Vec<&str> {
        self.modules.iter().map(|(n, _)| n.as_str()).collect()
    }

    pub fn module(&self, name: &str) -> Option<&ModuleConfiguration> {
        self.modules.iter().find(|(n, _)| n == name).map(|(_, m)| m)
    }

    pub fn has(&self, name: &str) -> bool {
        self.module(name).is_some()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &ModuleConfiguration)> {
        self.modules.iter().map(|(n, m)| (n.as_str(), m))
    }

    /// Build from a loaded configuration tree.
    ///
    /// Every top-level table carrying a `selector` key is a module; the
    /// sub-table named by the selector holds the provider properties.
    /// Modules are ordered by name so every node loads them identically.
    pub fn from_config(config: &config::Config) -> Result<Self, ModuleError> {
        let root: HashMap<String, config::Value> = config
            .clone()
            .try_deserialize()
            .map_err(|e| ModuleError::ModuleConfig(e.to_string()))?;

        let mut names: Vec<&String> = root.keys().collect();
        names.sort();

        let mut application = Self::new();
        for name in names {
            let Ok(table) = root[name].clone().into_table() else {
                continue;
            };
            let Some(selector) = table.get(SELECTOR) else {
                continue;
            };
            let selector = selector
                .clone()
                .into_string()
                .map_err(|e| ModuleError::ModuleConfig(format!("{name}.{SELECTOR}: {e}")))?;
            if selector.trim().is_empty() {
                return Err(ModuleError::ModuleConfig(format!(
                    "{name}.{SELECTOR} must not be empty"
                )));
            }

            let properties = table.get(&selector).cloned().unwrap_or_default();
            application.add_module(
                name.clone(),
                ModuleConfiguration::new(selector).with_properties(properties),
            );
        }

        Ok(application)
    }
}

/// Deserialize provider properties, falling back to defaults when absent.
pub fn provider_settings<T>(properties: &config::Value) -> anyhow::Result<T>
where
    T: DeserializeOwned + Default,
{
    if matches!(properties.kind, config::ValueKind::Nil) {
        return Ok(T::default());
    }
    Ok(properties.clone().try_deserialize()?)
}
