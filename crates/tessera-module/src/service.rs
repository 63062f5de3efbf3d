// Service registry owned by every module
// Maps a capability type to the single implementation the module exposes

use std::{
    any::{Any, TypeId, type_name},
    collections::HashMap,
    fmt,
    sync::Arc,
};

use tracing::debug;

use crate::error::ModuleError;

/// Identity of a service capability.
///
/// Capabilities are usually trait objects, e.g. `ServiceKey::of::<dyn ClusterMembership>()`.
#[derive(Clone, Copy, Debug)]
pub struct ServiceKey {
    id: TypeId,
    name: &'static str,
}

impl ServiceKey {
    pub fn of<T: ?Sized + 'static>() -> Self {
        Self {
            id: TypeId::of::<T>(),
            name: type_name::<T>(),
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }
}

impl PartialEq for ServiceKey {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for ServiceKey {}

struct ServiceEntry {
    name: &'static str,
    // Always an `Arc<T>` for the `T` the entry was registered under
    service: Box<dyn Any + Send + Sync>,
}

/// Per-module map from capability to implementation.
///
/// Writable while the owning module prepares, frozen afterwards.
pub struct ServiceRegistry {
    module: String,
    services: HashMap<TypeId, ServiceEntry>,
    frozen: bool,
}

impl ServiceRegistry {
    pub fn new(module: impl Into<String>) -> Self {
        Self {
            module: module.into(),
            services: HashMap::new(),
            frozen: false,
        }
    }

    pub fn module(&self) -> &str {
        &self.module
    }

    /// Register the implementation of capability `T`.
    pub fn register<T>(&mut self, service: Arc<T>) -> Result<(), ModuleError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        if self.frozen {
            return Err(ModuleError::RegistryFrozen(self.module.clone()));
        }

        let key = ServiceKey::of::<T>();
        if self.services.contains_key(&key.id) {
            return Err(ModuleError::DuplicateService {
                module: self.module.clone(),
                service: key.name,
            });
        }

        debug!("Module '{}' registered service {}", self.module, key.name);
        self.services.insert(
            key.id,
            ServiceEntry {
                name: key.name,
                service: Box::new(service),
            },
        );
        Ok(())
    }

    /// Look up the implementation of capability `T`.
    pub fn get<T>(&self) -> Result<Arc<T>, ModuleError>
    where
        T: ?Sized + Send + Sync + 'static,
    {
        self.services
            .get(&TypeId::of::<T>())
            .and_then(|entry| entry.service.downcast_ref::<Arc<T>>())
            .cloned()
            .ok_or_else(|| ModuleError::ServiceNotProvided {
                module: self.module.clone(),
                service: type_name::<T>(),
            })
    }

    pub fn contains(&self, key: &ServiceKey) -> bool {
        self.services.contains_key(&key.id)
    }

    /// Fail with `ServiceNotProvided` for the first key this registry lacks.
    pub fn require_all(&self, keys: &[ServiceKey]) -> Result<(), ModuleError> {
        match keys.iter().find(|key| !self.contains(key)) {
            Some(missing) => Err(ModuleError::ServiceNotProvided {
                module: self.module.clone(),
                service: missing.name,
            }),
            None => Ok(()),
        }
    }

    pub(crate) fn freeze(&mut self) {
        self.frozen = true;
    }

    pub fn is_frozen(&self) -> bool {
        self.frozen
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn service_names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.services.values().map(|e| e.name).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for ServiceRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ServiceRegistry")
            .field("module", &self.module)
            .field("services", &self.service_names())
            .field("frozen", &self.frozen)
            .finish()
    }
}
