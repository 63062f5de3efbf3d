// Bootstrap sequencing
// Orders providers so every module starts after the modules it requires,
// then drives prepare / start / after_all_started in that order.

use std::{
    collections::{HashMap, HashSet},
    fmt::{Display, Formatter},
};

use tracing::{debug, info};

use crate::{
    error::{ModuleError, StuckProvider},
    manager::{ModuleDefine, ModuleManager},
};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LifecyclePhase {
    Prepare,
    Start,
    AfterAllStarted,
    Stop,
}

impl Display for LifecyclePhase {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        let phase = match self {
            LifecyclePhase::Prepare => "prepare",
            LifecyclePhase::Start => "start",
            LifecyclePhase::AfterAllStarted => "after_all_started",
            LifecyclePhase::Stop => "stop",
        };
        f.write_str(phase)
    }
}

/// A computed startup order over a set of loaded modules.
#[derive(Clone, Debug)]
pub struct BootstrapFlow {
    sequence: Vec<usize>,
}

impl BootstrapFlow {
    /// Compute the startup sequence.
    ///
    /// Fails before any lifecycle hook runs when a required module was never
    /// loaded, or when the remaining providers can make no progress.
    pub(crate) fn new(modules: &[ModuleDefine]) -> Result<Self, ModuleError> {
        let loaded: HashSet<&str> = modules.iter().map(|m| m.name()).collect();

        for module in modules {
            for required in module.provider.required_modules() {
                if !loaded.contains(required) {
                    return Err(ModuleError::RequiredModuleNotFound {
                        module: required.to_string(),
                        requester: format!("{}.{}", module.name(), module.provider.name()),
                    });
                }
            }
        }

        let mut pending: Vec<usize> = (0..modules.len()).collect();
        let mut sequenced: HashSet<&str> = HashSet::with_capacity(modules.len());
        let mut sequence = Vec::with_capacity(modules.len());

        while !pending.is_empty() {
            let before = pending.len();

            pending.retain(|&idx| {
                let module = &modules[idx];
                let ready = module
                    .provider
                    .required_modules()
                    .iter()
                    .all(|r| sequenced.contains(r));
                if ready {
                    sequence.push(idx);
                    sequenced.insert(module.name());
                }
                !ready
            });

            if pending.len() == before {
                return Err(Self::cycle_error(modules, &pending));
            }
        }

        debug!(
            "Startup sequence: {:?}",
            sequence.iter().map(|&i| modules[i].name()).collect::<Vec<_>>()
        );

        Ok(Self { sequence })
    }

    /// Split the unsequenced providers into those on a cycle and those
    /// merely waiting on one.
    fn cycle_error(modules: &[ModuleDefine], pending: &[usize]) -> ModuleError {
        let index: HashMap<&str, usize> = pending.iter().map(|&i| (modules[i].name(), i)).collect();

        let edges = |idx: usize| -> Vec<usize> {
            modules[idx]
                .provider
                .required_modules()
                .iter()
                .filter_map(|r| index.get(r).copied())
                .collect()
        };

        let on_cycle = |start: usize| -> bool {
            let mut stack = edges(start);
            let mut seen = HashSet::new();
            while let Some(next) = stack.pop() {
                if next == start {
                    return true;
                }
                if seen.insert(next) {
                    stack.extend(edges(next));
                }
            }
            false
        };

        let describe = |idx: usize| StuckProvider {
            module: modules[idx].name().to_string(),
            provider: modules[idx].provider.name().to_string(),
            requires: modules[idx]
                .provider
                .required_modules()
                .iter()
                .map(|r| r.to_string())
                .collect(),
        };

        let (stuck, blocked): (Vec<usize>, Vec<usize>) =
            pending.iter().copied().partition(|&idx| on_cycle(idx));

        ModuleError::CycleDependency {
            stuck: stuck.into_iter().map(describe).collect(),
            blocked: blocked.into_iter().map(describe).collect(),
        }
    }

    /// Indexes of the loaded modules in startup order
    pub fn sequence(&self) -> &[usize] {
        &self.sequence
    }

    pub(crate) async fn prepare(&self, modules: &mut [ModuleDefine]) -> Result<(), ModuleError> {
        for &idx in &self.sequence {
            let module = &mut modules[idx];
            info!(
                "prepare the provider {} in {} module.",
                module.provider.name(),
                module.name()
            );
            module
                .provider
                .prepare(&mut module.services)
                .await
                .map_err(|source| module.phase_error(LifecyclePhase::Prepare, source))?;
            module.services.freeze();
        }
        Ok(())
    }

    pub(crate) async fn start(&self, manager: &ModuleManager) -> Result<(), ModuleError> {
        for &idx in &self.sequence {
            let module = manager.module_at(idx);
            info!(
                "start the provider {} in {} module.",
                module.provider.name(),
                module.name()
            );
            module.services.require_all(&module.provider.services())?;
            module
                .provider
                .start(manager)
                .await
                .map_err(|source| module.phase_error(LifecyclePhase::Start, source))?;
        }
        Ok(())
    }

    pub(crate) async fn notify_after_completed(
        &self,
        manager: &ModuleManager,
    ) -> Result<(), ModuleError> {
        for &idx in &self.sequence {
            let module = manager.module_at(idx);
            module
                .provider
                .after_all_started(manager)
                .await
                .map_err(|source| module.phase_error(LifecyclePhase::AfterAllStarted, source))?;
        }
        Ok(())
    }
}
