//! Shared services every runtime component is wired to.

use std::fmt;
use std::sync::Arc;

use bastion_bus::CommunicationBus;
use bastion_config::BastionConfig;
use bastion_events::EventBus;
use bastion_governor::ResourceGovernor;
use bastion_monitor::ModuleMonitor;
use bastion_policy::{PolicyDefaults, PolicyManager};

use crate::engine::NativeRegistry;

/// The governance services, built once from configuration and shared by
/// handle.
#[derive(Clone)]
pub struct RuntimeContext {
    /// Effective configuration.
    pub config: Arc<BastionConfig>,
    /// Runtime event bus.
    pub events: EventBus,
    /// Policy store.
    pub policies: Arc<PolicyManager>,
    /// Resource accounting.
    pub governor: Arc<ResourceGovernor>,
    /// Inter-module channels.
    pub bus: Arc<CommunicationBus>,
    /// Metrics and health.
    pub monitor: Arc<ModuleMonitor>,
    /// Symbols for `native` entry points.
    pub natives: Arc<NativeRegistry>,
}

impl fmt::Debug for RuntimeContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RuntimeContext")
            .field("natives", &self.natives)
            .finish_non_exhaustive()
    }
}

impl RuntimeContext {
    /// Build every service with an empty native registry.
    #[must_use]
    pub fn new(config: BastionConfig) -> Self {
        Self::with_native_registry(config, Arc::new(NativeRegistry::new()))
    }

    /// Build every service, resolving native entry points through `natives`.
    #[must_use]
    pub fn with_native_registry(config: BastionConfig, natives: Arc<NativeRegistry>) -> Self {
        let events = EventBus::with_capacity(config.bus.event_capacity);
        let policies = Arc::new(PolicyManager::new(
            PolicyDefaults::from(&config.policy),
            events.clone(),
        ));
        let governor = Arc::new(ResourceGovernor::new(
            Arc::clone(&policies),
            events.clone(),
            &config.governor,
        ));
        let bus = Arc::new(CommunicationBus::new(
            Arc::clone(&policies),
            events.clone(),
            &config.bus,
        ));
        let monitor = Arc::new(ModuleMonitor::new(&config.monitor));

        Self {
            config: Arc::new(config),
            events,
            policies,
            governor,
            bus,
            monitor,
            natives,
        }
    }
}
