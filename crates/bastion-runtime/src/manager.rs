//! The module manager: catalog, runtime and background collection behind
//! one handle.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

use bastion_config::BastionConfig;
use bastion_core::{ModuleId, ModuleManifest};
use bastion_events::{EventMetadata, RuntimeEvent};
use bastion_governor::ResourceGovernor;
use bastion_monitor::{Collector, MetricsSource, ProcessProbe};
use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::context::RuntimeContext;
use crate::error::RuntimeResult;
use crate::loader::{ManifestLoader, ScanReport};
use crate::runtime::{Dispatch, ModuleRuntime, ModuleState, ModuleStatus};

const EVENT_SOURCE: &str = "manager";

/// Reports governor totals across all registered modules.
struct GovernorSource(Arc<ResourceGovernor>);

impl MetricsSource for GovernorSource {
    fn name(&self) -> &str {
        "governor"
    }

    #[allow(clippy::cast_precision_loss)]
    fn sample(&self) -> BTreeMap<String, f64> {
        self.0
            .aggregate()
            .into_iter()
            .map(|(resource, total)| (format!("governor.{resource}"), total as f64))
            .collect()
    }
}

/// A module whose handler failed during a broadcast.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BroadcastFailure {
    /// Module ID.
    pub module_id: ModuleId,
    /// Error description.
    pub error: String,
}

/// Outcome of [`ModuleManager::broadcast_event`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BroadcastReport {
    /// Modules whose handler succeeded.
    pub delivered: Vec<ModuleId>,
    /// Modules that were not running or did not declare the event.
    pub dropped: Vec<ModuleId>,
    /// Modules whose handler failed or timed out.
    pub failed: Vec<BroadcastFailure>,
}

/// Owns the manifest catalog, the module runtime and the metrics collector.
pub struct ModuleManager {
    ctx: RuntimeContext,
    loader: Arc<ManifestLoader>,
    runtime: ModuleRuntime,
    collector: Mutex<Option<(CancellationToken, JoinHandle<()>)>>,
}

impl std::fmt::Debug for ModuleManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModuleManager")
            .field("runtime", &self.runtime)
            .finish_non_exhaustive()
    }
}

impl ModuleManager {
    /// Create a manager over `ctx`.
    #[must_use]
    pub fn new(ctx: RuntimeContext) -> Self {
        let loader = Arc::new(ManifestLoader::new(
            Arc::clone(&ctx.natives),
            &ctx.config.sandbox,
        ));
        let runtime = ModuleRuntime::new(ctx.clone(), Arc::clone(&loader));
        Self {
            ctx,
            loader,
            runtime,
            collector: Mutex::new(None),
        }
    }

    /// Build the services from `config` and create a manager over them.
    #[must_use]
    pub fn from_config(config: BastionConfig) -> Self {
        Self::new(RuntimeContext::new(config))
    }

    /// Shared services.
    #[must_use]
    pub fn context(&self) -> &RuntimeContext {
        &self.ctx
    }

    /// The manifest catalog.
    #[must_use]
    pub fn loader(&self) -> &ManifestLoader {
        &self.loader
    }

    /// The instance runtime.
    #[must_use]
    pub fn runtime(&self) -> &ModuleRuntime {
        &self.runtime
    }

    /// Catalog every valid manifest under `root`.
    pub fn scan(&self, root: &Path) -> ScanReport {
        self.loader.scan(root)
    }

    /// Catalog a manifest that did not come from a scan.
    pub fn register_manifest(
        &self,
        manifest: ModuleManifest,
        module_dir: PathBuf,
    ) -> Arc<ModuleManifest> {
        self.loader.register(manifest, module_dir)
    }

    /// See [`ModuleRuntime::load`].
    ///
    /// # Errors
    ///
    /// As for [`ModuleRuntime::load`].
    pub async fn load(&self, id: &ModuleId) -> RuntimeResult<()> {
        self.runtime.load(id).await
    }

    /// See [`ModuleRuntime::start`].
    ///
    /// # Errors
    ///
    /// As for [`ModuleRuntime::start`].
    pub async fn start(&self, id: &ModuleId) -> RuntimeResult<()> {
        self.runtime.start(id).await
    }

    /// See [`ModuleRuntime::stop`].
    ///
    /// # Errors
    ///
    /// As for [`ModuleRuntime::stop`].
    pub async fn stop(&self, id: &ModuleId) -> RuntimeResult<()> {
        self.runtime.stop(id).await
    }

    /// See [`ModuleRuntime::unload`].
    ///
    /// # Errors
    ///
    /// As for [`ModuleRuntime::unload`].
    pub async fn unload(&self, id: &ModuleId) -> RuntimeResult<()> {
        self.runtime.unload(id).await
    }

    /// Stop (if running), unload (if loaded) and load again, picking up the
    /// current manifest and policy.
    ///
    /// # Errors
    ///
    /// The first failing step's error.
    pub async fn reload(&self, id: &ModuleId) -> RuntimeResult<()> {
        match self.runtime.state(id) {
            ModuleState::Running => {
                self.runtime.stop(id).await?;
                self.runtime.unload(id).await?;
            },
            ModuleState::Unloaded => {},
            _ => self.runtime.unload(id).await?,
        }
        self.runtime.load(id).await
    }

    /// See [`ModuleRuntime::get_status`].
    ///
    /// # Errors
    ///
    /// As for [`ModuleRuntime::get_status`].
    pub fn get_status(&self, id: &ModuleId) -> RuntimeResult<ModuleStatus> {
        self.runtime.get_status(id)
    }

    /// See [`ModuleRuntime::list`].
    #[must_use]
    pub fn list(&self) -> Vec<ModuleStatus> {
        self.runtime.list()
    }

    /// Deliver an event to every running module concurrently.
    ///
    /// One module's failure neither blocks nor fails delivery to the others.
    pub async fn broadcast_event(&self, event: &str, payload: &serde_json::Value) -> BroadcastReport {
        let targets = self.runtime.running_modules();
        let outcomes = join_all(targets.iter().map(|id| async move {
            (id, self.runtime.dispatch_event(id, event, payload).await)
        }))
        .await;

        let mut report = BroadcastReport::default();
        for (id, outcome) in outcomes {
            match outcome {
                Ok(Dispatch::Delivered) => report.delivered.push(id.clone()),
                Ok(Dispatch::Dropped) => report.dropped.push(id.clone()),
                Err(e) => report.failed.push(BroadcastFailure {
                    module_id: id.clone(),
                    error: e.to_string(),
                }),
            }
        }
        info!(
            event,
            delivered = report.delivered.len(),
            dropped = report.dropped.len(),
            failed = report.failed.len(),
            "Event broadcast"
        );
        report
    }

    /// Start the periodic metrics collector. Returns `false` if it is
    /// disabled in configuration or already running.
    pub fn start_collector(&self) -> bool {
        let settings = &self.ctx.config.monitor;
        if !settings.collector_enabled {
            return false;
        }
        let mut slot = self.collector.lock().unwrap_or_else(PoisonError::into_inner);
        if slot.is_some() {
            return false;
        }
        let token = CancellationToken::new();
        let handle = Collector::new(
            Arc::clone(&self.ctx.monitor),
            self.ctx.events.clone(),
            settings.collect_interval(),
        )
        .with_source(Arc::new(ProcessProbe))
        .with_source(Arc::new(GovernorSource(Arc::clone(&self.ctx.governor))))
        .spawn(token.clone());
        *slot = Some((token, handle));
        true
    }

    /// Stop every running module, unload every instance and stop the
    /// collector. Failures are logged and collected, never fatal.
    ///
    /// Returns the modules that did not shut down cleanly.
    pub async fn shutdown(&self) -> Vec<ModuleId> {
        let mut failures = Vec::new();

        for id in self.runtime.running_modules() {
            if let Err(e) = self.runtime.stop(&id).await {
                warn!(module_id = %id, error = %e, "Module failed to stop during shutdown");
                failures.push(id);
            }
        }
        for id in self.runtime.loaded_modules() {
            if let Err(e) = self.runtime.unload(&id).await {
                warn!(module_id = %id, error = %e, "Module failed to unload during shutdown");
                if !failures.contains(&id) {
                    failures.push(id);
                }
            }
        }

        let collector = self
            .collector
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some((token, handle)) = collector {
            token.cancel();
            if let Err(e) = handle.await {
                warn!(error = %e, "Collector task ended abnormally");
            }
        }

        info!(failures = failures.len(), "Module manager shut down");
        self.ctx.events.publish(RuntimeEvent::Shutdown {
            metadata: EventMetadata::new(EVENT_SOURCE),
            failures: failures.clone(),
        });
        failures
    }
}
