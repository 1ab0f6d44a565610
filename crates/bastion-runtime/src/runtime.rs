//! Module instances and their lifecycle.
//!
//! ```text
//! Unloaded -> Loading -> Loaded <-> Running
//!                          ^           |
//!                          +- Stopping +
//! (any hook failure) -> Error -> Unloaded
//! ```
//!
//! Each instance owns an invocation lane: a mutex around its sandbox. Every
//! hook call and every state check that gates one happens while the lane is
//! held, so calls into one module never overlap while different modules run
//! concurrently.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, OnceLock, PoisonError, RwLock};
use std::time::Duration;

use bastion_bus::Mailbox;
use bastion_core::{ModuleId, ModuleManifest, ResourceType};
use bastion_events::{EventMetadata, RuntimeEvent};
use bastion_governor::GovernorError;
use serde::{Deserialize, Serialize};
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::context::RuntimeContext;
use crate::engine::{Invocation, IsolatedContext, NativeContext, WasmContext};
use crate::error::{RuntimeError, RuntimeResult};
use crate::loader::{CatalogEntry, ManifestLoader, ResolvedCode};
use crate::sandbox::{SandboxHost, SandboxLimits};

const EVENT_SOURCE: &str = "runtime";

/// Metric recorded for every hook call, in milliseconds.
pub const INVOCATION_METRIC: &str = "invocation_ms";

/// Lifecycle state of a module instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ModuleState {
    /// No instance.
    Unloaded,
    /// Sandbox under construction or `init` in flight.
    Loading,
    /// Initialized, not running.
    Loaded,
    /// Receiving events.
    Running,
    /// `stop` in flight.
    Stopping,
    /// A hook failed or timed out. Only `unload` is accepted.
    Error,
}

impl fmt::Display for ModuleState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Unloaded => "unloaded",
            Self::Loading => "loading",
            Self::Loaded => "loaded",
            Self::Running => "running",
            Self::Stopping => "stopping",
            Self::Error => "error",
        };
        f.write_str(s)
    }
}

/// Point-in-time view of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleStatus {
    /// Module ID.
    pub module_id: ModuleId,
    /// Current state; `Unloaded` for cataloged modules with no instance.
    pub state: ModuleState,
    /// Manifest version.
    pub version: String,
    /// Engine hosting the instance, once built.
    pub engine: Option<&'static str>,
    /// Events the module asked for.
    pub declared_events: Vec<String>,
    /// Methods the module exposes.
    pub declared_methods: Vec<String>,
}

/// What happened to a dispatched event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Dispatch {
    /// `on_event` ran and returned success.
    Delivered,
    /// The module did not declare the event or was not running.
    Dropped,
}

struct Instance {
    manifest: Arc<ModuleManifest>,
    engine: OnceLock<&'static str>,
    state: RwLock<ModuleState>,
    lane: Mutex<Option<Box<dyn IsolatedContext>>>,
    pump: CancellationToken,
    cpu_breached: AtomicBool,
}

impl Instance {
    fn new(manifest: Arc<ModuleManifest>) -> Self {
        Self {
            manifest,
            engine: OnceLock::new(),
            state: RwLock::new(ModuleState::Loading),
            lane: Mutex::new(None),
            pump: CancellationToken::new(),
            cpu_breached: AtomicBool::new(false),
        }
    }

    fn state(&self) -> ModuleState {
        *self.state.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ModuleState) {
        *self.state.write().unwrap_or_else(PoisonError::into_inner) = state;
    }

    fn status(&self) -> ModuleStatus {
        ModuleStatus {
            module_id: self.manifest.id.clone(),
            state: self.state(),
            version: self.manifest.version.clone(),
            engine: self.engine.get().copied(),
            declared_events: self.manifest.events.clone(),
            declared_methods: self.manifest.methods.clone(),
        }
    }
}

/// Runs hooks under the invocation timeout and reports the outcome to the
/// governor, the monitor and the event bus.
#[derive(Clone)]
struct Invoker {
    ctx: RuntimeContext,
    timeout: Duration,
}

impl Invoker {
    #[allow(clippy::cast_precision_loss)]
    async fn call(
        &self,
        id: &ModuleId,
        instance: &Instance,
        sandbox: &mut dyn IsolatedContext,
        invocation: Invocation,
    ) -> RuntimeResult<()> {
        let hook = invocation.hook();
        let started = Instant::now();
        let outcome = tokio::time::timeout(self.timeout, sandbox.invoke(&invocation)).await;
        let elapsed = started.elapsed();
        let elapsed_ms = u64::try_from(elapsed.as_millis()).unwrap_or(u64::MAX);

        self.charge_cpu(id, instance, elapsed_ms);
        if let Err(e) = self
            .ctx
            .monitor
            .record_metric(id, INVOCATION_METRIC, elapsed_ms as f64)
        {
            debug!(module_id = %id, error = %e, "Invocation metric not recorded");
        }

        // A hook that held its thread past the deadline finishes before the
        // timer is polled, so the clock decides.
        let outcome = outcome.ok().filter(|_| elapsed <= self.timeout);
        match outcome {
            Some(Ok(())) => {
                debug!(module_id = %id, hook = %hook, elapsed_ms, "Hook completed");
                Ok(())
            },
            Some(Err(e)) => Err(RuntimeError::HookFailed {
                module_id: id.clone(),
                hook,
                message: e.0,
            }),
            None => Err(RuntimeError::Timeout {
                module_id: id.clone(),
                hook,
                timeout_ms: self.ctx.config.sandbox.invocation_timeout_ms,
            }),
        }
    }

    /// Wall-clock time spent in a hook counts against the CPU ceiling. A
    /// breach is reported once per instance, not enforced; later hooks are
    /// not charged.
    fn charge_cpu(&self, id: &ModuleId, instance: &Instance, elapsed_ms: u64) {
        if elapsed_ms == 0 || instance.cpu_breached.load(Ordering::Relaxed) {
            return;
        }
        match self
            .ctx
            .governor
            .update_usage(id, ResourceType::CpuTime, elapsed_ms)
        {
            Ok(_) => {},
            Err(e @ GovernorError::LimitExceeded { .. }) => {
                instance.cpu_breached.store(true, Ordering::Relaxed);
                warn!(module_id = %id, error = %e, "CPU time ceiling exceeded");
                if let Err(e) = self.ctx.monitor.record_warning(id, e.to_string()) {
                    debug!(module_id = %id, error = %e, "Warning not recorded");
                }
            },
            Err(e) => debug!(module_id = %id, error = %e, "CPU time not charged"),
        }
    }

    /// Move the instance to `Error` and report why.
    fn fail(&self, id: &ModuleId, instance: &Instance, err: &RuntimeError) {
        instance.set_state(ModuleState::Error);
        self.report_error(id, err);
    }

    fn report_error(&self, id: &ModuleId, err: &RuntimeError) {
        error!(module_id = %id, error = %err, "Module error");
        if let Err(e) = self.ctx.monitor.record_error(id, err.to_string()) {
            debug!(module_id = %id, error = %e, "Error not recorded");
        }
        self.ctx.events.publish(RuntimeEvent::ModuleError {
            metadata: EventMetadata::new(EVENT_SOURCE),
            module_id: id.clone(),
            error: err.to_string(),
        });
    }
}

/// Owns every live module instance.
pub struct ModuleRuntime {
    invoker: Invoker,
    loader: Arc<ManifestLoader>,
    instances: RwLock<HashMap<ModuleId, Arc<Instance>>>,
}

impl fmt::Debug for ModuleRuntime {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ModuleRuntime")
            .field("instances", &self.loaded_modules())
            .finish_non_exhaustive()
    }
}

impl ModuleRuntime {
    /// Create a runtime resolving modules through `loader`.
    #[must_use]
    pub fn new(ctx: RuntimeContext, loader: Arc<ManifestLoader>) -> Self {
        let timeout = ctx.config.sandbox.invocation_timeout();
        Self {
            invoker: Invoker { ctx, timeout },
            loader,
            instances: RwLock::new(HashMap::new()),
        }
    }

    fn ctx(&self) -> &RuntimeContext {
        &self.invoker.ctx
    }

    fn instance(&self, id: &ModuleId) -> RuntimeResult<Arc<Instance>> {
        self.instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
            .ok_or_else(|| RuntimeError::NotFound(id.clone()))
    }

    fn remove_instance(&self, id: &ModuleId) {
        self.instances
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }

    fn emit(&self, event: RuntimeEvent) {
        self.ctx().events.publish(event);
    }

    /// Build a sandbox for a cataloged module and run its `init` hook.
    ///
    /// On any failure everything acquired so far is released, the instance
    /// is discarded, and a `module_error` event is published.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NotFound`] for unknown ids,
    /// [`RuntimeError::AlreadyLoaded`], [`RuntimeError::CodeResolution`],
    /// [`RuntimeError::SandboxCreation`], or the `init` hook's failure.
    pub async fn load(&self, id: &ModuleId) -> RuntimeResult<()> {
        let entry = self.loader.lookup(id)?;
        let instance = {
            let mut instances = self
                .instances
                .write()
                .unwrap_or_else(PoisonError::into_inner);
            if instances.contains_key(id) {
                return Err(RuntimeError::AlreadyLoaded(id.clone()));
            }
            let instance = Arc::new(Instance::new(Arc::clone(&entry.manifest)));
            instances.insert(id.clone(), Arc::clone(&instance));
            instance
        };

        match self.instantiate(&instance, &entry).await {
            Ok(mailbox) => {
                instance.set_state(ModuleState::Loaded);
                self.spawn_pump(id.clone(), Arc::clone(&instance), mailbox);
                info!(
                    module_id = %id,
                    version = %entry.manifest.version,
                    engine = instance.engine.get().copied().unwrap_or("unknown"),
                    "Module loaded"
                );
                self.emit(RuntimeEvent::ModuleLoaded {
                    metadata: EventMetadata::new(EVENT_SOURCE),
                    module_id: id.clone(),
                    version: entry.manifest.version.clone(),
                });
                Ok(())
            },
            Err(e) => {
                self.discard(id, &instance).await;
                self.invoker.report_error(id, &e);
                Err(e)
            },
        }
    }

    async fn instantiate(&self, instance: &Instance, entry: &CatalogEntry) -> RuntimeResult<Mailbox> {
        let ctx = self.ctx();
        let id = &entry.manifest.id;
        let code = self.loader.resolve_code(&entry.manifest, &entry.module_dir)?;
        let policy = ctx.policies.get_policy(id);
        let sandbox_error = |reason: String| RuntimeError::SandboxCreation {
            module_id: id.clone(),
            reason,
        };
        let limits = SandboxLimits::for_policy(&policy, &ctx.config.sandbox).map_err(sandbox_error)?;

        let mut sandbox: Box<dyn IsolatedContext> = match code {
            ResolvedCode::Native(factory) => {
                let host = SandboxHost::new(
                    policy,
                    entry.module_dir.clone(),
                    Arc::clone(&ctx.bus),
                    Arc::clone(&ctx.governor),
                    Arc::clone(&ctx.monitor),
                );
                Box::new(NativeContext::new(factory(), host))
            },
            ResolvedCode::Wasm(bytes) => Box::new(
                WasmContext::build(bytes, limits, &policy)
                    .await
                    .map_err(sandbox_error)?,
            ),
        };
        // Set once per instance.
        let _ = instance.engine.set(sandbox.engine());

        ctx.governor.register_module(id);
        let mailbox = ctx.bus.attach(id);
        if !ctx.monitor.is_monitored(id) {
            ctx.monitor.start_monitoring(id);
        }

        let mut lane = instance.lane.lock().await;
        let outcome = self
            .invoker
            .call(id, instance, sandbox.as_mut(), Invocation::Init)
            .await;
        match outcome {
            Ok(()) => {
                *lane = Some(sandbox);
                Ok(mailbox)
            },
            Err(e) => {
                sandbox.teardown().await;
                Err(e)
            },
        }
    }

    /// Release everything an instance holds and forget it.
    async fn discard(&self, id: &ModuleId, instance: &Instance) {
        instance.pump.cancel();
        if let Some(mut sandbox) = instance.lane.lock().await.take() {
            sandbox.teardown().await;
        }
        instance.set_state(ModuleState::Unloaded);
        // The id stays reserved until the bus and governor have let go of it.
        self.ctx().bus.detach(id);
        self.ctx().governor.unregister_module(id);
        self.remove_instance(id);
    }

    /// Forward channel messages from the module's mailbox to `on_event`
    /// while the module is running. Messages arriving at any other time are
    /// dropped.
    fn spawn_pump(&self, id: ModuleId, instance: Arc<Instance>, mut mailbox: Mailbox) {
        let invoker = self.invoker.clone();
        let token = instance.pump.clone();
        tokio::spawn(async move {
            loop {
                let message = tokio::select! {
                    biased;
                    () = token.cancelled() => break,
                    message = mailbox.recv() => match message {
                        Some(message) => message,
                        None => break,
                    },
                };
                let payload = match serde_json::to_value(&*message) {
                    Ok(payload) => payload,
                    Err(e) => {
                        warn!(module_id = %id, error = %e, "Unserializable channel message");
                        continue;
                    },
                };
                let mut lane = instance.lane.lock().await;
                if instance.state() != ModuleState::Running {
                    debug!(module_id = %id, channel = %message.channel, "Channel message dropped");
                    continue;
                }
                let Some(sandbox) = lane.as_mut() else {
                    continue;
                };
                let invocation = Invocation::Event {
                    name: message.event_name(),
                    payload,
                };
                if let Err(e) = invoker.call(&id, &instance, sandbox.as_mut(), invocation).await {
                    invoker.fail(&id, &instance, &e);
                }
            }
            debug!(module_id = %id, "Mailbox pump stopped");
        });
    }

    /// Run the `start` hook of a loaded module.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NotFound`], [`RuntimeError::AlreadyRunning`],
    /// [`RuntimeError::InvalidState`] unless `Loaded`, or the hook's
    /// failure (the module is then in `Error`).
    pub async fn start(&self, id: &ModuleId) -> RuntimeResult<()> {
        let instance = self.instance(id)?;
        let mut lane = instance.lane.lock().await;
        match instance.state() {
            ModuleState::Loaded => {},
            ModuleState::Running => return Err(RuntimeError::AlreadyRunning(id.clone())),
            state => {
                return Err(RuntimeError::InvalidState {
                    module_id: id.clone(),
                    state,
                    operation: "start",
                });
            },
        }
        let sandbox = lane.as_mut().ok_or_else(|| RuntimeError::NotFound(id.clone()))?;
        match self.invoker.call(id, &instance, sandbox.as_mut(), Invocation::Start).await {
            Ok(()) => {
                instance.set_state(ModuleState::Running);
                info!(module_id = %id, "Module started");
                self.emit(RuntimeEvent::ModuleStarted {
                    metadata: EventMetadata::new(EVENT_SOURCE),
                    module_id: id.clone(),
                });
                Ok(())
            },
            Err(e) => {
                self.invoker.fail(id, &instance, &e);
                Err(e)
            },
        }
    }

    /// Run the `stop` hook of a running module.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NotFound`], [`RuntimeError::AlreadyStopped`] unless
    /// `Running`, or the hook's failure (the module is then in `Error`).
    pub async fn stop(&self, id: &ModuleId) -> RuntimeResult<()> {
        let instance = self.instance(id)?;
        let mut lane = instance.lane.lock().await;
        if instance.state() != ModuleState::Running {
            return Err(RuntimeError::AlreadyStopped(id.clone()));
        }
        let sandbox = lane.as_mut().ok_or_else(|| RuntimeError::NotFound(id.clone()))?;
        instance.set_state(ModuleState::Stopping);
        match self.invoker.call(id, &instance, sandbox.as_mut(), Invocation::Stop).await {
            Ok(()) => {
                instance.set_state(ModuleState::Loaded);
                info!(module_id = %id, "Module stopped");
                self.emit(RuntimeEvent::ModuleStopped {
                    metadata: EventMetadata::new(EVENT_SOURCE),
                    module_id: id.clone(),
                });
                Ok(())
            },
            Err(e) => {
                self.invoker.fail(id, &instance, &e);
                Err(e)
            },
        }
    }

    /// Tear down a loaded or failed instance.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NotFound`], or [`RuntimeError::InvalidState`] while
    /// the module is running or mid-transition.
    pub async fn unload(&self, id: &ModuleId) -> RuntimeResult<()> {
        let instance = self.instance(id)?;
        {
            let lane = instance.lane.lock().await;
            match instance.state() {
                ModuleState::Loaded | ModuleState::Error => {},
                state => {
                    return Err(RuntimeError::InvalidState {
                        module_id: id.clone(),
                        state,
                        operation: "unload",
                    });
                },
            }
            // Mark before releasing the lane so queued callers see it.
            instance.set_state(ModuleState::Unloaded);
            drop(lane);
        }
        self.discard(id, &instance).await;
        info!(module_id = %id, "Module unloaded");
        self.emit(RuntimeEvent::ModuleUnloaded {
            metadata: EventMetadata::new(EVENT_SOURCE),
            module_id: id.clone(),
        });
        Ok(())
    }

    /// Deliver a named event to one module.
    ///
    /// Events the module did not declare, or that arrive while it is not
    /// running, are dropped without error.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NotFound`] if the module has no instance, or the
    /// handler's failure (the module is then in `Error`).
    pub async fn dispatch_event(
        &self,
        id: &ModuleId,
        event: &str,
        payload: &serde_json::Value,
    ) -> RuntimeResult<Dispatch> {
        let instance = self.instance(id)?;
        if !instance.manifest.declares_event(event) {
            debug!(module_id = %id, event, "Undeclared event dropped");
            return Ok(Dispatch::Dropped);
        }
        let mut lane = instance.lane.lock().await;
        if instance.state() != ModuleState::Running {
            debug!(module_id = %id, event, state = %instance.state(), "Event dropped");
            return Ok(Dispatch::Dropped);
        }
        let Some(sandbox) = lane.as_mut() else {
            return Ok(Dispatch::Dropped);
        };
        let invocation = Invocation::Event {
            name: event.to_owned(),
            payload: payload.clone(),
        };
        match self.invoker.call(id, &instance, sandbox.as_mut(), invocation).await {
            Ok(()) => Ok(Dispatch::Delivered),
            Err(e) => {
                self.invoker.fail(id, &instance, &e);
                Err(e)
            },
        }
    }

    /// Status of a loaded or cataloged module.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NotFound`] if the id is neither.
    pub fn get_status(&self, id: &ModuleId) -> RuntimeResult<ModuleStatus> {
        if let Ok(instance) = self.instance(id) {
            return Ok(instance.status());
        }
        let entry = self.loader.lookup(id)?;
        Ok(ModuleStatus {
            module_id: id.clone(),
            state: ModuleState::Unloaded,
            version: entry.manifest.version.clone(),
            engine: None,
            declared_events: entry.manifest.events.clone(),
            declared_methods: entry.manifest.methods.clone(),
        })
    }

    /// Status of every cataloged or loaded module, sorted by id.
    #[must_use]
    pub fn list(&self) -> Vec<ModuleStatus> {
        let ids: BTreeSet<ModuleId> = self
            .loader
            .catalog()
            .into_iter()
            .chain(self.loaded_modules())
            .collect();
        ids.iter().filter_map(|id| self.get_status(id).ok()).collect()
    }

    /// Ids with a live instance, sorted.
    #[must_use]
    pub fn loaded_modules(&self) -> Vec<ModuleId> {
        let mut ids: Vec<_> = self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        ids.sort();
        ids
    }

    /// Ids currently `Running`, sorted.
    #[must_use]
    pub fn running_modules(&self) -> Vec<ModuleId> {
        let mut ids: Vec<_> = self
            .instances
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|(_, instance)| instance.state() == ModuleState::Running)
            .map(|(id, _)| id.clone())
            .collect();
        ids.sort();
        ids
    }

    /// Current state, `Unloaded` when there is no instance.
    #[must_use]
    pub fn state(&self, id: &ModuleId) -> ModuleState {
        self.instance(id)
            .map_or(ModuleState::Unloaded, |instance| instance.state())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    use async_trait::async_trait;
    use bastion_config::BastionConfig;
    use bastion_policy::{PUBLISH_API, PolicyPatch};
    use serde_json::json;

    use crate::engine::{Hook, HookError, NativeModule, NativeRegistry};

    type Calls = Arc<StdMutex<Vec<String>>>;

    /// How long a blocking hook holds its thread.
    const BLOCK: Duration = Duration::from_secs(1);

    #[derive(Default)]
    struct Scripted {
        calls: Calls,
        fail_on: Option<&'static str>,
        hang_on: Option<&'static str>,
        block_on: Option<&'static str>,
        delay: Option<Duration>,
    }

    impl Scripted {
        async fn hook(&self, name: &str) -> Result<(), HookError> {
            self.calls.lock().unwrap().push(name.to_owned());
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.hang_on == Some(name) {
                std::future::pending::<()>().await;
            }
            if self.block_on == Some(name) {
                std::thread::sleep(BLOCK);
            }
            if self.fail_on == Some(name) {
                return Err(HookError::new(format!("{name} refused")));
            }
            Ok(())
        }
    }

    #[async_trait]
    impl NativeModule for Scripted {
        async fn init(&mut self, _: &SandboxHost) -> Result<(), HookError> {
            self.hook("init").await
        }
        async fn start(&mut self, _: &SandboxHost) -> Result<(), HookError> {
            self.hook("start").await
        }
        async fn stop(&mut self, _: &SandboxHost) -> Result<(), HookError> {
            self.hook("stop").await
        }
        async fn on_event(
            &mut self,
            _: &SandboxHost,
            event: &str,
            _: &serde_json::Value,
        ) -> Result<(), HookError> {
            self.hook(&format!("on_event:{event}")).await
        }
    }

    fn manifest(id: &str, symbol: &str) -> ModuleManifest {
        ModuleManifest::from_toml_str(&format!(
            r#"
            id = "{id}"
            name = "{id}"
            version = "1.0.0"
            events = ["ping", "boom"]

            [entry]
            type = "native"
            symbol = "{symbol}"
            "#
        ))
        .unwrap()
    }

    struct Harness {
        ctx: RuntimeContext,
        runtime: ModuleRuntime,
        calls: Calls,
    }

    fn harness() -> Harness {
        harness_with(BastionConfig::default())
    }

    fn harness_with(config: BastionConfig) -> Harness {
        let calls: Calls = Arc::default();
        let natives = Arc::new(NativeRegistry::new());
        for (symbol, fail_on, hang_on) in [
            ("ok", None, None),
            ("bad-init", Some("init"), None),
            ("bad-start", Some("start"), None),
            ("bad-event", Some("on_event:boom"), None),
            ("slow-start", None, Some("start")),
        ] {
            let calls = Arc::clone(&calls);
            natives.register(symbol, move || Scripted {
                calls: Arc::clone(&calls),
                fail_on,
                hang_on,
                ..Scripted::default()
            });
        }
        let blocking = Arc::clone(&calls);
        natives.register("blocking-start", move || Scripted {
            calls: Arc::clone(&blocking),
            block_on: Some("start"),
            ..Scripted::default()
        });
        let sluggish = Arc::clone(&calls);
        natives.register("sluggish", move || Scripted {
            calls: Arc::clone(&sluggish),
            delay: Some(Duration::from_millis(10)),
            ..Scripted::default()
        });
        let ctx = RuntimeContext::with_native_registry(config, natives);
        let loader = Arc::new(ManifestLoader::new(
            Arc::clone(&ctx.natives),
            &ctx.config.sandbox,
        ));
        for (id, symbol) in [
            ("alpha", "ok"),
            ("beta", "ok"),
            ("init-fails", "bad-init"),
            ("start-fails", "bad-start"),
            ("event-fails", "bad-event"),
            ("hangs", "slow-start"),
            ("blocks", "blocking-start"),
            ("sluggish", "sluggish"),
            ("ghost", "unregistered"),
        ] {
            loader.register(manifest(id, symbol), std::env::temp_dir());
        }
        let runtime = ModuleRuntime::new(ctx.clone(), loader);
        Harness {
            ctx,
            runtime,
            calls,
        }
    }

    fn id(s: &str) -> ModuleId {
        ModuleId::new(s).unwrap()
    }

    #[tokio::test]
    async fn full_lifecycle_emits_events_in_order() {
        let h = harness();
        let mut rx = h.ctx.events.subscribe();
        let alpha = id("alpha");

        h.runtime.load(&alpha).await.unwrap();
        assert_eq!(h.runtime.state(&alpha), ModuleState::Loaded);
        h.runtime.start(&alpha).await.unwrap();
        assert_eq!(h.runtime.state(&alpha), ModuleState::Running);
        h.runtime.stop(&alpha).await.unwrap();
        assert_eq!(h.runtime.state(&alpha), ModuleState::Loaded);
        h.runtime.unload(&alpha).await.unwrap();
        assert_eq!(h.runtime.state(&alpha), ModuleState::Unloaded);

        let types: Vec<_> = rx
            .drain()
            .iter()
            .filter(|e| e.is_lifecycle_event())
            .map(|e| e.event_type())
            .collect();
        assert_eq!(
            types,
            vec!["module_loaded", "module_started", "module_stopped", "module_unloaded"]
        );
        assert_eq!(*h.calls.lock().unwrap(), vec!["init", "start", "stop"]);
        assert!(!h.ctx.governor.is_registered(&alpha));
    }

    #[tokio::test]
    async fn invalid_transitions_are_rejected() {
        let h = harness();
        let alpha = id("alpha");

        assert!(matches!(
            h.runtime.start(&alpha).await,
            Err(RuntimeError::NotFound(_))
        ));
        h.runtime.load(&alpha).await.unwrap();
        assert!(matches!(
            h.runtime.load(&alpha).await,
            Err(RuntimeError::AlreadyLoaded(_))
        ));
        assert!(matches!(
            h.runtime.stop(&alpha).await,
            Err(RuntimeError::AlreadyStopped(_))
        ));
        h.runtime.start(&alpha).await.unwrap();
        assert!(matches!(
            h.runtime.start(&alpha).await,
            Err(RuntimeError::AlreadyRunning(_))
        ));
        assert!(matches!(
            h.runtime.unload(&alpha).await,
            Err(RuntimeError::InvalidState {
                state: ModuleState::Running,
                ..
            })
        ));
    }

    #[tokio::test]
    async fn failed_init_leaves_nothing_behind() {
        let h = harness();
        let mut rx = h.ctx.events.subscribe_types(["module_error"]);
        let bad = id("init-fails");

        let err = h.runtime.load(&bad).await.unwrap_err();
        assert!(matches!(err, RuntimeError::HookFailed { .. }));
        assert_eq!(h.runtime.state(&bad), ModuleState::Unloaded);
        assert!(!h.ctx.governor.is_registered(&bad));
        assert!(!h.ctx.bus.is_attached(&bad));
        assert!(rx.try_recv().is_some());

        // Unresolvable code fails before a sandbox exists.
        assert!(matches!(
            h.runtime.load(&id("ghost")).await,
            Err(RuntimeError::CodeResolution { .. })
        ));
    }

    #[tokio::test]
    async fn failed_start_moves_to_error_and_allows_unload() {
        let h = harness();
        let bad = id("start-fails");
        h.runtime.load(&bad).await.unwrap();

        assert!(h.runtime.start(&bad).await.is_err());
        assert_eq!(h.runtime.state(&bad), ModuleState::Error);
        assert!(matches!(
            h.runtime.start(&bad).await,
            Err(RuntimeError::InvalidState {
                state: ModuleState::Error,
                ..
            })
        ));
        h.runtime.unload(&bad).await.unwrap();
        h.runtime.load(&bad).await.unwrap();
        assert_eq!(h.runtime.state(&bad), ModuleState::Loaded);
    }

    #[tokio::test(start_paused = true)]
    async fn hanging_hook_times_out() {
        let h = harness();
        let slow = id("hangs");
        h.runtime.load(&slow).await.unwrap();

        let err = h.runtime.start(&slow).await.unwrap_err();
        assert!(matches!(
            err,
            RuntimeError::Timeout {
                timeout_ms: 5_000,
                ..
            }
        ));
        assert_eq!(h.runtime.state(&slow), ModuleState::Error);
        let usage = h.ctx.governor.get_usage(&slow).unwrap();
        assert!(usage.get(ResourceType::CpuTime) >= 5_000);
    }

    fn short_timeout() -> BastionConfig {
        let mut config = BastionConfig::default();
        config.sandbox.invocation_timeout_ms = 100;
        config
    }

    #[tokio::test]
    async fn blocking_hook_that_overruns_is_a_timeout() {
        let h = harness_with(short_timeout());
        let blocks = id("blocks");
        h.runtime.load(&blocks).await.unwrap();

        let err = h.runtime.start(&blocks).await.unwrap_err();
        assert!(
            matches!(
                err,
                RuntimeError::Timeout {
                    hook: Hook::Start,
                    timeout_ms: 100,
                    ..
                }
            ),
            "{err}"
        );
        assert_eq!(h.runtime.state(&blocks), ModuleState::Error);
        h.runtime.unload(&blocks).await.unwrap();
        assert_eq!(h.runtime.state(&blocks), ModuleState::Unloaded);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn blocking_hook_is_abandoned_at_the_deadline() {
        let h = harness_with(short_timeout());
        let blocks = id("blocks");
        h.runtime.load(&blocks).await.unwrap();

        let started = std::time::Instant::now();
        let err = h.runtime.start(&blocks).await.unwrap_err();
        assert!(matches!(err, RuntimeError::Timeout { .. }), "{err}");
        assert!(started.elapsed() < BLOCK, "caller waited {:?}", started.elapsed());
        assert_eq!(h.runtime.state(&blocks), ModuleState::Error);
    }

    #[tokio::test(start_paused = true)]
    async fn cpu_breach_is_reported_once() {
        let h = harness();
        let slow = id("sluggish");
        h.ctx
            .policies
            .set_policy(
                &slow,
                PolicyPatch::default().with_ceiling(
                    ResourceType::CpuTime,
                    std::num::NonZeroU64::new(15).unwrap(),
                ),
            )
            .unwrap();
        let mut rx = h.ctx.events.subscribe();

        h.runtime.load(&slow).await.unwrap();
        h.runtime.start(&slow).await.unwrap();
        for _ in 0..3 {
            assert_eq!(
                h.runtime.dispatch_event(&slow, "ping", &json!({})).await.unwrap(),
                Dispatch::Delivered
            );
        }

        let breaches = rx
            .drain()
            .iter()
            .filter(|e| e.event_type() == "resource_limit_exceeded")
            .count();
        assert_eq!(breaches, 1);
        assert_eq!(h.ctx.monitor.snapshot(&slow).unwrap().warning_count, 1);
        let usage = h.ctx.governor.get_usage(&slow).unwrap();
        assert!(usage.get(ResourceType::CpuTime) <= 15);
        assert_eq!(h.runtime.state(&slow), ModuleState::Running);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn racing_unload_and_load_keep_registrations() {
        let h = harness();
        let runtime = Arc::new(h.runtime);
        let alpha = id("alpha");

        for _ in 0..50 {
            if runtime.state(&alpha) == ModuleState::Unloaded {
                runtime.load(&alpha).await.unwrap();
            }
            let (unloader, loader) = (Arc::clone(&runtime), Arc::clone(&runtime));
            let (a, b) = (alpha.clone(), alpha.clone());
            let (unloaded, loaded) = tokio::join!(
                tokio::spawn(async move { unloader.unload(&a).await }),
                tokio::spawn(async move { loader.load(&b).await }),
            );
            unloaded.unwrap().unwrap();
            let _ = loaded.unwrap();

            if runtime.state(&alpha) == ModuleState::Loaded {
                assert!(h.ctx.governor.is_registered(&alpha));
                assert!(h.ctx.bus.is_attached(&alpha));
            } else {
                assert!(!h.ctx.governor.is_registered(&alpha));
                assert!(!h.ctx.bus.is_attached(&alpha));
            }
        }
    }

    #[tokio::test]
    async fn messages_queued_at_unload_are_never_delivered() {
        let h = harness();
        let (alpha, beta) = (id("alpha"), id("beta"));
        h.ctx
            .policies
            .set_policy(&alpha, PolicyPatch::default().with_allowed_apis([PUBLISH_API]))
            .unwrap();
        h.runtime.load(&beta).await.unwrap();
        h.ctx.bus.create_channel("news", &alpha).unwrap();
        h.ctx.bus.subscribe(&beta, "news").unwrap();

        for n in 0..3 {
            let receipt = h.ctx.bus.publish(&alpha, "news", json!({ "n": n })).unwrap();
            assert_eq!(receipt.delivered_to, vec![beta.clone()]);
        }
        h.runtime.unload(&beta).await.unwrap();

        h.runtime.load(&beta).await.unwrap();
        h.runtime.start(&beta).await.unwrap();
        for _ in 0..10 {
            tokio::task::yield_now().await;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
        let calls = h.calls.lock().unwrap().clone();
        assert!(
            !calls.iter().any(|c| c.starts_with("on_event:channel:")),
            "{calls:?}"
        );
    }

    #[tokio::test]
    async fn events_reach_only_running_declaring_modules() {
        let h = harness();
        let alpha = id("alpha");
        h.runtime.load(&alpha).await.unwrap();

        let payload = json!({});
        assert_eq!(
            h.runtime.dispatch_event(&alpha, "ping", &payload).await.unwrap(),
            Dispatch::Dropped
        );
        h.runtime.start(&alpha).await.unwrap();
        assert_eq!(
            h.runtime.dispatch_event(&alpha, "ping", &payload).await.unwrap(),
            Dispatch::Delivered
        );
        assert_eq!(
            h.runtime.dispatch_event(&alpha, "other", &payload).await.unwrap(),
            Dispatch::Dropped
        );
        assert!(matches!(
            h.runtime.dispatch_event(&id("beta"), "ping", &payload).await,
            Err(RuntimeError::NotFound(_))
        ));
        assert!(h.calls.lock().unwrap().contains(&"on_event:ping".to_owned()));
    }

    #[tokio::test]
    async fn failing_handler_marks_module_error() {
        let h = harness();
        let bad = id("event-fails");
        h.runtime.load(&bad).await.unwrap();
        h.runtime.start(&bad).await.unwrap();

        let err = h
            .runtime
            .dispatch_event(&bad, "boom", &json!(null))
            .await
            .unwrap_err();
        assert!(err.is_execution_failure());
        assert_eq!(h.runtime.state(&bad), ModuleState::Error);
        assert_eq!(
            h.ctx.monitor.get_module_health(&bad),
            bastion_monitor::HealthStatus::Error
        );
    }

    #[tokio::test]
    async fn channel_messages_are_pumped_to_running_modules() {
        let h = harness();
        let (alpha, beta) = (id("alpha"), id("beta"));
        h.ctx
            .policies
            .set_policy(&alpha, PolicyPatch::default().with_allowed_apis([PUBLISH_API]))
            .unwrap();
        h.runtime.load(&alpha).await.unwrap();
        h.runtime.load(&beta).await.unwrap();
        h.runtime.start(&beta).await.unwrap();

        h.ctx.bus.create_channel("news", &alpha).unwrap();
        h.ctx.bus.subscribe(&alpha, "news").unwrap();
        h.ctx.bus.subscribe(&beta, "news").unwrap();
        h.ctx.bus.publish(&alpha, "news", json!({"n": 1})).unwrap();

        for _ in 0..100 {
            if h.calls.lock().unwrap().contains(&"on_event:channel:news".to_owned()) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        let calls = h.calls.lock().unwrap().clone();
        let deliveries = calls.iter().filter(|c| *c == "on_event:channel:news").count();
        // Only beta is running; alpha's copy is dropped.
        assert_eq!(deliveries, 1);
    }

    #[tokio::test]
    async fn status_covers_cataloged_and_loaded_modules() {
        let h = harness();
        let alpha = id("alpha");
        h.runtime.load(&alpha).await.unwrap();

        let status = h.runtime.get_status(&alpha).unwrap();
        assert_eq!(status.state, ModuleState::Loaded);
        assert_eq!(status.engine, Some("native"));
        assert_eq!(status.declared_events, vec!["ping", "boom"]);

        let beta = h.runtime.get_status(&id("beta")).unwrap();
        assert_eq!(beta.state, ModuleState::Unloaded);
        assert!(beta.engine.is_none());

        let listed: Vec<_> = h.runtime.list().into_iter().map(|s| s.module_id).collect();
        assert_eq!(listed.len(), 9);
        assert!(listed.windows(2).all(|w| w[0] < w[1]));
        assert!(h.runtime.get_status(&id("nope")).is_err());
    }
}
