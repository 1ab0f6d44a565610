//! Extism-backed WebAssembly modules.
//!
//! Guests export `init`, `start`, `stop` and `on_event`. Each receives a
//! JSON document as input (`{}` for the lifecycle hooks,
//! `{"event": ..., "payload": ...}` for `on_event`) and signals failure
//! through Extism's error channel.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bastion_core::{Capability, ModuleId};
use bastion_policy::SecurityPolicy;
use extism::{Manifest, PluginBuilder, Wasm};
use serde_json::json;
use tracing::{debug, info};

use super::{HookError, Invocation, IsolatedContext};
use crate::sandbox::SandboxLimits;

/// A live Extism plugin.
pub struct WasmContext {
    module_id: ModuleId,
    plugin: Option<Arc<Mutex<extism::Plugin>>>,
}

impl WasmContext {
    /// Instantiate `wasm` under `limits`, granting WASI and outbound hosts
    /// only as far as `policy` allows.
    ///
    /// Compilation is CPU-bound and runs on the blocking pool.
    ///
    /// # Errors
    ///
    /// Returns a reason if Extism rejects the module.
    pub async fn build(
        wasm: Vec<u8>,
        limits: SandboxLimits,
        policy: &SecurityPolicy,
    ) -> Result<Self, String> {
        let module_id = policy.module_id.clone();
        let needs_wasi = policy.allows(Capability::Filesystem)
            || policy.allows(Capability::Env)
            || policy.allows(Capability::Process);
        let allow_network = policy.allows(Capability::Network);

        let plugin = tokio::task::spawn_blocking(move || {
            let mut manifest = Manifest::new([Wasm::data(wasm)])
                .with_timeout(limits.timeout)
                .with_memory_max(limits.wasm_pages());
            if allow_network {
                manifest = manifest.with_allowed_host("*");
            }
            PluginBuilder::new(manifest)
                .with_wasi(needs_wasi)
                .build()
                .map_err(|e| format!("failed to build Extism plugin: {e}"))
        })
        .await
        .map_err(|e| format!("plugin build task failed: {e}"))??;

        info!(
            module_id = %module_id,
            wasi = needs_wasi,
            network = allow_network,
            memory_pages = limits.wasm_pages(),
            "WASM sandbox created"
        );
        Ok(Self {
            module_id,
            plugin: Some(Arc::new(Mutex::new(plugin))),
        })
    }
}

fn input_for(invocation: &Invocation) -> String {
    match invocation {
        Invocation::Event { name, payload } => json!({ "event": name, "payload": payload }),
        _ => json!({}),
    }
    .to_string()
}

#[async_trait]
impl IsolatedContext for WasmContext {
    fn engine(&self) -> &'static str {
        "wasm"
    }

    async fn invoke(&mut self, invocation: &Invocation) -> Result<(), HookError> {
        let plugin = self
            .plugin
            .as_ref()
            .map(Arc::clone)
            .ok_or_else(|| HookError::from("sandbox already torn down"))?;
        let hook = invocation.hook();
        let input = input_for(invocation);

        tokio::task::spawn_blocking(move || {
            let mut guard = plugin
                .lock()
                .map_err(|e| HookError::new(format!("plugin lock poisoned: {e}")))?;
            guard
                .call::<&str, String>(hook.as_str(), &input)
                .map(|_| ())
                .map_err(HookError::new)
        })
        .await
        .map_err(|e| HookError::new(format!("invocation task failed: {e}")))?
    }

    async fn teardown(&mut self) {
        // Dropping the last handle releases linear memory.
        self.plugin = None;
        debug!(module_id = %self.module_id, "WASM sandbox torn down");
    }
}
