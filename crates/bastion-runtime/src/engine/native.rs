//! In-process modules.

use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use async_trait::async_trait;
use tokio::task::JoinHandle;
use tracing::debug;

use super::{HookError, Invocation, IsolatedContext};
use crate::sandbox::SandboxHost;

/// A module compiled into the host process.
///
/// Implementing the trait is what guarantees the four lifecycle hooks; the
/// runtime never calls into a native module except through these methods,
/// and the module never reaches the runtime except through its
/// [`SandboxHost`].
#[async_trait]
pub trait NativeModule: Send {
    /// Called once after the sandbox is built.
    async fn init(&mut self, host: &SandboxHost) -> Result<(), HookError>;

    /// Transition to running.
    async fn start(&mut self, host: &SandboxHost) -> Result<(), HookError>;

    /// Transition back to loaded.
    async fn stop(&mut self, host: &SandboxHost) -> Result<(), HookError>;

    /// Handle a declared event or a channel message (`channel:<name>`).
    async fn on_event(
        &mut self,
        host: &SandboxHost,
        event: &str,
        payload: &serde_json::Value,
    ) -> Result<(), HookError>;
}

/// Builds a fresh instance for every load.
pub type NativeFactory = Arc<dyn Fn() -> Box<dyn NativeModule> + Send + Sync>;

/// Symbol table resolving `native` entry points.
#[derive(Default)]
pub struct NativeRegistry {
    factories: RwLock<HashMap<String, NativeFactory>>,
}

impl fmt::Debug for NativeRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NativeRegistry")
            .field("symbols", &self.symbols())
            .finish()
    }
}

impl NativeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `factory` under `symbol`, replacing any previous entry.
    pub fn register<F, M>(&self, symbol: impl Into<String>, factory: F)
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: NativeModule + 'static,
    {
        let symbol = symbol.into();
        debug!(symbol = %symbol, "Native module registered");
        let factory: NativeFactory = Arc::new(move || Box::new(factory()));
        self.factories
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(symbol, factory);
    }

    /// Builder form of [`register`](Self::register).
    #[must_use]
    pub fn with<F, M>(self, symbol: impl Into<String>, factory: F) -> Self
    where
        F: Fn() -> M + Send + Sync + 'static,
        M: NativeModule + 'static,
    {
        self.register(symbol, factory);
        self
    }

    /// Look up a factory.
    #[must_use]
    pub fn get(&self, symbol: &str) -> Option<NativeFactory> {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(symbol)
            .cloned()
    }

    /// Whether `symbol` is registered.
    #[must_use]
    pub fn contains(&self, symbol: &str) -> bool {
        self.factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(symbol)
    }

    /// Registered symbols, sorted.
    #[must_use]
    pub fn symbols(&self) -> Vec<String> {
        let mut symbols: Vec<_> = self
            .factories
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .keys()
            .cloned()
            .collect();
        symbols.sort();
        symbols
    }
}

/// A native module paired with its host.
///
/// Each hook runs on its own task so a caller's timeout can abandon it even
/// when the module blocks its thread. An abandoned hook keeps the module, and
/// every later call fails.
pub struct NativeContext {
    module: Option<Box<dyn NativeModule>>,
    host: SandboxHost,
}

impl NativeContext {
    /// Wrap a freshly built module.
    #[must_use]
    pub fn new(module: Box<dyn NativeModule>, host: SandboxHost) -> Self {
        Self {
            module: Some(module),
            host,
        }
    }
}

/// Aborts the hook task if the caller stops waiting for it.
struct AbortOnDrop<T>(JoinHandle<T>);

impl<T> Drop for AbortOnDrop<T> {
    fn drop(&mut self) {
        self.0.abort();
    }
}

#[async_trait]
impl IsolatedContext for NativeContext {
    fn engine(&self) -> &'static str {
        "native"
    }

    async fn invoke(&mut self, invocation: &Invocation) -> Result<(), HookError> {
        let mut module = self
            .module
            .take()
            .ok_or_else(|| HookError::new("an abandoned hook still owns the module"))?;
        let host = self.host.clone();
        let invocation = invocation.clone();
        let mut task = AbortOnDrop(tokio::spawn(async move {
            let result = match &invocation {
                Invocation::Init => module.init(&host).await,
                Invocation::Start => module.start(&host).await,
                Invocation::Stop => module.stop(&host).await,
                Invocation::Event { name, payload } => {
                    module.on_event(&host, name, payload).await
                },
            };
            (module, result)
        }));
        let (module, result) = (&mut task.0)
            .await
            .map_err(|e| HookError::new(format!("hook task failed: {e}")))?;
        self.module = Some(module);
        result
    }

    async fn teardown(&mut self) {
        if self.module.take().is_none() {
            debug!(module_id = %self.host.module_id(), "Native module lost to an abandoned hook");
        }
        debug!(module_id = %self.host.module_id(), "Native sandbox torn down");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct Noop;

    #[async_trait]
    impl NativeModule for Noop {
        async fn init(&mut self, _: &SandboxHost) -> Result<(), HookError> {
            Ok(())
        }
        async fn start(&mut self, _: &SandboxHost) -> Result<(), HookError> {
            Ok(())
        }
        async fn stop(&mut self, _: &SandboxHost) -> Result<(), HookError> {
            Ok(())
        }
        async fn on_event(
            &mut self,
            _: &SandboxHost,
            _: &str,
            _: &serde_json::Value,
        ) -> Result<(), HookError> {
            Ok(())
        }
    }

    #[test]
    fn registry_resolves_symbols() {
        let registry = NativeRegistry::new().with("noop", || Noop);
        assert!(registry.contains("noop"));
        assert!(registry.get("noop").is_some());
        assert!(registry.get("missing").is_none());
        assert_eq!(registry.symbols(), vec!["noop".to_owned()]);
    }
}
