//! Isolated execution contexts.
//!
//! Every loaded module runs inside exactly one [`IsolatedContext`]. Two
//! engines produce them:
//!
//! - [`native`]: in-process [`NativeModule`] trait objects that reach the
//!   outside world only through their policy-scoped
//!   [`SandboxHost`](crate::sandbox::SandboxHost).
//! - [`wasm`]: Extism plugins with a linear-memory cap, an execution
//!   timeout, and WASI/network access only when the policy grants it.

pub mod native;
pub mod wasm;

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

pub use native::{NativeContext, NativeFactory, NativeModule, NativeRegistry};
pub use wasm::WasmContext;

/// The lifecycle hooks every module must expose.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Hook {
    /// Called once after the sandbox is built.
    Init,
    /// Transition to running.
    Start,
    /// Transition back to loaded.
    Stop,
    /// Event delivery.
    OnEvent,
}

impl Hook {
    /// Every required hook.
    pub const ALL: [Self; 4] = [Self::Init, Self::Start, Self::Stop, Self::OnEvent];

    /// Export name of the hook.
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::OnEvent => "on_event",
        }
    }
}

impl fmt::Display for Hook {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One call into module code.
#[derive(Debug, Clone, PartialEq)]
pub enum Invocation {
    /// `init`
    Init,
    /// `start`
    Start,
    /// `stop`
    Stop,
    /// `on_event(name, payload)`
    Event {
        /// Event name.
        name: String,
        /// Event payload.
        payload: serde_json::Value,
    },
}

impl Invocation {
    /// The hook this invocation targets.
    #[must_use]
    pub fn hook(&self) -> Hook {
        match self {
            Self::Init => Hook::Init,
            Self::Start => Hook::Start,
            Self::Stop => Hook::Stop,
            Self::Event { .. } => Hook::OnEvent,
        }
    }
}

/// Error returned by module code.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("{0}")]
pub struct HookError(pub String);

impl HookError {
    /// Build from anything displayable.
    pub fn new(message: impl fmt::Display) -> Self {
        Self(message.to_string())
    }
}

impl From<&str> for HookError {
    fn from(message: &str) -> Self {
        Self(message.to_owned())
    }
}

impl From<String> for HookError {
    fn from(message: String) -> Self {
        Self(message)
    }
}

/// A sandbox holding one module instance.
///
/// Callers serialize access through the instance's invocation lane and
/// bound every call with the per-invocation timeout; implementations only
/// have to run the hook.
#[async_trait]
pub trait IsolatedContext: Send {
    /// Engine name for logs and status.
    fn engine(&self) -> &'static str;

    /// Run one hook to completion.
    async fn invoke(&mut self, invocation: &Invocation) -> Result<(), HookError>;

    /// Release the sandbox's resources. Called once, after the last
    /// invocation.
    async fn teardown(&mut self);
}
