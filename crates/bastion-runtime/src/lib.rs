//! Bastion Runtime - loading, sandboxing and lifecycle of modules.
//!
//! A module is described by a manifest (`module.toml` or `module.json`),
//! cataloged by the [`ManifestLoader`], and instantiated by the
//! [`ModuleRuntime`] inside exactly one isolated execution context: an
//! Extism plugin for `wasm` entry points or a registered [`NativeModule`]
//! for `native` ones. The [`ModuleManager`] ties both to the governance
//! services in [`RuntimeContext`] and adds broadcast, reload, periodic
//! metrics collection and shutdown.
//!
//! # Example
//!
//! ```rust,no_run
//! use bastion_config::BastionConfig;
//! use bastion_core::ModuleId;
//! use bastion_runtime::ModuleManager;
//!
//! # async fn run() -> Result<(), Box<dyn std::error::Error>> {
//! let manager = ModuleManager::from_config(BastionConfig::default());
//! manager.scan(std::path::Path::new("modules"));
//!
//! let id = ModuleId::new("greeter")?;
//! manager.load(&id).await?;
//! manager.start(&id).await?;
//! manager
//!     .broadcast_event("user.joined", &serde_json::json!({"name": "ada"}))
//!     .await;
//! manager.shutdown().await;
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod discovery;
pub mod engine;
pub mod prelude;
pub mod sandbox;

mod context;
mod error;
mod loader;
mod manager;
mod runtime;

pub use context::RuntimeContext;
pub use discovery::{ManifestCandidate, ManifestDiscovery, discover};
pub use engine::{Hook, HookError, Invocation, IsolatedContext, NativeModule, NativeRegistry};
pub use error::{RuntimeError, RuntimeResult};
pub use loader::{CatalogEntry, ManifestLoader, ManifestSource, ResolvedCode, ScanReport, load_manifest};
pub use manager::{BroadcastFailure, BroadcastReport, ModuleManager};
pub use runtime::{Dispatch, INVOCATION_METRIC, ModuleRuntime, ModuleState, ModuleStatus};
pub use sandbox::{HostError, SandboxHost, SandboxLimits};
