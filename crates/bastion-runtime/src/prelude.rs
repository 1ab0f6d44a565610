//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bastion_runtime::prelude::*;` to import all essential types.

pub use crate::{ModuleManager, ModuleRuntime, ModuleState, ModuleStatus, RuntimeContext};

pub use crate::{HookError, NativeModule, NativeRegistry, SandboxHost};

pub use crate::{RuntimeError, RuntimeResult};
