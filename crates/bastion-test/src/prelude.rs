//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bastion_test::prelude::*;` to import all essential types.

pub use crate::{
    CallLog, EchoModule, ManifestBuilder, ModuleDir, RecordingModule, hook_module, init_test_logging,
    scratch_dir, test_config, test_manager,
};

pub use bastion_runtime::{Hook, ModuleManager, ModuleState, NativeRegistry};
