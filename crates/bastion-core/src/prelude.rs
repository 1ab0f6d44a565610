//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bastion_core::prelude::*;` to import all essential types.

// Identity
pub use crate::{ModuleId, SYSTEM_MODULE_ID};

// Manifest
pub use crate::{EntryPoint, ManifestFormat, ModuleManifest};

// Governance vocabulary
pub use crate::{Capability, ResourceType};

// Errors
pub use crate::{Classify, ErrorKind, ManifestError, ManifestResult};
