//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bastion_policy::prelude::*;` to import all essential types.

pub use crate::{PUBLISH_API, PolicyDefaults, PolicyManager, PolicyPatch, SecurityPolicy};

pub use crate::{PolicyError, PolicyResult};
