//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bastion_governor::prelude::*;` to import all essential types.

pub use crate::{ResourceGovernor, UsageSnapshot};

pub use crate::{GovernorError, GovernorResult};
