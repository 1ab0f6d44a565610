//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bastion_marketplace::prelude::*;` to import all essential types.

pub use crate::{InMemorySubmissionStore, Marketplace, Submission, SubmissionStatus, SubmissionStore};

pub use crate::{MarketplaceError, MarketplaceResult};
