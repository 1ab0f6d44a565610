//! Bastion Marketplace - developer submissions and their review.
//!
//! A submission moves `Pending -> Approved | Rejected` exactly once. A
//! module id with a pending or approved submission cannot be submitted
//! again; a rejected one can. Approval is what admits a module to the
//! runtime: it stores the module's default-deny policy and starts
//! monitoring it.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod store;
mod submission;
mod workflow;

pub use error::{MarketplaceError, MarketplaceResult};
pub use store::{InMemorySubmissionStore, SubmissionStore};
pub use submission::{AuditAction, AuditRecord, Submission, SubmissionStatus};
pub use workflow::Marketplace;
