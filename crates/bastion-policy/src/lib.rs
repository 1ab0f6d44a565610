//! Bastion Policy - per-module security policy store.
//!
//! A policy grants a module up to four capabilities (filesystem, network,
//! process, env), caps its memory and CPU time, and lists the modules and
//! host APIs it may address. Everything not granted is denied; a module
//! with no stored policy is judged against the deny-all default.
//!
//! # Example
//!
//! ```rust
//! use bastion_core::{Capability, ModuleId};
//! use bastion_events::EventBus;
//! use bastion_policy::{PolicyDefaults, PolicyManager, PUBLISH_API};
//!
//! let policies = PolicyManager::new(PolicyDefaults::default(), EventBus::new());
//! let id = ModuleId::new("greeter").unwrap();
//!
//! assert!(!policies.check_capability(&id, Capability::Network));
//!
//! policies
//!     .set_policy_json(&id, serde_json::json!({ "allowedApis": ["bus.*"] }))
//!     .unwrap();
//! assert!(policies.is_api_allowed(&id, PUBLISH_API));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod manager;
mod policy;

pub use error::{PolicyError, PolicyResult};
pub use manager::PolicyManager;
pub use policy::{
    PUBLISH_API, PolicyDefaults, PolicyPatch, SecurityPolicy, matches_allow_list,
};
