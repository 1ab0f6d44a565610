//! Bastion Governor - resource accounting against policy ceilings.
//!
//! The governor keeps one usage counter per `(module, resource)` pair plus a
//! bounded, time-pruned history of its values. Updates are reservations: an
//! update that would push a counter above the module's policy ceiling is
//! refused, the counter is left untouched, and a `resource_limit_exceeded`
//! event is published.
//!
//! # Example
//!
//! ```rust
//! use std::sync::Arc;
//!
//! use bastion_config::GovernorSection;
//! use bastion_core::{ModuleId, ResourceType};
//! use bastion_events::EventBus;
//! use bastion_governor::ResourceGovernor;
//! use bastion_policy::{PolicyDefaults, PolicyManager};
//!
//! let events = EventBus::new();
//! let policies = Arc::new(PolicyManager::new(PolicyDefaults::default(), events.clone()));
//! let governor = ResourceGovernor::new(policies, events, &GovernorSection::default());
//!
//! let id = ModuleId::new("greeter").unwrap();
//! governor.register_module(&id);
//! governor.update_usage(&id, ResourceType::CpuTime, 12).unwrap();
//! assert_eq!(governor.get_usage(&id).unwrap().get(ResourceType::CpuTime), 12);
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod governor;

pub use error::{GovernorError, GovernorResult};
pub use governor::{ResourceGovernor, UsageSample, UsageSnapshot};
