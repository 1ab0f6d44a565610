//! Bastion Core - Shared types for the Bastion module runtime.
//!
//! This crate provides:
//! - [`ModuleId`], the validated identifier every other crate keys on
//! - [`ModuleManifest`], the contract a module must satisfy to be loaded
//! - [`Capability`] and [`ResourceType`], the vocabulary of policies and ceilings
//! - [`ErrorKind`] and [`Classify`], the error taxonomy boundary layers map
//!   onto status codes
//!
//! # Example
//!
//! ```rust
//! use bastion_core::{ModuleId, ModuleManifest};
//!
//! let manifest = ModuleManifest::from_toml_str(
//!     r#"
//!     id = "greeter"
//!     name = "Greeter"
//!     version = "1.0.0"
//!     events = ["user.joined"]
//!
//!     [entry]
//!     type = "native"
//!     symbol = "greeter"
//!     "#,
//! )
//! .unwrap();
//!
//! assert_eq!(manifest.id, ModuleId::new("greeter").unwrap());
//! assert!(manifest.declares_event("user.joined"));
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod id;
mod manifest;
mod resource;

pub use error::{Classify, ErrorKind, ManifestError, ManifestResult};
pub use id::{ModuleId, SYSTEM_MODULE_ID};
pub use manifest::{EntryPoint, ManifestFormat, ModuleManifest, is_valid_version};
pub use resource::{Capability, ResourceType};
