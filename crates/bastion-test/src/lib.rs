//! Bastion Test - shared fixtures and mock modules.
//!
//! Add as a dev-dependency:
//!
//! ```toml
//! [dev-dependencies]
//! bastion-test.workspace = true
//! ```
//!
//! ```rust,ignore
//! use bastion_test::prelude::*;
//!
//! #[tokio::test]
//! async fn starts() {
//!     let log = CallLog::new();
//!     let natives = NativeRegistry::new().with("rec", {
//!         let log = log.clone();
//!         move || RecordingModule::new(log.clone())
//!     });
//!     let manager = test_manager(natives);
//!     manager.register_manifest(ManifestBuilder::native("rec", "rec").build(), scratch_dir());
//! }
//! ```

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]

pub mod prelude;

pub mod fixtures;
pub mod mocks;

pub use fixtures::*;
pub use mocks::*;
