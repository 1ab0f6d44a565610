//! Bastion Telemetry - logging setup for the Bastion module runtime.
//!
//! Every Bastion crate logs through `tracing` with structured fields
//! (`module_id = %id`, `channel = %name`). This crate installs the global
//! subscriber: an `EnvFilter` built from a level plus per-crate directives,
//! and one `fmt` layer in pretty, compact or JSON form writing to stdout,
//! stderr, or daily-rotated files.
//!
//! # Example
//!
//! ```rust,no_run
//! use bastion_telemetry::{LogConfig, LogFormat, setup_logging};
//!
//! # fn main() -> Result<(), bastion_telemetry::TelemetryError> {
//! let config = LogConfig::new("debug")
//!     .with_format(LogFormat::Compact)
//!     .with_directive("bastion_bus=trace");
//!
//! let _guard = setup_logging(&config)?;
//! tracing::info!(module_id = "greeter", "module loaded");
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]
#![deny(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod error;
mod logging;

pub use error::{TelemetryError, TelemetryResult};
pub use logging::{LogConfig, LogFormat, LogGuard, LogTarget, setup_default_logging, setup_logging};
