//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bastion_telemetry::prelude::*;` to import all essential types.

pub use crate::{LogConfig, LogFormat, LogGuard, LogTarget, setup_default_logging, setup_logging};

pub use crate::{TelemetryError, TelemetryResult};
