//! Prelude module - commonly used types for convenient import.
//!
//! Use `use bastion_monitor::prelude::*;` to import all essential types.

pub use crate::{Collector, HealthStatus, MetricsSnapshot, MetricsSource, ModuleMonitor};

pub use crate::{MonitorError, MonitorResult};
