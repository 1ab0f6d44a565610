//! Bastion Monitor - per-module metrics and derived health.
//!
//! Health is computed on read from the record's counters and latest
//! `memory` sample: `error` beats `warning` beats `healthy`, and an
//! unmonitored module is `unknown`. The [`Collector`] adds the only
//! purely time-driven behaviour in the runtime, sampling process and
//! runtime-wide counters under the reserved `system` id.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::all)]
#![warn(unreachable_pub)]
#![deny(clippy::unwrap_used)]
#![cfg_attr(test, allow(clippy::unwrap_used))]

pub mod prelude;

mod collector;
mod error;
mod monitor;

pub use collector::{Collector, MetricsSource, ProcessProbe};
pub use error::{MonitorError, MonitorResult};
pub use monitor::{HealthStatus, MEMORY_METRIC, MetricSample, MetricsSnapshot, ModuleMonitor};
