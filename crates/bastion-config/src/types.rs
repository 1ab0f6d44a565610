//! Configuration types for the Bastion runtime.
//!
//! This crate has no dependency on other Bastion crates; the runtime converts
//! these sections into domain types at construction time. Every struct
//! implements [`Default`] with the same values as `defaults.toml`, so a bare
//! `[section]` header produces a working configuration.

use std::time::Duration;

use serde::{Deserialize, Serialize};

const MIB: u64 = 1024 * 1024;
const SANDBOX_MAX_MEMORY: u64 = 256 * MIB;
const POLICY_MAX_MEMORY: u64 = 64 * MIB;
const MEMORY_WARNING: u64 = 100 * MIB;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BastionConfig {
    /// Sandbox construction limits.
    pub sandbox: SandboxSection,
    /// Default policy ceilings.
    pub policy: PolicySection,
    /// Resource history retention.
    pub governor: GovernorSection,
    /// Channel log and event bus sizing.
    pub bus: BusSection,
    /// Metrics retention, health thresholds and the periodic collector.
    pub monitor: MonitorSection,
    /// Log level, format and per-crate directives.
    pub logging: LoggingSection,
}

/// Sandbox limits.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    /// Wall-clock limit for one hook invocation, in milliseconds.
    pub invocation_timeout_ms: u64,
    /// Largest value `invocation_timeout_ms` may take.
    pub max_invocation_timeout_ms: u64,
    /// Largest memory ceiling a policy may grant, in bytes.
    pub max_memory_bytes: u64,
    /// Require a blake3 hash on every wasm entry point.
    pub require_hash: bool,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            invocation_timeout_ms: 5_000,
            max_invocation_timeout_ms: 60_000,
            max_memory_bytes: SANDBOX_MAX_MEMORY,
            require_hash: false,
        }
    }
}

impl SandboxSection {
    /// The per-invocation timeout as a [`Duration`].
    #[must_use]
    pub fn invocation_timeout(&self) -> Duration {
        Duration::from_millis(self.invocation_timeout_ms)
    }
}

/// Ceilings used for the synthesized default policy.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicySection {
    /// Default memory ceiling in bytes.
    pub default_max_memory_bytes: u64,
    /// Default accumulated CPU time ceiling in milliseconds.
    pub default_max_cpu_time_ms: u64,
}

impl Default for PolicySection {
    fn default() -> Self {
        Self {
            default_max_memory_bytes: POLICY_MAX_MEMORY,
            default_max_cpu_time_ms: 60_000,
        }
    }
}

/// Resource governor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GovernorSection {
    /// History samples older than this are pruned on write.
    pub history_retention_secs: u64,
    /// Hard cap on samples kept per `(module, resource)`.
    pub max_history_entries: usize,
}

impl Default for GovernorSection {
    fn default() -> Self {
        Self {
            history_retention_secs: 3_600,
            max_history_entries: 10_000,
        }
    }
}

impl GovernorSection {
    /// Retention window as a [`Duration`].
    #[must_use]
    pub fn history_retention(&self) -> Duration {
        Duration::from_secs(self.history_retention_secs)
    }
}

/// Communication bus settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSection {
    /// Messages kept per channel; the oldest are evicted first.
    pub message_log_capacity: usize,
    /// Buffer size of the runtime event broadcast channel.
    pub event_capacity: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        Self {
            message_log_capacity: 1_000,
            event_capacity: 1_024,
        }
    }
}

/// Monitor settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct MonitorSection {
    /// Metric samples older than this are pruned on write.
    pub retention_secs: u64,
    /// A latest `memory` sample above this yields `warning` health.
    pub memory_warning_bytes: u64,
    /// Whether the manager spawns the periodic collector.
    pub collector_enabled: bool,
    /// Collector period.
    pub collect_interval_secs: u64,
}

impl Default for MonitorSection {
    fn default() -> Self {
        Self {
            retention_secs: 3_600,
            memory_warning_bytes: MEMORY_WARNING,
            collector_enabled: true,
            collect_interval_secs: 30,
        }
    }
}

impl MonitorSection {
    /// Retention window as a [`Duration`].
    #[must_use]
    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_secs)
    }

    /// Collector period as a [`Duration`].
    #[must_use]
    pub fn collect_interval(&self) -> Duration {
        Duration::from_secs(self.collect_interval_secs)
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingSection {
    /// Global level filter (`trace`, `debug`, `info`, `warn`, `error`).
    pub level: String,
    /// `pretty`, `compact` or `json`.
    pub format: String,
    /// Per-crate tracing directives (e.g. `bastion_bus=debug`).
    pub directives: Vec<String>,
}

impl Default for LoggingSection {
    fn default() -> Self {
        Self {
            level: "info".to_owned(),
            format: "pretty".to_owned(),
            directives: Vec::new(),
        }
    }
}
