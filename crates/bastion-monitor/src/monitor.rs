//! Per-module metric samples, error/warning counters, and derived health.

use std::collections::{BTreeMap, HashMap, VecDeque};
use std::fmt;
use std::time::Duration;

use bastion_config::MonitorSection;
use bastion_core::ModuleId;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{MonitorError, MonitorResult};

/// Name of the metric compared against the memory warning threshold.
pub const MEMORY_METRIC: &str = "memory";

/// Derived health of a module. Never stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    /// No errors, no warnings, memory under threshold.
    Healthy,
    /// Warnings recorded, or latest memory sample above threshold.
    Warning,
    /// At least one error recorded.
    Error,
    /// The module is not monitored.
    Unknown,
}

impl fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Healthy => "healthy",
            Self::Warning => "warning",
            Self::Error => "error",
            Self::Unknown => "unknown",
        })
    }
}

/// One timestamped metric value.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MetricSample {
    /// When the value was recorded.
    pub timestamp: DateTime<Utc>,
    /// The value.
    pub value: f64,
}

#[derive(Debug)]
struct ModuleRecord {
    metrics: HashMap<String, VecDeque<MetricSample>>,
    error_count: u64,
    warning_count: u64,
    last_error: Option<String>,
    last_warning: Option<String>,
    since: DateTime<Utc>,
}

impl ModuleRecord {
    fn new() -> Self {
        Self {
            metrics: HashMap::new(),
            error_count: 0,
            warning_count: 0,
            last_error: None,
            last_warning: None,
            since: Utc::now(),
        }
    }

    fn latest(&self, name: &str) -> Option<f64> {
        self.metrics
            .get(name)
            .and_then(VecDeque::back)
            .map(|s| s.value)
    }

    fn health(&self, memory_warning_bytes: u64) -> HealthStatus {
        if self.error_count > 0 {
            return HealthStatus::Error;
        }
        #[allow(clippy::cast_precision_loss)]
        let threshold = memory_warning_bytes as f64;
        let memory_high = self.latest(MEMORY_METRIC).is_some_and(|m| m > threshold);
        if self.warning_count > 0 || memory_high {
            HealthStatus::Warning
        } else {
            HealthStatus::Healthy
        }
    }
}

/// Point-in-time view of one monitored module.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Module ID.
    pub module_id: ModuleId,
    /// Derived health.
    pub health: HealthStatus,
    /// Errors recorded since monitoring started.
    pub error_count: u64,
    /// Warnings recorded since monitoring started.
    pub warning_count: u64,
    /// Most recent error message.
    pub last_error: Option<String>,
    /// Most recent warning message.
    pub last_warning: Option<String>,
    /// Latest value of every metric.
    pub latest: BTreeMap<String, f64>,
    /// Retained samples per metric.
    pub sample_counts: BTreeMap<String, usize>,
    /// When monitoring started.
    pub monitored_since: DateTime<Utc>,
}

/// Tracks metrics and health for monitored modules.
///
/// Recording against a module that is not monitored fails with
/// [`MonitorError::NotMonitored`]; callers that report best-effort should log
/// and move on.
#[derive(Debug)]
pub struct ModuleMonitor {
    records: DashMap<ModuleId, ModuleRecord>,
    retention: Duration,
    memory_warning_bytes: u64,
}

impl ModuleMonitor {
    /// Create a monitor with no monitored modules.
    #[must_use]
    pub fn new(settings: &MonitorSection) -> Self {
        Self {
            records: DashMap::new(),
            retention: settings.retention(),
            memory_warning_bytes: settings.memory_warning_bytes,
        }
    }

    /// Begin monitoring `id` with an empty record. Restarting resets it.
    pub fn start_monitoring(&self, id: &ModuleId) {
        self.records.insert(id.clone(), ModuleRecord::new());
        debug!(module_id = %id, "Monitoring started");
    }

    /// Stop monitoring `id`. Returns `true` if it was monitored.
    pub fn stop_monitoring(&self, id: &ModuleId) -> bool {
        let removed = self.records.remove(id).is_some();
        if removed {
            debug!(module_id = %id, "Monitoring stopped");
        }
        removed
    }

    /// Whether `id` is monitored.
    #[must_use]
    pub fn is_monitored(&self, id: &ModuleId) -> bool {
        self.records.contains_key(id)
    }

    /// Append a sample for `name`. Samples older than the retention window
    /// are pruned from that series.
    ///
    /// # Errors
    ///
    /// [`MonitorError::InvalidMetricName`] or [`MonitorError::NotMonitored`].
    pub fn record_metric(&self, id: &ModuleId, name: &str, value: f64) -> MonitorResult<()> {
        if name.trim().is_empty() {
            return Err(MonitorError::InvalidMetricName(name.to_owned()));
        }
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| MonitorError::NotMonitored(id.clone()))?;

        let now = Utc::now();
        let series = record.metrics.entry(name.to_owned()).or_default();
        series.push_back(MetricSample {
            timestamp: now,
            value,
        });
        if let Some(cutoff) = TimeDelta::from_std(self.retention)
            .ok()
            .and_then(|age| now.checked_sub_signed(age))
        {
            while series.front().is_some_and(|s| s.timestamp < cutoff) {
                series.pop_front();
            }
        }
        Ok(())
    }

    /// Bump the error counter and remember `message`.
    ///
    /// # Errors
    ///
    /// [`MonitorError::NotMonitored`].
    pub fn record_error(&self, id: &ModuleId, message: impl Into<String>) -> MonitorResult<()> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| MonitorError::NotMonitored(id.clone()))?;
        let message = message.into();
        warn!(module_id = %id, error = %message, "Module error recorded");
        record.error_count = record.error_count.saturating_add(1);
        record.last_error = Some(message);
        Ok(())
    }

    /// Bump the warning counter and remember `message`.
    ///
    /// # Errors
    ///
    /// [`MonitorError::NotMonitored`].
    pub fn record_warning(&self, id: &ModuleId, message: impl Into<String>) -> MonitorResult<()> {
        let mut record = self
            .records
            .get_mut(id)
            .ok_or_else(|| MonitorError::NotMonitored(id.clone()))?;
        let message = message.into();
        debug!(module_id = %id, warning = %message, "Module warning recorded");
        record.warning_count = record.warning_count.saturating_add(1);
        record.last_warning = Some(message);
        Ok(())
    }

    /// Derived health; [`HealthStatus::Unknown`] for unmonitored ids.
    #[must_use]
    pub fn get_module_health(&self, id: &ModuleId) -> HealthStatus {
        self.records
            .get(id)
            .map_or(HealthStatus::Unknown, |r| r.health(self.memory_warning_bytes))
    }

    /// Retained samples for one metric, oldest first.
    #[must_use]
    pub fn samples(&self, id: &ModuleId, name: &str) -> Vec<MetricSample> {
        self.records
            .get(id)
            .and_then(|r| r.metrics.get(name).map(|s| s.iter().copied().collect()))
            .unwrap_or_default()
    }

    /// Snapshot of one module's record.
    ///
    /// # Errors
    ///
    /// [`MonitorError::NotMonitored`].
    pub fn snapshot(&self, id: &ModuleId) -> MonitorResult<MetricsSnapshot> {
        let record = self
            .records
            .get(id)
            .ok_or_else(|| MonitorError::NotMonitored(id.clone()))?;
        let mut latest = BTreeMap::new();
        let mut sample_counts = BTreeMap::new();
        for (name, series) in &record.metrics {
            if let Some(sample) = series.back() {
                latest.insert(name.clone(), sample.value);
            }
            sample_counts.insert(name.clone(), series.len());
        }
        Ok(MetricsSnapshot {
            module_id: id.clone(),
            health: record.health(self.memory_warning_bytes),
            error_count: record.error_count,
            warning_count: record.warning_count,
            last_error: record.last_error.clone(),
            last_warning: record.last_warning.clone(),
            latest,
            sample_counts,
            monitored_since: record.since,
        })
    }

    /// Ids of every monitored module, sorted.
    #[must_use]
    pub fn monitored_modules(&self) -> Vec<ModuleId> {
        let mut ids: Vec<_> = self.records.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }
}
