//! Timer-driven sampling of process-level and runtime-wide counters.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bastion_core::ModuleId;
use bastion_events::{EventBus, EventMetadata, RuntimeEvent};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::monitor::{MEMORY_METRIC, ModuleMonitor};

const EVENT_SOURCE: &str = "monitor";

/// Something the collector can sample on every tick.
pub trait MetricsSource: Send + Sync {
    /// Short name used in logs.
    fn name(&self) -> &str;

    /// Current values keyed by metric name.
    fn sample(&self) -> BTreeMap<String, f64>;
}

/// Samples the host process through `getrusage(RUSAGE_SELF)`.
///
/// Reports `memory` (peak resident set, bytes), `cpu_user_ms` and
/// `cpu_system_ms`. Yields nothing on non-unix targets.
#[derive(Debug, Default, Clone, Copy)]
pub struct ProcessProbe;

impl MetricsSource for ProcessProbe {
    fn name(&self) -> &str {
        "process"
    }

    #[cfg(unix)]
    #[allow(clippy::cast_precision_loss)]
    fn sample(&self) -> BTreeMap<String, f64> {
        use nix::sys::resource::{UsageWho, getrusage};
        use nix::sys::time::TimeValLike;

        let mut samples = BTreeMap::new();
        match getrusage(UsageWho::RUSAGE_SELF) {
            Ok(usage) => {
                // Linux reports max_rss in KiB.
                let rss_bytes = usage.max_rss().saturating_mul(1024);
                samples.insert(MEMORY_METRIC.to_owned(), rss_bytes as f64);
                samples.insert(
                    "cpu_user_ms".to_owned(),
                    usage.user_time().num_milliseconds() as f64,
                );
                samples.insert(
                    "cpu_system_ms".to_owned(),
                    usage.system_time().num_milliseconds() as f64,
                );
            },
            Err(e) => warn!(error = %e, "getrusage failed"),
        }
        samples
    }

    #[cfg(not(unix))]
    fn sample(&self) -> BTreeMap<String, f64> {
        BTreeMap::new()
    }
}

/// Periodic collector.
///
/// Every tick samples all sources, records each value under the reserved
/// `system` module id, and publishes one `metrics_collected` event.
pub struct Collector {
    monitor: Arc<ModuleMonitor>,
    events: EventBus,
    sources: Vec<Arc<dyn MetricsSource>>,
    interval: Duration,
}

impl fmt::Debug for Collector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Collector")
            .field("sources", &self.sources.iter().map(|s| s.name()).collect::<Vec<_>>())
            .field("interval", &self.interval)
            .finish_non_exhaustive()
    }
}

impl Collector {
    /// Create a collector with no sources.
    #[must_use]
    pub fn new(monitor: Arc<ModuleMonitor>, events: EventBus, interval: Duration) -> Self {
        Self {
            monitor,
            events,
            sources: Vec::new(),
            interval,
        }
    }

    /// Add a source.
    #[must_use]
    pub fn with_source(mut self, source: Arc<dyn MetricsSource>) -> Self {
        self.sources.push(source);
        self
    }

    /// Run one sampling pass and return what was recorded.
    pub fn collect_once(&self) -> BTreeMap<String, f64> {
        let system = ModuleId::system();
        if !self.monitor.is_monitored(&system) {
            self.monitor.start_monitoring(&system);
        }

        let mut samples = BTreeMap::new();
        for source in &self.sources {
            samples.extend(source.sample());
        }
        for (name, value) in &samples {
            if let Err(e) = self.monitor.record_metric(&system, name, *value) {
                warn!(metric = %name, error = %e, "Failed to record collected metric");
            }
        }

        debug!(count = samples.len(), "Metrics collected");
        self.events.publish(RuntimeEvent::MetricsCollected {
            metadata: EventMetadata::new(EVENT_SOURCE),
            samples: samples.clone(),
        });
        samples
    }

    /// Spawn the collection loop. It stops when `token` is cancelled.
    ///
    /// The first pass runs immediately.
    #[must_use]
    pub fn spawn(self, token: CancellationToken) -> JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            info!(interval_secs = self.interval.as_secs(), "Metrics collector started");
            loop {
                tokio::select! {
                    () = token.cancelled() => break,
                    _ = ticker.tick() => {
                        self.collect_once();
                    },
                }
            }
            info!("Metrics collector stopped");
        })
    }
}
