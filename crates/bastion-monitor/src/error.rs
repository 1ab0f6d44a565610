use bastion_core::{Classify, ErrorKind, ModuleId};

/// Errors raised by the module monitor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum MonitorError {
    /// `start_monitoring` was never called for this module, or it was stopped.
    #[error("module is not monitored: {0}")]
    NotMonitored(ModuleId),

    /// Metric names must be non-empty.
    #[error("invalid metric name: {0:?}")]
    InvalidMetricName(String),
}

impl Classify for MonitorError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotMonitored(_) => ErrorKind::NotFound,
            Self::InvalidMetricName(_) => ErrorKind::Validation,
        }
    }
}

/// Result type for monitor operations.
pub type MonitorResult<T> = Result<T, MonitorError>;
