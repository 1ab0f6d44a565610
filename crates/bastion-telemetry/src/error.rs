//! Telemetry error types.

use std::path::PathBuf;

use thiserror::Error;

/// Errors raised while installing the global subscriber.
#[derive(Debug, Error)]
pub enum TelemetryError {
    /// The level or a directive is not a valid `EnvFilter` expression.
    #[error("invalid log filter '{filter}': {message}")]
    InvalidFilter {
        /// The offending level or directive.
        filter: String,
        /// Parser message.
        message: String,
    },

    /// An unknown format name was supplied.
    #[error("unknown log format '{0}'; expected pretty, compact or json")]
    UnknownFormat(String),

    /// A global subscriber is already installed.
    #[error("logging already initialized: {0}")]
    AlreadyInitialized(String),

    /// The log directory could not be created.
    #[error("failed to create log directory {path}: {source}")]
    LogDirectory {
        /// Directory path.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },
}

/// Result type for telemetry operations.
pub type TelemetryResult<T> = Result<T, TelemetryError>;
