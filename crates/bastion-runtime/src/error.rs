use std::path::PathBuf;

use bastion_bus::BusError;
use bastion_core::{Classify, ErrorKind, ManifestError, ModuleId};
use bastion_governor::GovernorError;
use thiserror::Error;

use crate::engine::Hook;
use crate::runtime::ModuleState;

/// Errors raised while loading, running, or managing modules.
#[derive(Debug, Error)]
pub enum RuntimeError {
    /// No catalog entry or live instance for this id.
    #[error("module not found: {0}")]
    NotFound(ModuleId),

    /// The manifest could not be read or failed validation.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// The entry point is missing, unreadable, or lacks a lifecycle hook.
    #[error("cannot resolve code for {module_id}: {reason}")]
    CodeResolution {
        /// Module ID.
        module_id: ModuleId,
        /// What went wrong.
        reason: String,
    },

    /// The isolated execution context could not be built.
    #[error("cannot create sandbox for {module_id}: {reason}")]
    SandboxCreation {
        /// Module ID.
        module_id: ModuleId,
        /// What went wrong.
        reason: String,
    },

    /// An instance with this id already exists.
    #[error("module already loaded: {0}")]
    AlreadyLoaded(ModuleId),

    /// `start` on a running instance.
    #[error("module already running: {0}")]
    AlreadyRunning(ModuleId),

    /// `stop` on an instance that is not running.
    #[error("module not running: {0}")]
    AlreadyStopped(ModuleId),

    /// The operation is not valid in the instance's current state.
    #[error("cannot {operation} {module_id} while {state}")]
    InvalidState {
        /// Module ID.
        module_id: ModuleId,
        /// Current state.
        state: ModuleState,
        /// Attempted operation.
        operation: &'static str,
    },

    /// A lifecycle hook returned an error.
    #[error("{hook} hook failed for {module_id}: {message}")]
    HookFailed {
        /// Module ID.
        module_id: ModuleId,
        /// Hook that failed.
        hook: Hook,
        /// Error reported by the module.
        message: String,
    },

    /// A lifecycle hook exceeded the invocation timeout.
    #[error("{hook} hook timed out for {module_id} after {timeout_ms} ms")]
    Timeout {
        /// Module ID.
        module_id: ModuleId,
        /// Hook that timed out.
        hook: Hook,
        /// Timeout in force.
        timeout_ms: u64,
    },

    /// A manifest directory could not be walked.
    #[error("failed to scan {path}: {message}")]
    Scan {
        /// Directory being scanned.
        path: PathBuf,
        /// Underlying error.
        message: String,
    },

    /// Communication bus error.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Resource governor error.
    #[error(transparent)]
    Governor(#[from] GovernorError),
}

impl RuntimeError {
    /// Whether this error came out of module code (hook failure or timeout).
    #[must_use]
    pub fn is_execution_failure(&self) -> bool {
        matches!(self, Self::HookFailed { .. } | Self::Timeout { .. })
    }
}

impl Classify for RuntimeError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Manifest(e) => e.kind(),
            Self::CodeResolution { .. } => ErrorKind::Validation,
            Self::SandboxCreation { .. } | Self::Scan { .. } => ErrorKind::Internal,
            Self::AlreadyLoaded(_)
            | Self::AlreadyRunning(_)
            | Self::AlreadyStopped(_)
            | Self::InvalidState { .. } => ErrorKind::Conflict,
            Self::HookFailed { .. } | Self::Timeout { .. } => ErrorKind::SandboxExecution,
            Self::Bus(e) => e.kind(),
            Self::Governor(e) => e.kind(),
        }
    }
}

/// Result type for runtime operations.
pub type RuntimeResult<T> = Result<T, RuntimeError>;
