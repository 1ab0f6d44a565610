use bastion_core::{Classify, ErrorKind, ManifestError, ModuleId};
use uuid::Uuid;

use crate::submission::SubmissionStatus;

/// Errors raised by the marketplace workflow and its store.
#[derive(Debug, thiserror::Error)]
pub enum MarketplaceError {
    /// The submitted manifest is invalid.
    #[error(transparent)]
    Manifest(#[from] ManifestError),

    /// A request field is missing or malformed.
    #[error("invalid {field}: {reason}")]
    Validation {
        /// Offending field.
        field: &'static str,
        /// What was wrong with it.
        reason: String,
    },

    /// The module already has a pending or approved submission.
    #[error("module {module_id} already has a {status} submission ({existing})")]
    Conflict {
        /// Module ID.
        module_id: ModuleId,
        /// The blocking submission.
        existing: Uuid,
        /// Its status.
        status: SubmissionStatus,
    },

    /// No submission with this id.
    #[error("submission not found: {0}")]
    NotFound(Uuid),

    /// The submission was already decided.
    #[error("submission {submission_id} is already {status}")]
    TerminalState {
        /// Submission ID.
        submission_id: Uuid,
        /// Its final status.
        status: SubmissionStatus,
    },

    /// The backing store failed.
    #[error("submission store error: {0}")]
    Store(String),
}

impl MarketplaceError {
    pub(crate) fn validation(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Validation {
            field,
            reason: reason.into(),
        }
    }
}

impl Classify for MarketplaceError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Manifest(e) => e.kind(),
            Self::Validation { .. } => ErrorKind::Validation,
            Self::Conflict { .. } | Self::TerminalState { .. } => ErrorKind::Conflict,
            Self::NotFound(_) => ErrorKind::NotFound,
            Self::Store(_) => ErrorKind::Internal,
        }
    }
}

/// Result type for marketplace operations.
pub type MarketplaceResult<T> = Result<T, MarketplaceError>;
