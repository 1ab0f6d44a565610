use bastion_core::{Classify, ErrorKind};

/// Errors raised by the policy manager.
#[derive(Debug, thiserror::Error)]
pub enum PolicyError {
    /// The supplied policy is malformed.
    #[error("invalid policy: {message}")]
    Validation {
        /// What was wrong.
        message: String,
    },
}

impl PolicyError {
    pub(crate) fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

impl Classify for PolicyError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Validation { .. } => ErrorKind::Validation,
        }
    }
}

/// Result type for policy operations.
pub type PolicyResult<T> = Result<T, PolicyError>;
