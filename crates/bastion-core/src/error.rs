//! Error taxonomy shared by every Bastion crate.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Coarse classification of every fallible core operation.
///
/// Each crate keeps its own error enum; boundary layers (HTTP, CLI) only need
/// the kind to pick a response.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Bad manifest, policy, or request shape.
    Validation,
    /// Unknown module, channel, or submission.
    NotFound,
    /// Policy or membership violation.
    PermissionDenied,
    /// A resource ceiling would have been breached.
    ResourceLimitExceeded,
    /// Module code threw or timed out.
    SandboxExecution,
    /// Duplicate id, or an action against a terminal/incompatible state.
    Conflict,
    /// Anything else (store failures, poisoned locks).
    Internal,
}

impl ErrorKind {
    /// The status code a request/response boundary should map this kind to.
    #[must_use]
    pub fn status_code(self) -> u16 {
        match self {
            Self::Validation => 400,
            Self::PermissionDenied => 403,
            Self::NotFound => 404,
            Self::Conflict => 409,
            Self::ResourceLimitExceeded => 429,
            Self::SandboxExecution | Self::Internal => 500,
        }
    }
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Validation => "validation",
            Self::NotFound => "not_found",
            Self::PermissionDenied => "permission_denied",
            Self::ResourceLimitExceeded => "resource_limit_exceeded",
            Self::SandboxExecution => "sandbox_execution",
            Self::Conflict => "conflict",
            Self::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Implemented by every error enum in the workspace.
pub trait Classify {
    /// The taxonomy bucket for this error.
    fn kind(&self) -> ErrorKind;
}

/// Errors raised while reading or validating a module manifest.
#[derive(Debug, Error)]
pub enum ManifestError {
    /// A field is missing or malformed.
    #[error("invalid manifest field `{field}`: {reason}")]
    Validation {
        /// Name of the offending field.
        field: String,
        /// What was wrong with it.
        reason: String,
    },

    /// The manifest document could not be parsed.
    #[error("failed to parse manifest at {path}: {message}")]
    Parse {
        /// Where the manifest came from.
        path: PathBuf,
        /// The parser message.
        message: String,
    },

    /// The manifest file could not be read.
    #[error("failed to read manifest at {path}: {source}")]
    Io {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        #[source]
        source: std::io::Error,
    },

    /// The file extension is neither `.toml` nor `.json`.
    #[error("unsupported manifest format: {0}")]
    UnsupportedFormat(PathBuf),
}

impl ManifestError {
    pub(crate) fn validation(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::Validation {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// The offending field, if this is a validation error.
    #[must_use]
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::Validation { field, .. } => Some(field),
            _ => None,
        }
    }
}

impl Classify for ManifestError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } => ErrorKind::Internal,
            Self::Validation { .. } | Self::Parse { .. } | Self::UnsupportedFormat(_) => {
                ErrorKind::Validation
            },
        }
    }
}

/// Result type for manifest operations.
pub type ManifestResult<T> = Result<T, ManifestError>;
