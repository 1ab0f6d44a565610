use bastion_core::{Classify, ErrorKind, ModuleId};

/// Errors raised by the communication bus.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BusError {
    /// Channel names must be non-empty and free of whitespace.
    #[error("invalid channel name: {0:?}")]
    InvalidChannelName(String),

    /// A channel with this name already exists.
    #[error("channel already exists: {0}")]
    ChannelExists(String),

    /// No channel with this name.
    #[error("channel not found: {0}")]
    ChannelNotFound(String),

    /// The module is neither the creator nor a subscriber of the channel.
    #[error("{module_id} is not a member of channel {channel}")]
    NotSubscribed {
        /// Offending module.
        module_id: ModuleId,
        /// Channel name.
        channel: String,
    },

    /// The module lacks the permission the action requires.
    #[error("{module_id} may not {action} on channel {channel}")]
    PermissionDenied {
        /// Offending module.
        module_id: ModuleId,
        /// What was attempted.
        action: &'static str,
        /// Channel name.
        channel: String,
    },
}

impl Classify for BusError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::InvalidChannelName(_) => ErrorKind::Validation,
            Self::ChannelExists(_) => ErrorKind::Conflict,
            Self::ChannelNotFound(_) => ErrorKind::NotFound,
            Self::NotSubscribed { .. } | Self::PermissionDenied { .. } => {
                ErrorKind::PermissionDenied
            },
        }
    }
}

/// Result type for bus operations.
pub type BusResult<T> = Result<T, BusError>;
