use bastion_core::{Classify, ErrorKind, ModuleId, ResourceType};

/// Errors raised by the resource governor.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GovernorError {
    /// The module was never registered, or has been unregistered.
    #[error("module not registered with the governor: {0}")]
    NotRegistered(ModuleId),

    /// Committing the update would push usage above the ceiling.
    #[error(
        "{resource} limit exceeded for {module_id}: {current} + {requested} > {ceiling} {}",
        resource.unit()
    )]
    LimitExceeded {
        /// Module ID.
        module_id: ModuleId,
        /// Resource that would be breached.
        resource: ResourceType,
        /// Usage before the refused update.
        current: u64,
        /// Requested amount.
        requested: u64,
        /// Ceiling in force.
        ceiling: u64,
    },
}

impl Classify for GovernorError {
    fn kind(&self) -> ErrorKind {
        match self {
            Self::NotRegistered(_) => ErrorKind::NotFound,
            Self::LimitExceeded { .. } => ErrorKind::ResourceLimitExceeded,
        }
    }
}

/// Result type for governor operations.
pub type GovernorResult<T> = Result<T, GovernorError>;
