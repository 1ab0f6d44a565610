//! Event types for the Bastion event bus.

use std::collections::BTreeMap;

use bastion_core::ModuleId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Metadata attached to every event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventMetadata {
    /// Unique event identifier.
    pub event_id: Uuid,
    /// When the event was created.
    pub timestamp: DateTime<Utc>,
    /// Correlation ID for tracing related events.
    pub correlation_id: Option<Uuid>,
    /// Source component that generated the event.
    pub source: String,
}

impl EventMetadata {
    /// Create new event metadata.
    #[must_use]
    pub fn new(source: impl Into<String>) -> Self {
        Self {
            event_id: Uuid::new_v4(),
            timestamp: Utc::now(),
            correlation_id: None,
            source: source.into(),
        }
    }

    /// Set correlation ID.
    #[must_use]
    pub fn with_correlation_id(mut self, id: Uuid) -> Self {
        self.correlation_id = Some(id);
        self
    }
}

impl Default for EventMetadata {
    fn default() -> Self {
        Self::new("unknown")
    }
}

/// Everything the runtime announces to external layers.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RuntimeEvent {
    // ========== Module Lifecycle ==========
    /// A module reached `Loaded` for the first time.
    ModuleLoaded {
        /// Event metadata.
        metadata: EventMetadata,
        /// Module ID.
        module_id: ModuleId,
        /// Manifest version.
        version: String,
    },

    /// A module was torn down.
    ModuleUnloaded {
        /// Event metadata.
        metadata: EventMetadata,
        /// Module ID.
        module_id: ModuleId,
    },

    /// A module's start hook succeeded.
    ModuleStarted {
        /// Event metadata.
        metadata: EventMetadata,
        /// Module ID.
        module_id: ModuleId,
    },

    /// A module's stop hook succeeded.
    ModuleStopped {
        /// Event metadata.
        metadata: EventMetadata,
        /// Module ID.
        module_id: ModuleId,
    },

    /// A module failed to load, or a hook threw or timed out.
    ModuleError {
        /// Event metadata.
        metadata: EventMetadata,
        /// Module ID.
        module_id: ModuleId,
        /// Error description.
        error: String,
    },

    // ========== Policy ==========
    /// A policy was stored for a module.
    PolicyUpdated {
        /// Event metadata.
        metadata: EventMetadata,
        /// Module ID.
        module_id: ModuleId,
    },

    /// A stored policy was removed.
    PolicyRemoved {
        /// Event metadata.
        metadata: EventMetadata,
        /// Module ID.
        module_id: ModuleId,
    },

    // ========== Communication ==========
    /// A message was appended to a channel.
    MessagePublished {
        /// Event metadata.
        metadata: EventMetadata,
        /// Message ID.
        message_id: Uuid,
        /// Channel name.
        channel: String,
        /// Publishing module.
        sender: ModuleId,
        /// Number of mailboxes the message was enqueued into.
        recipients: usize,
    },

    // ========== Resources ==========
    /// A usage update was refused because it would breach a ceiling.
    ResourceLimitExceeded {
        /// Event metadata.
        metadata: EventMetadata,
        /// Module ID.
        module_id: ModuleId,
        /// Resource name (`memory`, `cpu_time`).
        resource: String,
        /// Usage before the refused update.
        current: u64,
        /// Amount that was requested.
        requested: u64,
        /// The ceiling in force.
        ceiling: u64,
    },

    /// The collector sampled process-level counters.
    MetricsCollected {
        /// Event metadata.
        metadata: EventMetadata,
        /// Sample name to value.
        samples: BTreeMap<String, f64>,
    },

    // ========== Marketplace ==========
    /// A developer submitted a module for review.
    ModuleSubmitted {
        /// Event metadata.
        metadata: EventMetadata,
        /// Submission ID.
        submission_id: Uuid,
        /// Module ID.
        module_id: ModuleId,
        /// Submitting developer.
        developer_id: String,
    },

    /// A reviewer approved a submission.
    ModuleApproved {
        /// Event metadata.
        metadata: EventMetadata,
        /// Submission ID.
        submission_id: Uuid,
        /// Module ID.
        module_id: ModuleId,
        /// Reviewer.
        reviewer: String,
    },

    /// A reviewer rejected a submission.
    ModuleRejected {
        /// Event metadata.
        metadata: EventMetadata,
        /// Submission ID.
        submission_id: Uuid,
        /// Module ID.
        module_id: ModuleId,
        /// Reviewer.
        reviewer: String,
        /// Why it was rejected.
        reason: String,
    },

    // ========== Runtime ==========
    /// The module manager finished shutting down.
    Shutdown {
        /// Event metadata.
        metadata: EventMetadata,
        /// Modules that failed to stop cleanly.
        failures: Vec<ModuleId>,
    },
}

impl RuntimeEvent {
    /// Get the event metadata.
    #[must_use]
    pub fn metadata(&self) -> &EventMetadata {
        match self {
            Self::ModuleLoaded { metadata, .. }
            | Self::ModuleUnloaded { metadata, .. }
            | Self::ModuleStarted { metadata, .. }
            | Self::ModuleStopped { metadata, .. }
            | Self::ModuleError { metadata, .. }
            | Self::PolicyUpdated { metadata, .. }
            | Self::PolicyRemoved { metadata, .. }
            | Self::MessagePublished { metadata, .. }
            | Self::ResourceLimitExceeded { metadata, .. }
            | Self::MetricsCollected { metadata, .. }
            | Self::ModuleSubmitted { metadata, .. }
            | Self::ModuleApproved { metadata, .. }
            | Self::ModuleRejected { metadata, .. }
            | Self::Shutdown { metadata, .. } => metadata,
        }
    }

    /// Get the event type as a string.
    #[must_use]
    pub fn event_type(&self) -> &'static str {
        match self {
            // Lifecycle
            Self::ModuleLoaded { .. } => "module_loaded",
            Self::ModuleUnloaded { .. } => "module_unloaded",
            Self::ModuleStarted { .. } => "module_started",
            Self::ModuleStopped { .. } => "module_stopped",
            Self::ModuleError { .. } => "module_error",
            // Policy
            Self::PolicyUpdated { .. } => "policy_updated",
            Self::PolicyRemoved { .. } => "policy_removed",
            // Communication
            Self::MessagePublished { .. } => "message_published",
            // Resources
            Self::ResourceLimitExceeded { .. } => "resource_limit_exceeded",
            Self::MetricsCollected { .. } => "metrics_collected",
            // Marketplace
            Self::ModuleSubmitted { .. } => "module_submitted",
            Self::ModuleApproved { .. } => "module_approved",
            Self::ModuleRejected { .. } => "module_rejected",
            // Runtime
            Self::Shutdown { .. } => "shutdown",
        }
    }

    /// The module this event concerns, if any.
    #[must_use]
    pub fn module_id(&self) -> Option<&ModuleId> {
        match self {
            Self::ModuleLoaded { module_id, .. }
            | Self::ModuleUnloaded { module_id, .. }
            | Self::ModuleStarted { module_id, .. }
            | Self::ModuleStopped { module_id, .. }
            | Self::ModuleError { module_id, .. }
            | Self::PolicyUpdated { module_id, .. }
            | Self::PolicyRemoved { module_id, .. }
            | Self::ResourceLimitExceeded { module_id, .. }
            | Self::ModuleSubmitted { module_id, .. }
            | Self::ModuleApproved { module_id, .. }
            | Self::ModuleRejected { module_id, .. } => Some(module_id),
            Self::MessagePublished { sender, .. } => Some(sender),
            Self::MetricsCollected { .. } | Self::Shutdown { .. } => None,
        }
    }

    /// Check if this is a module lifecycle event.
    #[must_use]
    pub fn is_lifecycle_event(&self) -> bool {
        matches!(
            self,
            Self::ModuleLoaded { .. }
                | Self::ModuleUnloaded { .. }
                | Self::ModuleStarted { .. }
                | Self::ModuleStopped { .. }
                | Self::ModuleError { .. }
        )
    }

    /// Check if this is a marketplace event.
    #[must_use]
    pub fn is_marketplace_event(&self) -> bool {
        matches!(
            self,
            Self::ModuleSubmitted { .. } | Self::ModuleApproved { .. } | Self::ModuleRejected { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> ModuleId {
        ModuleId::new(s).unwrap()
    }

    #[test]
    fn serializes_with_snake_case_tag() {
        let event = RuntimeEvent::ModuleStarted {
            metadata: EventMetadata::new("runtime"),
            module_id: id("greeter"),
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], "module_started");
        assert_eq!(json["module_id"], "greeter");
    }

    #[test]
    fn event_type_matches_serde_tag() {
        let event = RuntimeEvent::ResourceLimitExceeded {
            metadata: EventMetadata::new("governor"),
            module_id: id("m1"),
            resource: "memory".into(),
            current: 0,
            requested: 100,
            ceiling: 64,
        };
        let json = serde_json::to_value(&event).unwrap();
        assert_eq!(json["type"], event.event_type());
    }

    #[test]
    fn module_id_accessor() {
        let shutdown = RuntimeEvent::Shutdown {
            metadata: EventMetadata::default(),
            failures: vec![],
        };
        assert!(shutdown.module_id().is_none());

        let published = RuntimeEvent::MessagePublished {
            metadata: EventMetadata::new("bus"),
            message_id: Uuid::new_v4(),
            channel: "c1".into(),
            sender: id("mod-a"),
            recipients: 1,
        };
        assert_eq!(published.module_id(), Some(&id("mod-a")));
        assert!(!published.is_lifecycle_event());
    }

    #[test]
    fn metadata_builder() {
        let corr = Uuid::new_v4();
        let meta = EventMetadata::new("test").with_correlation_id(corr);
        assert_eq!(meta.correlation_id, Some(corr));
        assert_eq!(meta.source, "test");
    }
}
