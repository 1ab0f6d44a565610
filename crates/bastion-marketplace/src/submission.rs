//! Submission records and their audit trail.

use std::fmt;

use bastion_core::{ModuleId, ModuleManifest};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Review status. `Approved` and `Rejected` are terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmissionStatus {
    /// Awaiting review.
    Pending,
    /// Accepted; the module has a policy and is monitored.
    Approved,
    /// Declined with a reason.
    Rejected,
}

impl SubmissionStatus {
    /// Whether no further transition is possible.
    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }

    /// Whether a submission in this status blocks a new one for the same
    /// module.
    #[must_use]
    pub fn blocks_resubmission(self) -> bool {
        matches!(self, Self::Pending | Self::Approved)
    }
}

impl fmt::Display for SubmissionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Pending => f.write_str("pending"),
            Self::Approved => f.write_str("approved"),
            Self::Rejected => f.write_str("rejected"),
        }
    }
}

/// A developer's request to publish a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Submission {
    /// Submission ID.
    pub id: Uuid,
    /// Module the manifest declares.
    pub module_id: ModuleId,
    /// Submitting developer.
    pub developer_id: String,
    /// The validated manifest.
    pub manifest: ModuleManifest,
    /// Current status.
    pub status: SubmissionStatus,
    /// When it was submitted.
    pub submitted_at: DateTime<Utc>,
    /// When it was decided.
    pub reviewed_at: Option<DateTime<Utc>>,
    /// Who decided it.
    pub reviewer: Option<String>,
    /// Why it was rejected.
    pub rejection_reason: Option<String>,
}

impl Submission {
    pub(crate) fn new(developer_id: String, manifest: ModuleManifest) -> Self {
        Self {
            id: Uuid::new_v4(),
            module_id: manifest.id.clone(),
            developer_id,
            manifest,
            status: SubmissionStatus::Pending,
            submitted_at: Utc::now(),
            reviewed_at: None,
            reviewer: None,
            rejection_reason: None,
        }
    }

    pub(crate) fn decide(
        &mut self,
        status: SubmissionStatus,
        reviewer: String,
        reason: Option<String>,
    ) {
        self.status = status;
        self.reviewed_at = Some(Utc::now());
        self.reviewer = Some(reviewer);
        self.rejection_reason = reason;
    }
}

/// What happened to a submission.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    /// Created.
    Submitted,
    /// Approved by a reviewer.
    Approved,
    /// Rejected by a reviewer.
    Rejected,
}

/// One entry in a submission's audit trail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditRecord {
    /// Submission the entry belongs to.
    pub submission_id: Uuid,
    /// What happened.
    pub action: AuditAction,
    /// Developer or reviewer responsible.
    pub actor: String,
    /// Extra context, e.g. a rejection reason.
    pub detail: Option<String>,
    /// When it happened.
    pub timestamp: DateTime<Utc>,
}

impl AuditRecord {
    pub(crate) fn new(
        submission_id: Uuid,
        action: AuditAction,
        actor: &str,
        detail: Option<String>,
    ) -> Self {
        Self {
            submission_id,
            action,
            actor: actor.to_owned(),
            detail,
            timestamp: Utc::now(),
        }
    }
}
