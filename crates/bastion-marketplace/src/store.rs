//! Persistence for submissions.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use bastion_core::ModuleId;
use uuid::Uuid;

use crate::error::{MarketplaceError, MarketplaceResult};
use crate::submission::{AuditRecord, Submission, SubmissionStatus};

/// Storage backend for the marketplace.
///
/// `insert` is the authoritative uniqueness guard: it must refuse a
/// submission whose module already has a pending or approved one, atomically
/// with the write. `update` is a compare-and-set on the status.
#[async_trait::async_trait]
pub trait SubmissionStore: Send + Sync {
    /// Store a new submission.
    ///
    /// # Errors
    ///
    /// [`MarketplaceError::Conflict`] if the module is blocked.
    async fn insert(&self, submission: Submission) -> MarketplaceResult<()>;

    /// Fetch a submission.
    async fn get(&self, id: Uuid) -> MarketplaceResult<Option<Submission>>;

    /// Replace a submission whose stored status is still `expected`.
    ///
    /// # Errors
    ///
    /// [`MarketplaceError::NotFound`], or
    /// [`MarketplaceError::TerminalState`] if the status moved on.
    async fn update(
        &self,
        submission: Submission,
        expected: SubmissionStatus,
    ) -> MarketplaceResult<()>;

    /// Every submission for a module, oldest first.
    async fn find_by_module_id(&self, module_id: &ModuleId) -> MarketplaceResult<Vec<Submission>>;

    /// Every submission, optionally filtered by status, oldest first.
    async fn list(&self, status: Option<SubmissionStatus>) -> MarketplaceResult<Vec<Submission>>;

    /// Append to a submission's audit trail.
    async fn append_audit(&self, record: AuditRecord) -> MarketplaceResult<()>;

    /// A submission's audit trail, oldest first.
    async fn audit_trail(&self, submission_id: Uuid) -> MarketplaceResult<Vec<AuditRecord>>;
}

/// In-memory store for tests and single-process deployments.
#[derive(Debug, Default)]
pub struct InMemorySubmissionStore {
    submissions: RwLock<HashMap<Uuid, Submission>>,
    audit: RwLock<Vec<AuditRecord>>,
}

impl InMemorySubmissionStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Wrap in an Arc for sharing.
    #[must_use]
    pub fn shared(self) -> Arc<Self> {
        Arc::new(self)
    }
}

fn poisoned<T>(what: &'static str) -> impl FnOnce(PoisonError<T>) -> MarketplaceError {
    move |e| MarketplaceError::Store(format!("failed to lock {what}: {e}"))
}

fn sorted(mut submissions: Vec<Submission>) -> Vec<Submission> {
    submissions.sort_by(|a, b| {
        a.submitted_at
            .cmp(&b.submitted_at)
            .then_with(|| a.id.cmp(&b.id))
    });
    submissions
}

#[async_trait::async_trait]
impl SubmissionStore for InMemorySubmissionStore {
    async fn insert(&self, submission: Submission) -> MarketplaceResult<()> {
        let mut submissions = self.submissions.write().map_err(poisoned("submissions"))?;
        if let Some(existing) = submissions
            .values()
            .find(|s| s.module_id == submission.module_id && s.status.blocks_resubmission())
        {
            return Err(MarketplaceError::Conflict {
                module_id: submission.module_id,
                existing: existing.id,
                status: existing.status,
            });
        }
        submissions.insert(submission.id, submission);
        Ok(())
    }

    async fn get(&self, id: Uuid) -> MarketplaceResult<Option<Submission>> {
        let submissions = self.submissions.read().map_err(poisoned("submissions"))?;
        Ok(submissions.get(&id).cloned())
    }

    async fn update(
        &self,
        submission: Submission,
        expected: SubmissionStatus,
    ) -> MarketplaceResult<()> {
        let mut submissions = self.submissions.write().map_err(poisoned("submissions"))?;
        let stored = submissions
            .get_mut(&submission.id)
            .ok_or(MarketplaceError::NotFound(submission.id))?;
        if stored.status != expected {
            return Err(MarketplaceError::TerminalState {
                submission_id: submission.id,
                status: stored.status,
            });
        }
        *stored = submission;
        Ok(())
    }

    async fn find_by_module_id(&self, module_id: &ModuleId) -> MarketplaceResult<Vec<Submission>> {
        let submissions = self.submissions.read().map_err(poisoned("submissions"))?;
        Ok(sorted(
            submissions
                .values()
                .filter(|s| &s.module_id == module_id)
                .cloned()
                .collect(),
        ))
    }

    async fn list(&self, status: Option<SubmissionStatus>) -> MarketplaceResult<Vec<Submission>> {
        let submissions = self.submissions.read().map_err(poisoned("submissions"))?;
        Ok(sorted(
            submissions
                .values()
                .filter(|s| status.is_none_or(|wanted| s.status == wanted))
                .cloned()
                .collect(),
        ))
    }

    async fn append_audit(&self, record: AuditRecord) -> MarketplaceResult<()> {
        self.audit.write().map_err(poisoned("audit log"))?.push(record);
        Ok(())
    }

    async fn audit_trail(&self, submission_id: Uuid) -> MarketplaceResult<Vec<AuditRecord>> {
        let audit = self.audit.read().map_err(poisoned("audit log"))?;
        Ok(audit
            .iter()
            .filter(|r| r.submission_id == submission_id)
            .cloned()
            .collect())
    }
}
