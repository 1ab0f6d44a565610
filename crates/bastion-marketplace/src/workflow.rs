//! The review workflow: `Pending -> Approved | Rejected`.

use std::sync::Arc;

use bastion_core::{ModuleId, ModuleManifest};
use bastion_events::{EventBus, EventMetadata, RuntimeEvent};
use bastion_monitor::ModuleMonitor;
use bastion_policy::PolicyManager;
use tracing::info;
use uuid::Uuid;

use crate::error::{MarketplaceError, MarketplaceResult};
use crate::store::SubmissionStore;
use crate::submission::{AuditAction, AuditRecord, Submission, SubmissionStatus};

const EVENT_SOURCE: &str = "marketplace";
const MAX_ACTOR_LEN: usize = 128;

/// Developer and reviewer ids: non-empty, at most 128 characters, no
/// whitespace or control characters.
fn validate_actor(field: &'static str, value: &str) -> MarketplaceResult<()> {
    if value.is_empty() {
        return Err(MarketplaceError::validation(field, "must not be empty"));
    }
    if value.chars().count() > MAX_ACTOR_LEN {
        return Err(MarketplaceError::validation(
            field,
            format!("must be at most {MAX_ACTOR_LEN} characters"),
        ));
    }
    if value.chars().any(|c| c.is_whitespace() || c.is_control()) {
        return Err(MarketplaceError::validation(
            field,
            "must not contain whitespace or control characters",
        ));
    }
    Ok(())
}

/// Submission intake and review.
pub struct Marketplace {
    store: Arc<dyn SubmissionStore>,
    policies: Arc<PolicyManager>,
    monitor: Arc<ModuleMonitor>,
    events: EventBus,
}

impl std::fmt::Debug for Marketplace {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Marketplace").finish_non_exhaustive()
    }
}

impl Marketplace {
    /// Create a workflow over `store`. Approval provisions policies in
    /// `policies` and starts monitoring in `monitor`.
    #[must_use]
    pub fn new(
        store: Arc<dyn SubmissionStore>,
        policies: Arc<PolicyManager>,
        monitor: Arc<ModuleMonitor>,
        events: EventBus,
    ) -> Self {
        Self {
            store,
            policies,
            monitor,
            events,
        }
    }

    /// Submit a manifest (as JSON) for review.
    ///
    /// # Errors
    ///
    /// [`MarketplaceError::Manifest`] or [`MarketplaceError::Validation`] for
    /// bad input, [`MarketplaceError::Conflict`] if the module already has a
    /// pending or approved submission.
    pub async fn submit(
        &self,
        developer_id: &str,
        manifest: serde_json::Value,
    ) -> MarketplaceResult<Submission> {
        let manifest = ModuleManifest::from_json_value(manifest)?;
        self.submit_manifest(developer_id, manifest).await
    }

    /// Submit an already parsed manifest for review.
    ///
    /// # Errors
    ///
    /// As for [`submit`](Self::submit).
    pub async fn submit_manifest(
        &self,
        developer_id: &str,
        manifest: ModuleManifest,
    ) -> MarketplaceResult<Submission> {
        validate_actor("developer_id", developer_id)?;
        if manifest.id == ModuleId::system() {
            return Err(MarketplaceError::validation(
                "module_id",
                format!("{} is reserved", manifest.id),
            ));
        }

        // Fast path; the store re-checks atomically on insert.
        if let Some(existing) = self
            .store
            .find_by_module_id(&manifest.id)
            .await?
            .into_iter()
            .find(|s| s.status.blocks_resubmission())
        {
            return Err(MarketplaceError::Conflict {
                module_id: manifest.id,
                existing: existing.id,
                status: existing.status,
            });
        }

        let submission = Submission::new(developer_id.to_owned(), manifest);
        self.store.insert(submission.clone()).await?;
        self.store
            .append_audit(AuditRecord::new(
                submission.id,
                AuditAction::Submitted,
                developer_id,
                None,
            ))
            .await?;

        info!(
            submission_id = %submission.id,
            module_id = %submission.module_id,
            developer_id,
            "Module submitted"
        );
        self.events.publish(RuntimeEvent::ModuleSubmitted {
            metadata: EventMetadata::new(EVENT_SOURCE),
            submission_id: submission.id,
            module_id: submission.module_id.clone(),
            developer_id: developer_id.to_owned(),
        });
        Ok(submission)
    }

    async fn pending(&self, submission_id: Uuid) -> MarketplaceResult<Submission> {
        let submission = self
            .store
            .get(submission_id)
            .await?
            .ok_or(MarketplaceError::NotFound(submission_id))?;
        if submission.status.is_terminal() {
            return Err(MarketplaceError::TerminalState {
                submission_id,
                status: submission.status,
            });
        }
        Ok(submission)
    }

    /// Approve a pending submission: provision the module's default-deny
    /// policy and start monitoring it.
    ///
    /// # Errors
    ///
    /// [`MarketplaceError::NotFound`], [`MarketplaceError::TerminalState`],
    /// or [`MarketplaceError::Validation`] for a bad reviewer id.
    pub async fn approve(&self, submission_id: Uuid, reviewer: &str) -> MarketplaceResult<Submission> {
        validate_actor("reviewer", reviewer)?;
        let mut submission = self.pending(submission_id).await?;
        submission.decide(SubmissionStatus::Approved, reviewer.to_owned(), None);
        self.store
            .update(submission.clone(), SubmissionStatus::Pending)
            .await?;

        self.policies.provision_default(&submission.module_id);
        if !self.monitor.is_monitored(&submission.module_id) {
            self.monitor.start_monitoring(&submission.module_id);
        }
        self.store
            .append_audit(AuditRecord::new(
                submission_id,
                AuditAction::Approved,
                reviewer,
                None,
            ))
            .await?;

        info!(
            submission_id = %submission_id,
            module_id = %submission.module_id,
            reviewer,
            "Module approved"
        );
        self.events.publish(RuntimeEvent::ModuleApproved {
            metadata: EventMetadata::new(EVENT_SOURCE),
            submission_id,
            module_id: submission.module_id.clone(),
            reviewer: reviewer.to_owned(),
        });
        Ok(submission)
    }

    /// Reject a pending submission. `reason` must not be blank.
    ///
    /// # Errors
    ///
    /// [`MarketplaceError::Validation`] for a blank reason or bad reviewer
    /// id, [`MarketplaceError::NotFound`], [`MarketplaceError::TerminalState`].
    pub async fn reject(
        &self,
        submission_id: Uuid,
        reviewer: &str,
        reason: &str,
    ) -> MarketplaceResult<Submission> {
        validate_actor("reviewer", reviewer)?;
        let reason = reason.trim();
        if reason.is_empty() {
            return Err(MarketplaceError::validation("reason", "must not be empty"));
        }
        let mut submission = self.pending(submission_id).await?;
        submission.decide(
            SubmissionStatus::Rejected,
            reviewer.to_owned(),
            Some(reason.to_owned()),
        );
        self.store
            .update(submission.clone(), SubmissionStatus::Pending)
            .await?;
        self.store
            .append_audit(AuditRecord::new(
                submission_id,
                AuditAction::Rejected,
                reviewer,
                Some(reason.to_owned()),
            ))
            .await?;

        info!(
            submission_id = %submission_id,
            module_id = %submission.module_id,
            reviewer,
            reason,
            "Module rejected"
        );
        self.events.publish(RuntimeEvent::ModuleRejected {
            metadata: EventMetadata::new(EVENT_SOURCE),
            submission_id,
            module_id: submission.module_id.clone(),
            reviewer: reviewer.to_owned(),
            reason: reason.to_owned(),
        });
        Ok(submission)
    }

    /// Fetch a submission.
    ///
    /// # Errors
    ///
    /// [`MarketplaceError::NotFound`].
    pub async fn get(&self, submission_id: Uuid) -> MarketplaceResult<Submission> {
        self.store
            .get(submission_id)
            .await?
            .ok_or(MarketplaceError::NotFound(submission_id))
    }

    /// Submissions, optionally filtered by status, oldest first.
    ///
    /// # Errors
    ///
    /// [`MarketplaceError::Store`].
    pub async fn list(&self, status: Option<SubmissionStatus>) -> MarketplaceResult<Vec<Submission>> {
        self.store.list(status).await
    }

    /// A submission's audit trail.
    ///
    /// # Errors
    ///
    /// [`MarketplaceError::Store`].
    pub async fn audit_trail(&self, submission_id: Uuid) -> MarketplaceResult<Vec<AuditRecord>> {
        self.store.audit_trail(submission_id).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_config::MonitorSection;
    use bastion_core::{Capability, Classify, ErrorKind, ModuleId};
    use bastion_monitor::HealthStatus;
    use bastion_policy::PolicyDefaults;
    use serde_json::json;

    use crate::store::InMemorySubmissionStore;

    fn marketplace() -> (Marketplace, Arc<PolicyManager>, Arc<ModuleMonitor>, EventBus) {
        let events = EventBus::new();
        let policies = Arc::new(PolicyManager::new(PolicyDefaults::default(), events.clone()));
        let monitor = Arc::new(ModuleMonitor::new(&MonitorSection::default()));
        let m = Marketplace::new(
            InMemorySubmissionStore::new().shared(),
            Arc::clone(&policies),
            Arc::clone(&monitor),
            events.clone(),
        );
        (m, policies, monitor, events)
    }

    fn manifest(id: &str) -> serde_json::Value {
        json!({
            "id": id,
            "name": "Weather",
            "version": "1.2.0",
            "entry": { "type": "native", "symbol": "weather" }
        })
    }

    #[tokio::test]
    async fn approve_provisions_policy_and_monitoring() {
        let (m, policies, monitor, events) = marketplace();
        let mut rx = events.subscribe_types(["module_submitted", "module_approved"]);

        let sub = m.submit("dev-1", manifest("weather")).await.unwrap();
        assert_eq!(sub.status, SubmissionStatus::Pending);
        let id = ModuleId::new("weather").unwrap();
        assert!(!policies.has_policy(&id));

        let approved = m.approve(sub.id, "alice").await.unwrap();
        assert_eq!(approved.status, SubmissionStatus::Approved);
        assert_eq!(approved.reviewer.as_deref(), Some("alice"));
        assert!(policies.has_policy(&id));
        assert!(!policies.check_capability(&id, Capability::Network));
        assert_eq!(monitor.get_module_health(&id), HealthStatus::Healthy);

        let seen: Vec<_> = rx.drain().iter().map(|e| e.event_type()).collect();
        assert_eq!(seen, vec!["module_submitted", "module_approved"]);

        let trail = m.audit_trail(sub.id).await.unwrap();
        let actions: Vec<_> = trail.iter().map(|r| r.action).collect();
        assert_eq!(actions, vec![AuditAction::Submitted, AuditAction::Approved]);
    }

    #[tokio::test]
    async fn decisions_are_terminal() {
        let (m, policies, ..) = marketplace();
        let sub = m.submit("dev-1", manifest("weather")).await.unwrap();
        m.reject(sub.id, "bob", "uses undeclared APIs").await.unwrap();

        let err = m.approve(sub.id, "alice").await.unwrap_err();
        assert!(matches!(
            err,
            MarketplaceError::TerminalState {
                status: SubmissionStatus::Rejected,
                ..
            }
        ));
        assert_eq!(err.kind(), ErrorKind::Conflict);
        assert!(!policies.has_policy(&ModuleId::new("weather").unwrap()));
    }

    #[tokio::test]
    async fn resubmission_is_blocked_until_rejected() {
        let (m, ..) = marketplace();
        let first = m.submit("dev-1", manifest("weather")).await.unwrap();
        assert!(matches!(
            m.submit("dev-2", manifest("weather")).await,
            Err(MarketplaceError::Conflict {
                status: SubmissionStatus::Pending,
                ..
            })
        ));

        m.reject(first.id, "bob", "needs docs").await.unwrap();
        let second = m.submit("dev-1", manifest("weather")).await.unwrap();
        m.approve(second.id, "alice").await.unwrap();
        assert!(matches!(
            m.submit("dev-1", manifest("weather")).await,
            Err(MarketplaceError::Conflict {
                status: SubmissionStatus::Approved,
                ..
            })
        ));
        assert_eq!(m.list(None).await.unwrap().len(), 2);
        assert_eq!(
            m.list(Some(SubmissionStatus::Rejected)).await.unwrap()[0].id,
            first.id
        );
    }

    #[tokio::test]
    async fn input_is_validated() {
        let (m, ..) = marketplace();
        let err = m.submit("dev-1", manifest("Bad_Id")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
        assert!(matches!(
            m.submit("", manifest("weather")).await,
            Err(MarketplaceError::Validation {
                field: "developer_id",
                ..
            })
        ));

        let sub = m.submit("dev-1", manifest("weather")).await.unwrap();
        assert!(matches!(
            m.reject(sub.id, "bob", "   ").await,
            Err(MarketplaceError::Validation { field: "reason", .. })
        ));
        assert!(matches!(
            m.approve(Uuid::new_v4(), "alice").await,
            Err(MarketplaceError::NotFound(_))
        ));
        assert_eq!(m.get(sub.id).await.unwrap().status, SubmissionStatus::Pending);
    }

    #[tokio::test]
    async fn system_id_cannot_be_submitted() {
        let (m, ..) = marketplace();
        let err = m.submit("dev-1", manifest("system")).await.unwrap_err();
        assert!(matches!(err, MarketplaceError::Manifest(_)), "{err}");

        let mut parsed = ModuleManifest::from_json_value(manifest("weather")).unwrap();
        parsed.id = ModuleId::system();
        assert!(matches!(
            m.submit_manifest("dev-1", parsed).await,
            Err(MarketplaceError::Validation {
                field: "module_id",
                ..
            })
        ));
        assert!(m.list(None).await.unwrap().is_empty());
    }
}
