//! The policy store.

use bastion_core::{Capability, ModuleId, ResourceType};
use bastion_events::{EventBus, EventMetadata, RuntimeEvent};
use dashmap::DashMap;
use tracing::{debug, info};

use crate::error::PolicyResult;
use crate::policy::{PolicyDefaults, PolicyPatch, SecurityPolicy};

const EVENT_SOURCE: &str = "policy";

/// Per-module security policy store.
///
/// Every query is deny-by-default: a module without a stored policy is
/// judged against the synthesized [`SecurityPolicy::deny_all`], which is
/// never inserted into the store.
#[derive(Debug)]
pub struct PolicyManager {
    policies: DashMap<ModuleId, SecurityPolicy>,
    defaults: PolicyDefaults,
    events: EventBus,
}

impl PolicyManager {
    /// Create an empty store.
    #[must_use]
    pub fn new(defaults: PolicyDefaults, events: EventBus) -> Self {
        Self {
            policies: DashMap::new(),
            defaults,
            events,
        }
    }

    /// Ceilings used for default policies.
    #[must_use]
    pub fn defaults(&self) -> &PolicyDefaults {
        &self.defaults
    }

    /// The stored policy, or the deny-all default for unknown ids.
    #[must_use]
    pub fn get_policy(&self, id: &ModuleId) -> SecurityPolicy {
        self.policies
            .get(id)
            .map_or_else(|| SecurityPolicy::deny_all(id.clone(), &self.defaults), |p| p.clone())
    }

    /// Whether a policy has been stored for `id`.
    #[must_use]
    pub fn has_policy(&self, id: &ModuleId) -> bool {
        self.policies.contains_key(id)
    }

    /// Merge `patch` onto the defaults and store the result.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Validation`](crate::PolicyError::Validation) if
    /// an allow-list entry is malformed.
    pub fn set_policy(&self, id: &ModuleId, patch: PolicyPatch) -> PolicyResult<SecurityPolicy> {
        patch.validate()?;
        let policy = SecurityPolicy::from_patch(id.clone(), &self.defaults, patch);
        self.store(policy.clone());
        Ok(policy)
    }

    /// [`set_policy`](Self::set_policy) from an untyped JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Validation`](crate::PolicyError::Validation) for
    /// unknown keys, non-boolean flags, non-positive ceilings, or
    /// non-sequence allow-lists. Nothing is stored on error.
    pub fn set_policy_json(
        &self,
        id: &ModuleId,
        value: serde_json::Value,
    ) -> PolicyResult<SecurityPolicy> {
        let patch = PolicyPatch::from_json(value)?;
        self.set_policy(id, patch)
    }

    /// Store an explicit deny-all policy for `id`.
    pub fn provision_default(&self, id: &ModuleId) -> SecurityPolicy {
        let policy = SecurityPolicy::deny_all(id.clone(), &self.defaults);
        self.store(policy.clone());
        policy
    }

    fn store(&self, policy: SecurityPolicy) {
        let module_id = policy.module_id.clone();
        info!(
            module_id = %module_id,
            capabilities = ?policy.capabilities(),
            max_memory_bytes = policy.max_memory_bytes,
            max_cpu_time_ms = policy.max_cpu_time_ms,
            "Policy updated"
        );
        self.policies.insert(module_id.clone(), policy);
        self.events.publish(RuntimeEvent::PolicyUpdated {
            metadata: EventMetadata::new(EVENT_SOURCE),
            module_id,
        });
    }

    /// Remove a stored policy. Returns `true` if one was removed; removing
    /// an absent policy is a no-op.
    pub fn remove_policy(&self, id: &ModuleId) -> bool {
        if self.policies.remove(id).is_none() {
            debug!(module_id = %id, "No stored policy to remove");
            return false;
        }
        info!(module_id = %id, "Policy removed");
        self.events.publish(RuntimeEvent::PolicyRemoved {
            metadata: EventMetadata::new(EVENT_SOURCE),
            module_id: id.clone(),
        });
        true
    }

    /// Whether `id` holds `capability`.
    #[must_use]
    pub fn check_capability(&self, id: &ModuleId, capability: Capability) -> bool {
        self.policies
            .get(id)
            .is_some_and(|p| p.allows(capability))
    }

    /// Whether `id` may depend on or address module `dependency`.
    #[must_use]
    pub fn is_dependency_allowed(&self, id: &ModuleId, dependency: &str) -> bool {
        self.policies
            .get(id)
            .is_some_and(|p| p.allows_module(dependency))
    }

    /// Whether `id` may call host API `api`.
    #[must_use]
    pub fn is_api_allowed(&self, id: &ModuleId, api: &str) -> bool {
        self.policies.get(id).is_some_and(|p| p.allows_api(api))
    }

    /// The effective ceiling for `resource`.
    #[must_use]
    pub fn ceiling(&self, id: &ModuleId, resource: ResourceType) -> u64 {
        self.policies.get(id).map_or_else(
            || SecurityPolicy::deny_all(id.clone(), &self.defaults).ceiling(resource),
            |p| p.ceiling(resource),
        )
    }

    /// All stored policies, ordered by module id.
    #[must_use]
    pub fn list_policies(&self) -> Vec<SecurityPolicy> {
        let mut all: Vec<_> = self.policies.iter().map(|e| e.value().clone()).collect();
        all.sort_by(|a, b| a.module_id.cmp(&b.module_id));
        all
    }
}
