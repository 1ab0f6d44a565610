//! Resource accounting against policy ceilings.
//!
//! Usage is tracked per `(module, resource)` key. [`ResourceGovernor::update_usage`]
//! treats its amount as a reservation added to current usage; the
//! check-and-commit runs while holding the key's map entry, so two writers
//! on the same key are serialized and can never jointly breach a ceiling.
//! Readers take short shared locks and may observe a value that is about to
//! change.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use bastion_config::GovernorSection;
use bastion_core::{ModuleId, ResourceType};
use bastion_events::{EventBus, EventMetadata, RuntimeEvent};
use bastion_policy::PolicyManager;
use chrono::{DateTime, TimeDelta, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::error::{GovernorError, GovernorResult};

const EVENT_SOURCE: &str = "governor";

/// One timestamped value of a usage counter.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSample {
    /// When the value was recorded.
    pub timestamp: DateTime<Utc>,
    /// Counter value after the change.
    pub value: u64,
}

#[derive(Debug, Default)]
struct UsageRecord {
    current: u64,
    history: VecDeque<UsageSample>,
}

impl UsageRecord {
    fn commit(&mut self, value: u64, retention: Duration, max_history: usize) {
        self.current = value;
        let now = Utc::now();
        self.history.push_back(UsageSample {
            timestamp: now,
            value,
        });
        if let Some(cutoff) = cutoff(now, retention) {
            prune_before(&mut self.history, cutoff);
        }
        while self.history.len() > max_history {
            self.history.pop_front();
        }
    }
}

fn cutoff(now: DateTime<Utc>, max_age: Duration) -> Option<DateTime<Utc>> {
    let age = TimeDelta::from_std(max_age).ok()?;
    now.checked_sub_signed(age)
}

fn prune_before(history: &mut VecDeque<UsageSample>, cutoff: DateTime<Utc>) -> usize {
    let mut pruned: usize = 0;
    while history.front().is_some_and(|s| s.timestamp < cutoff) {
        history.pop_front();
        pruned = pruned.saturating_add(1);
    }
    pruned
}

/// Current usage of one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageSnapshot {
    /// Module ID.
    pub module_id: ModuleId,
    /// Current value per resource.
    pub usage: BTreeMap<ResourceType, u64>,
}

impl UsageSnapshot {
    /// Current value for `resource` (zero if absent).
    #[must_use]
    pub fn get(&self, resource: ResourceType) -> u64 {
        self.usage.get(&resource).copied().unwrap_or(0)
    }
}

/// Enforces per-module resource ceilings taken from the policy store.
#[derive(Debug)]
pub struct ResourceGovernor {
    records: DashMap<(ModuleId, ResourceType), UsageRecord>,
    policies: Arc<PolicyManager>,
    events: EventBus,
    retention: Duration,
    max_history: usize,
}

impl ResourceGovernor {
    /// Create a governor reading ceilings from `policies`.
    #[must_use]
    pub fn new(policies: Arc<PolicyManager>, events: EventBus, settings: &GovernorSection) -> Self {
        Self {
            records: DashMap::new(),
            policies,
            events,
            retention: settings.history_retention(),
            max_history: settings.max_history_entries.max(1),
        }
    }

    /// Start tracking `id` with zeroed counters and empty history.
    /// Re-registering resets both.
    pub fn register_module(&self, id: &ModuleId) {
        for resource in ResourceType::ALL {
            self.records
                .insert((id.clone(), resource), UsageRecord::default());
        }
        debug!(module_id = %id, "Registered with governor");
    }

    /// Stop tracking `id`. Returns `true` if it was registered.
    pub fn unregister_module(&self, id: &ModuleId) -> bool {
        let mut removed = false;
        for resource in ResourceType::ALL {
            removed |= self.records.remove(&(id.clone(), resource)).is_some();
        }
        if removed {
            debug!(module_id = %id, "Unregistered from governor");
        }
        removed
    }

    /// Whether `id` is currently tracked.
    #[must_use]
    pub fn is_registered(&self, id: &ModuleId) -> bool {
        self.records
            .contains_key(&(id.clone(), ResourceType::Memory))
    }

    /// Reserve `amount` more of `resource` for `id`.
    ///
    /// Returns the new usage.
    ///
    /// # Errors
    ///
    /// - [`GovernorError::NotRegistered`] for unknown ids.
    /// - [`GovernorError::LimitExceeded`] if `current + amount` would exceed
    ///   the module's ceiling. Usage is left unchanged and a
    ///   `resource_limit_exceeded` event is published before returning.
    pub fn update_usage(
        &self,
        id: &ModuleId,
        resource: ResourceType,
        amount: u64,
    ) -> GovernorResult<u64> {
        let ceiling = self.policies.ceiling(id, resource);

        let current = {
            let mut record = self
                .records
                .get_mut(&(id.clone(), resource))
                .ok_or_else(|| GovernorError::NotRegistered(id.clone()))?;

            match record.current.checked_add(amount) {
                Some(next) if next <= ceiling => {
                    record.commit(next, self.retention, self.max_history);
                    return Ok(next);
                },
                _ => record.current,
            }
        };

        warn!(
            module_id = %id,
            resource = %resource,
            current,
            requested = amount,
            ceiling,
            "Resource limit exceeded"
        );
        self.events.publish(RuntimeEvent::ResourceLimitExceeded {
            metadata: EventMetadata::new(EVENT_SOURCE),
            module_id: id.clone(),
            resource: resource.to_string(),
            current,
            requested: amount,
            ceiling,
        });
        Err(GovernorError::LimitExceeded {
            module_id: id.clone(),
            resource,
            current,
            requested: amount,
            ceiling,
        })
    }

    /// Give back `amount` of `resource`, saturating at zero.
    ///
    /// Returns the new usage.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::NotRegistered`] for unknown ids.
    pub fn release_usage(
        &self,
        id: &ModuleId,
        resource: ResourceType,
        amount: u64,
    ) -> GovernorResult<u64> {
        let mut record = self
            .records
            .get_mut(&(id.clone(), resource))
            .ok_or_else(|| GovernorError::NotRegistered(id.clone()))?;
        let next = record.current.saturating_sub(amount);
        record.commit(next, self.retention, self.max_history);
        Ok(next)
    }

    /// Current usage of every resource for `id`.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::NotRegistered`] for unknown ids.
    pub fn get_usage(&self, id: &ModuleId) -> GovernorResult<UsageSnapshot> {
        let mut usage = BTreeMap::new();
        for resource in ResourceType::ALL {
            let record = self
                .records
                .get(&(id.clone(), resource))
                .ok_or_else(|| GovernorError::NotRegistered(id.clone()))?;
            usage.insert(resource, record.current);
        }
        Ok(UsageSnapshot {
            module_id: id.clone(),
            usage,
        })
    }

    /// Retained history for one counter, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`GovernorError::NotRegistered`] for unknown ids.
    pub fn history(&self, id: &ModuleId, resource: ResourceType) -> GovernorResult<Vec<UsageSample>> {
        self.records
            .get(&(id.clone(), resource))
            .map(|r| r.history.iter().copied().collect())
            .ok_or_else(|| GovernorError::NotRegistered(id.clone()))
    }

    /// Drop history samples older than `max_age`. Current values are not
    /// touched. Returns the number of samples removed.
    pub fn prune_history(&self, max_age: Duration) -> usize {
        let Some(cutoff) = cutoff(Utc::now(), max_age) else {
            return 0;
        };
        let mut pruned: usize = 0;
        for mut record in self.records.iter_mut() {
            pruned = pruned.saturating_add(prune_before(&mut record.history, cutoff));
        }
        if pruned > 0 {
            info!(pruned, "Pruned resource history");
        }
        pruned
    }

    /// Sum of current usage per resource over all registered modules.
    #[must_use]
    pub fn aggregate(&self) -> BTreeMap<ResourceType, u64> {
        let mut totals: BTreeMap<ResourceType, u64> =
            ResourceType::ALL.into_iter().map(|r| (r, 0)).collect();
        for entry in &self.records {
            let (_, resource) = entry.key();
            if let Some(total) = totals.get_mut(resource) {
                *total = total.saturating_add(entry.current);
            }
        }
        totals
    }

    /// Ids of every registered module, sorted.
    #[must_use]
    pub fn registered_modules(&self) -> Vec<ModuleId> {
        let mut ids: Vec<_> = self
            .records
            .iter()
            .filter(|e| e.key().1 == ResourceType::Memory)
            .map(|e| e.key().0.clone())
            .collect();
        ids.sort();
        ids
    }
}
