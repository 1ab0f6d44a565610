//! Security policy values.
//!
//! A [`SecurityPolicy`] is the complete, effective policy for one module:
//! four capability flags, two resource ceilings and two allow-lists. Stored
//! policies are always built by merging a [`PolicyPatch`] onto the
//! deny-all default, never onto a previously stored policy.
//!
//! # Allow-list patterns
//!
//! | Entry | Matches |
//! |---|---|
//! | `*` | everything |
//! | `bus.*` | `bus.publish`, `bus.subscribe.raw`, not `bus` or `busy.x` |
//! | `logger` | exactly `logger` |

use std::num::NonZeroU64;

use bastion_core::{Capability, ModuleId, ResourceType};
use serde::{Deserialize, Serialize};

use crate::error::{PolicyError, PolicyResult};

/// API name a module must be allowed in order to publish on a channel.
pub const PUBLISH_API: &str = "bus.publish";

/// Ceilings used to synthesize the deny-all default policy.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PolicyDefaults {
    /// Memory ceiling in bytes.
    pub max_memory_bytes: u64,
    /// Accumulated CPU time ceiling in milliseconds.
    pub max_cpu_time_ms: u64,
}

impl Default for PolicyDefaults {
    fn default() -> Self {
        Self::from(&bastion_config::PolicySection::default())
    }
}

impl From<&bastion_config::PolicySection> for PolicyDefaults {
    fn from(section: &bastion_config::PolicySection) -> Self {
        Self {
            max_memory_bytes: section.default_max_memory_bytes,
            max_cpu_time_ms: section.default_max_cpu_time_ms,
        }
    }
}

/// Effective security policy for one module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SecurityPolicy {
    /// Module this policy governs.
    pub module_id: ModuleId,
    /// May touch the filesystem.
    pub allow_filesystem: bool,
    /// May open network connections.
    pub allow_network: bool,
    /// May spawn processes.
    pub allow_process: bool,
    /// May read environment variables.
    pub allow_env: bool,
    /// Memory ceiling in bytes.
    pub max_memory_bytes: u64,
    /// Accumulated CPU time ceiling in milliseconds.
    pub max_cpu_time_ms: u64,
    /// Modules this module may depend on or address.
    pub allowed_modules: Vec<String>,
    /// Host APIs this module may call.
    pub allowed_apis: Vec<String>,
}

impl SecurityPolicy {
    /// The deny-all policy: no capabilities, empty allow-lists, default
    /// ceilings.
    #[must_use]
    pub fn deny_all(module_id: ModuleId, defaults: &PolicyDefaults) -> Self {
        Self {
            module_id,
            allow_filesystem: false,
            allow_network: false,
            allow_process: false,
            allow_env: false,
            max_memory_bytes: defaults.max_memory_bytes,
            max_cpu_time_ms: defaults.max_cpu_time_ms,
            allowed_modules: Vec::new(),
            allowed_apis: Vec::new(),
        }
    }

    /// Build a policy by applying `patch` to the deny-all default.
    #[must_use]
    pub fn from_patch(module_id: ModuleId, defaults: &PolicyDefaults, patch: PolicyPatch) -> Self {
        let mut policy = Self::deny_all(module_id, defaults);
        if let Some(v) = patch.allow_filesystem {
            policy.allow_filesystem = v;
        }
        if let Some(v) = patch.allow_network {
            policy.allow_network = v;
        }
        if let Some(v) = patch.allow_process {
            policy.allow_process = v;
        }
        if let Some(v) = patch.allow_env {
            policy.allow_env = v;
        }
        if let Some(v) = patch.max_memory_bytes {
            policy.max_memory_bytes = v.get();
        }
        if let Some(v) = patch.max_cpu_time_ms {
            policy.max_cpu_time_ms = v.get();
        }
        if let Some(v) = patch.allowed_modules {
            policy.allowed_modules = v;
        }
        if let Some(v) = patch.allowed_apis {
            policy.allowed_apis = v;
        }
        policy
    }

    /// Whether `capability` is granted.
    #[must_use]
    pub fn allows(&self, capability: Capability) -> bool {
        match capability {
            Capability::Filesystem => self.allow_filesystem,
            Capability::Network => self.allow_network,
            Capability::Process => self.allow_process,
            Capability::Env => self.allow_env,
        }
    }

    /// Granted capabilities, in [`Capability::ALL`] order.
    #[must_use]
    pub fn capabilities(&self) -> Vec<Capability> {
        Capability::ALL
            .into_iter()
            .filter(|c| self.allows(*c))
            .collect()
    }

    /// The ceiling for `resource`.
    #[must_use]
    pub fn ceiling(&self, resource: ResourceType) -> u64 {
        match resource {
            ResourceType::Memory => self.max_memory_bytes,
            ResourceType::CpuTime => self.max_cpu_time_ms,
        }
    }

    /// Whether `module` matches the module allow-list.
    #[must_use]
    pub fn allows_module(&self, module: &str) -> bool {
        matches_allow_list(&self.allowed_modules, module)
    }

    /// Whether `api` matches the API allow-list.
    #[must_use]
    pub fn allows_api(&self, api: &str) -> bool {
        matches_allow_list(&self.allowed_apis, api)
    }
}

/// Match `value` against allow-list entries. Empty lists match nothing.
#[must_use]
pub fn matches_allow_list(list: &[String], value: &str) -> bool {
    if value.is_empty() {
        return false;
    }
    list.iter().any(|entry| {
        if entry == "*" || entry == value {
            return true;
        }
        entry.strip_suffix(".*").is_some_and(|prefix| {
            value
                .strip_prefix(prefix)
                .is_some_and(|rest| rest.starts_with('.') && rest.len() > 1)
        })
    })
}

/// A partial policy. Absent fields keep the deny-all default.
///
/// The JSON form uses camelCase keys and rejects anything it does not know:
///
/// ```json
/// { "allowNetwork": true, "maxMemoryBytes": 1048576, "allowedApis": ["bus.*"] }
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields, rename_all = "camelCase")]
pub struct PolicyPatch {
    /// Filesystem capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_filesystem: Option<bool>,
    /// Network capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_network: Option<bool>,
    /// Process capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_process: Option<bool>,
    /// Environment capability.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allow_env: Option<bool>,
    /// Memory ceiling, must be positive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_memory_bytes: Option<NonZeroU64>,
    /// CPU time ceiling, must be positive.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_cpu_time_ms: Option<NonZeroU64>,
    /// Module allow-list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_modules: Option<Vec<String>>,
    /// API allow-list.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub allowed_apis: Option<Vec<String>>,
}

impl PolicyPatch {
    /// Decode and validate an untyped JSON object.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Validation`] for non-objects, unknown keys,
    /// `null` values, non-boolean flags, non-positive ceilings, non-sequence
    /// allow-lists, or malformed allow-list entries.
    pub fn from_json(value: serde_json::Value) -> PolicyResult<Self> {
        let Some(fields) = value.as_object() else {
            return Err(PolicyError::validation("policy must be a JSON object"));
        };
        // Absent keys fall back to defaults; null is never a value.
        if let Some(key) = fields.iter().find_map(|(k, v)| v.is_null().then_some(k)) {
            return Err(PolicyError::validation(format!("{key} must not be null")));
        }
        let patch: Self = serde_json::from_value(value)
            .map_err(|e| PolicyError::validation(e.to_string()))?;
        patch.validate()?;
        Ok(patch)
    }

    /// Check allow-list entries.
    ///
    /// # Errors
    ///
    /// Returns [`PolicyError::Validation`] for empty entries or a `*` that is
    /// not the whole entry or a trailing `.*`.
    pub fn validate(&self) -> PolicyResult<()> {
        let lists = [
            ("allowedModules", self.allowed_modules.as_deref()),
            ("allowedApis", self.allowed_apis.as_deref()),
        ];
        for (name, list) in lists {
            for entry in list.unwrap_or_default() {
                validate_entry(name, entry)?;
            }
        }
        Ok(())
    }

    /// Grant a capability.
    #[must_use]
    pub fn allow(mut self, capability: Capability) -> Self {
        match capability {
            Capability::Filesystem => self.allow_filesystem = Some(true),
            Capability::Network => self.allow_network = Some(true),
            Capability::Process => self.allow_process = Some(true),
            Capability::Env => self.allow_env = Some(true),
        }
        self
    }

    /// Set a resource ceiling.
    #[must_use]
    pub fn with_ceiling(mut self, resource: ResourceType, value: NonZeroU64) -> Self {
        match resource {
            ResourceType::Memory => self.max_memory_bytes = Some(value),
            ResourceType::CpuTime => self.max_cpu_time_ms = Some(value),
        }
        self
    }

    /// Replace the module allow-list.
    #[must_use]
    pub fn with_allowed_modules<I, S>(mut self, modules: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_modules = Some(modules.into_iter().map(Into::into).collect());
        self
    }

    /// Replace the API allow-list.
    #[must_use]
    pub fn with_allowed_apis<I, S>(mut self, apis: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.allowed_apis = Some(apis.into_iter().map(Into::into).collect());
        self
    }
}

fn validate_entry(list: &str, entry: &str) -> PolicyResult<()> {
    if entry.trim().is_empty() {
        return Err(PolicyError::validation(format!(
            "{list} entries must not be empty"
        )));
    }
    let body = entry.strip_suffix(".*").unwrap_or(entry);
    if entry != "*" && body.contains('*') {
        return Err(PolicyError::validation(format!(
            "{list} entry '{entry}': '*' is only allowed alone or as a trailing '.*'"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn id() -> ModuleId {
        ModuleId::new("m1").unwrap()
    }

    fn list(entries: &[&str]) -> Vec<String> {
        entries.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn deny_all_grants_nothing() {
        let policy = SecurityPolicy::deny_all(id(), &PolicyDefaults::default());
        for cap in Capability::ALL {
            assert!(!policy.allows(cap));
        }
        assert!(!policy.allows_api(PUBLISH_API));
        assert!(!policy.allows_module("logger"));
        assert_eq!(policy.max_memory_bytes, 67_108_864);
    }

    #[test]
    fn allow_list_matching() {
        let apis = list(&["bus.*", "monitor.record"]);
        assert!(matches_allow_list(&apis, "bus.publish"));
        assert!(matches_allow_list(&apis, "bus.subscribe.raw"));
        assert!(matches_allow_list(&apis, "monitor.record"));
        assert!(!matches_allow_list(&apis, "bus"));
        assert!(!matches_allow_list(&apis, "busy.publish"));
        assert!(!matches_allow_list(&apis, "monitor.read"));
        assert!(matches_allow_list(&list(&["*"]), "anything"));
        assert!(!matches_allow_list(&[], "anything"));
    }

    #[test]
    fn patch_merges_onto_defaults() {
        let patch = PolicyPatch::default()
            .allow(Capability::Network)
            .with_ceiling(ResourceType::Memory, NonZeroU64::new(64).unwrap())
            .with_allowed_apis([PUBLISH_API]);
        let policy = SecurityPolicy::from_patch(id(), &PolicyDefaults::default(), patch);

        assert!(policy.allow_network);
        assert!(!policy.allow_filesystem);
        assert_eq!(policy.ceiling(ResourceType::Memory), 64);
        assert_eq!(policy.ceiling(ResourceType::CpuTime), 60_000);
        assert_eq!(policy.capabilities(), vec![Capability::Network]);
    }

    #[test]
    fn json_rejects_unknown_keys() {
        let err = PolicyPatch::from_json(json!({"allowMagic": true})).unwrap_err();
        assert!(err.to_string().contains("allowMagic"));
    }

    #[test]
    fn json_rejects_bad_shapes() {
        for bad in [
            json!({"allowNetwork": "yes"}),
            json!({"maxMemoryBytes": 0}),
            json!({"maxCpuTimeMs": -5}),
            json!({"allowedApis": "bus.publish"}),
            json!({"allowedModules": [""]}),
            json!({"allowedApis": ["bus*"]}),
            json!(["not", "an", "object"]),
            json!({"allowNetwork": null}),
            json!({"maxMemoryBytes": null}),
            json!({"allowedApis": null}),
        ] {
            assert!(PolicyPatch::from_json(bad.clone()).is_err(), "{bad}");
        }
    }

    #[test]
    fn json_accepts_full_patch() {
        let patch = PolicyPatch::from_json(json!({
            "allowFilesystem": true,
            "allowNetwork": false,
            "allowProcess": false,
            "allowEnv": true,
            "maxMemoryBytes": 1024,
            "maxCpuTimeMs": 500,
            "allowedModules": ["logger"],
            "allowedApis": ["bus.*"],
        }))
        .unwrap();
        assert_eq!(patch.allow_env, Some(true));
        assert_eq!(patch.max_cpu_time_ms.map(NonZeroU64::get), Some(500));
    }
}
