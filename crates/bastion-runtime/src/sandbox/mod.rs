//! Per-instance sandbox limits and the host surface native modules see.

mod host;

use std::time::Duration;

use bastion_config::SandboxSection;
use bastion_policy::SecurityPolicy;

pub use host::{HostError, SandboxHost};

/// Limits a sandbox is built with.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SandboxLimits {
    /// Linear memory cap in bytes.
    pub memory_bytes: u64,
    /// Wall-clock limit per hook invocation.
    pub timeout: Duration,
}

impl SandboxLimits {
    /// Derive limits from the module's policy and the sandbox settings.
    ///
    /// # Errors
    ///
    /// Returns a reason if the memory ceiling or timeout is zero or above
    /// the configured maximum.
    pub fn for_policy(policy: &SecurityPolicy, settings: &SandboxSection) -> Result<Self, String> {
        let memory_bytes = policy.max_memory_bytes;
        if memory_bytes == 0 {
            return Err("memory ceiling is zero".into());
        }
        if memory_bytes > settings.max_memory_bytes {
            return Err(format!(
                "memory ceiling {memory_bytes} exceeds sandbox maximum {}",
                settings.max_memory_bytes
            ));
        }
        let timeout_ms = settings.invocation_timeout_ms;
        if timeout_ms == 0 {
            return Err("invocation timeout is zero".into());
        }
        if timeout_ms > settings.max_invocation_timeout_ms {
            return Err(format!(
                "invocation timeout {timeout_ms} ms exceeds maximum {} ms",
                settings.max_invocation_timeout_ms
            ));
        }
        Ok(Self {
            memory_bytes,
            timeout: settings.invocation_timeout(),
        })
    }

    /// Memory cap in 64 KiB WASM pages, rounded up and clamped to `u32`.
    #[must_use]
    pub fn wasm_pages(&self) -> u32 {
        const PAGE: u64 = 64 * 1024;
        u32::try_from(self.memory_bytes.div_ceil(PAGE)).unwrap_or(u32::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_core::ModuleId;
    use bastion_policy::PolicyDefaults;

    fn policy(memory: u64) -> SecurityPolicy {
        let mut p = SecurityPolicy::deny_all(ModuleId::new("m1").unwrap(), &PolicyDefaults::default());
        p.max_memory_bytes = memory;
        p
    }

    #[test]
    fn limits_follow_policy_and_settings() {
        let limits = SandboxLimits::for_policy(&policy(65_536), &SandboxSection::default()).unwrap();
        assert_eq!(limits.memory_bytes, 65_536);
        assert_eq!(limits.timeout, Duration::from_millis(5_000));
        assert_eq!(limits.wasm_pages(), 1);
    }

    #[test]
    fn pages_round_up() {
        let limits = SandboxLimits::for_policy(&policy(65_537), &SandboxSection::default()).unwrap();
        assert_eq!(limits.wasm_pages(), 2);
    }

    #[test]
    fn zero_or_oversized_limits_are_rejected() {
        let settings = SandboxSection::default();
        assert!(SandboxLimits::for_policy(&policy(0), &settings).is_err());
        assert!(
            SandboxLimits::for_policy(&policy(settings.max_memory_bytes.saturating_add(1)), &settings)
                .is_err()
        );

        let zero_timeout = SandboxSection {
            invocation_timeout_ms: 0,
            ..SandboxSection::default()
        };
        assert!(SandboxLimits::for_policy(&policy(1), &zero_timeout).is_err());
    }
}
