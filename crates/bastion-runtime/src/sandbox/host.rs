//! The host surface handed to native modules.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::sync::Arc;

use bastion_bus::{BusError, CommunicationBus, PublishReceipt};
use bastion_core::{Capability, ModuleId, ResourceType};
use bastion_governor::{GovernorError, ResourceGovernor};
use bastion_monitor::{MEMORY_METRIC, ModuleMonitor};
use bastion_policy::SecurityPolicy;
use tracing::{debug, info};

use crate::engine::HookError;

/// Errors returned by [`SandboxHost`] calls.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// The module's policy does not grant the capability.
    #[error("{module_id} lacks the {capability} capability")]
    CapabilityDenied {
        /// Module ID.
        module_id: ModuleId,
        /// Missing capability.
        capability: Capability,
    },

    /// The module may not address the target module.
    #[error("{module_id} may not address module {target}")]
    ModuleDenied {
        /// Module ID.
        module_id: ModuleId,
        /// Target module.
        target: String,
    },

    /// The path is absolute or walks out of the module directory.
    #[error("path escapes the module directory: {0}")]
    PathEscape(PathBuf),

    /// File read failed.
    #[error("failed to read {path}: {message}")]
    Io {
        /// Path that failed.
        path: PathBuf,
        /// Underlying error.
        message: String,
    },

    /// Bus call failed.
    #[error(transparent)]
    Bus(#[from] BusError),

    /// Governor refused the reservation.
    #[error(transparent)]
    Governor(#[from] GovernorError),
}

impl From<HostError> for HookError {
    fn from(e: HostError) -> Self {
        Self(e.to_string())
    }
}

/// Capability-scoped access to the runtime for one module.
///
/// The policy is captured when the sandbox is built; a changed policy takes
/// effect on the next load. Channel publishing is the exception: the bus
/// checks the live policy on every publish.
#[derive(Clone)]
pub struct SandboxHost {
    module_id: ModuleId,
    policy: Arc<SecurityPolicy>,
    module_dir: PathBuf,
    bus: Arc<CommunicationBus>,
    governor: Arc<ResourceGovernor>,
    monitor: Arc<ModuleMonitor>,
}

impl fmt::Debug for SandboxHost {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SandboxHost")
            .field("module_id", &self.module_id)
            .field("capabilities", &self.policy.capabilities())
            .field("module_dir", &self.module_dir)
            .finish_non_exhaustive()
    }
}

impl SandboxHost {
    /// Create a host for `policy.module_id`.
    #[must_use]
    pub fn new(
        policy: SecurityPolicy,
        module_dir: PathBuf,
        bus: Arc<CommunicationBus>,
        governor: Arc<ResourceGovernor>,
        monitor: Arc<ModuleMonitor>,
    ) -> Self {
        Self {
            module_id: policy.module_id.clone(),
            policy: Arc::new(policy),
            module_dir,
            bus,
            governor,
            monitor,
        }
    }

    /// The module this host serves.
    #[must_use]
    pub fn module_id(&self) -> &ModuleId {
        &self.module_id
    }

    /// The policy captured at load time.
    #[must_use]
    pub fn policy(&self) -> &SecurityPolicy {
        &self.policy
    }

    /// The module's directory.
    #[must_use]
    pub fn module_dir(&self) -> &Path {
        &self.module_dir
    }

    /// Fail unless the policy grants `capability`.
    ///
    /// # Errors
    ///
    /// [`HostError::CapabilityDenied`].
    pub fn require(&self, capability: Capability) -> Result<(), HostError> {
        if self.policy.allows(capability) {
            Ok(())
        } else {
            Err(HostError::CapabilityDenied {
                module_id: self.module_id.clone(),
                capability,
            })
        }
    }

    /// Fail unless the policy allows addressing module `target`.
    ///
    /// # Errors
    ///
    /// [`HostError::ModuleDenied`].
    pub fn require_module(&self, target: &str) -> Result<(), HostError> {
        if self.policy.allows_module(target) {
            Ok(())
        } else {
            Err(HostError::ModuleDenied {
                module_id: self.module_id.clone(),
                target: target.to_owned(),
            })
        }
    }

    /// Read a file relative to the module directory. Requires `filesystem`.
    ///
    /// # Errors
    ///
    /// [`HostError::CapabilityDenied`], [`HostError::PathEscape`] for
    /// absolute paths or `..` components, or [`HostError::Io`].
    pub fn read_file(&self, relative: impl AsRef<Path>) -> Result<Vec<u8>, HostError> {
        self.require(Capability::Filesystem)?;
        let relative = relative.as_ref();
        if relative
            .components()
            .any(|c| !matches!(c, Component::Normal(_) | Component::CurDir))
        {
            return Err(HostError::PathEscape(relative.to_path_buf()));
        }
        let path = self.module_dir.join(relative);
        std::fs::read(&path).map_err(|e| HostError::Io {
            path,
            message: e.to_string(),
        })
    }

    /// Read an environment variable. Requires `env`.
    ///
    /// # Errors
    ///
    /// [`HostError::CapabilityDenied`].
    pub fn env_var(&self, name: &str) -> Result<Option<String>, HostError> {
        self.require(Capability::Env)?;
        Ok(std::env::var(name).ok())
    }

    /// Create a channel owned by this module.
    ///
    /// # Errors
    ///
    /// [`HostError::Bus`].
    pub fn create_channel(&self, name: &str) -> Result<(), HostError> {
        Ok(self.bus.create_channel(name, &self.module_id)?)
    }

    /// Subscribe this module to a channel.
    ///
    /// # Errors
    ///
    /// [`HostError::Bus`].
    pub fn subscribe(&self, channel: &str) -> Result<(), HostError> {
        Ok(self.bus.subscribe(&self.module_id, channel)?)
    }

    /// Unsubscribe this module from a channel.
    ///
    /// # Errors
    ///
    /// [`HostError::Bus`].
    pub fn unsubscribe(&self, channel: &str) -> Result<(), HostError> {
        Ok(self.bus.unsubscribe(&self.module_id, channel)?)
    }

    /// Publish to a channel as this module.
    ///
    /// # Errors
    ///
    /// [`HostError::Bus`] for missing channels, non-membership, or a policy
    /// without `bus.publish`.
    pub fn publish(
        &self,
        channel: &str,
        payload: serde_json::Value,
    ) -> Result<PublishReceipt, HostError> {
        Ok(self.bus.publish(&self.module_id, channel, payload)?)
    }

    /// Reserve `bytes` of memory against the module's ceiling. Returns the
    /// new total, which also becomes the module's latest memory sample.
    ///
    /// # Errors
    ///
    /// [`HostError::Governor`] when the ceiling would be exceeded.
    pub fn reserve_memory(&self, bytes: u64) -> Result<u64, HostError> {
        let total = self
            .governor
            .update_usage(&self.module_id, ResourceType::Memory, bytes)?;
        self.record_memory(total);
        Ok(total)
    }

    /// Give back previously reserved memory. Returns the new total.
    ///
    /// # Errors
    ///
    /// [`HostError::Governor`] if the module is no longer registered.
    pub fn release_memory(&self, bytes: u64) -> Result<u64, HostError> {
        let total = self
            .governor
            .release_usage(&self.module_id, ResourceType::Memory, bytes)?;
        self.record_memory(total);
        Ok(total)
    }

    #[allow(clippy::cast_precision_loss)]
    fn record_memory(&self, total: u64) {
        if let Err(e) = self
            .monitor
            .record_metric(&self.module_id, MEMORY_METRIC, total as f64)
        {
            debug!(module_id = %self.module_id, error = %e, "Memory metric not recorded");
        }
    }

    /// Emit a log line attributed to this module.
    pub fn log(&self, message: &str) {
        info!(module_id = %self.module_id, "{message}");
    }
}
