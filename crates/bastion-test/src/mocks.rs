//! Native mock modules.

use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use bastion_runtime::{Hook, HookError, NativeModule, SandboxHost};
use serde_json::Value;

/// Shared, cloneable record of hook calls.
///
/// Entries are hook names (`init`, `start`, `stop`) or `on_event:<name>`.
#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    /// Create an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&self, entry: String) {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).push(entry);
    }

    /// Every entry so far.
    #[must_use]
    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap_or_else(PoisonError::into_inner).clone()
    }

    /// Number of entries equal to `entry`.
    #[must_use]
    pub fn count(&self, entry: &str) -> usize {
        self.0
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|e| *e == entry)
            .count()
    }

    /// Whether `entry` was recorded.
    #[must_use]
    pub fn contains(&self, entry: &str) -> bool {
        self.count(entry) > 0
    }

    /// Poll until `entry` shows up or `timeout` passes.
    pub async fn wait_for(&self, entry: &str, timeout: std::time::Duration) -> bool {
        let poll = async {
            while !self.contains(entry) {
                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }
        };
        tokio::time::timeout(timeout, poll).await.is_ok()
    }
}

/// Records every call. Can be told to fail or hang in one hook.
#[derive(Debug, Clone)]
pub struct RecordingModule {
    log: CallLog,
    fail_on: Option<Hook>,
    hang_on: Option<Hook>,
}

impl RecordingModule {
    /// Record into `log`; every hook succeeds.
    #[must_use]
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            fail_on: None,
            hang_on: None,
        }
    }

    /// Return an error from `hook`.
    #[must_use]
    pub fn failing(mut self, hook: Hook) -> Self {
        self.fail_on = Some(hook);
        self
    }

    /// Never return from `hook`.
    #[must_use]
    pub fn hanging(mut self, hook: Hook) -> Self {
        self.hang_on = Some(hook);
        self
    }

    async fn call(&self, hook: Hook, entry: String) -> Result<(), HookError> {
        self.log.push(entry);
        if self.hang_on == Some(hook) {
            std::future::pending::<()>().await;
        }
        if self.fail_on == Some(hook) {
            return Err(HookError::new(format!("{hook} failed on purpose")));
        }
        Ok(())
    }
}

#[async_trait]
impl NativeModule for RecordingModule {
    async fn init(&mut self, _: &SandboxHost) -> Result<(), HookError> {
        self.call(Hook::Init, "init".into()).await
    }

    async fn start(&mut self, _: &SandboxHost) -> Result<(), HookError> {
        self.call(Hook::Start, "start".into()).await
    }

    async fn stop(&mut self, _: &SandboxHost) -> Result<(), HookError> {
        self.call(Hook::Stop, "stop".into()).await
    }

    async fn on_event(&mut self, _: &SandboxHost, event: &str, _: &Value) -> Result<(), HookError> {
        self.call(Hook::OnEvent, format!("on_event:{event}")).await
    }
}

/// Creates `channel` on init and republishes every event payload to it.
#[derive(Debug, Clone)]
pub struct EchoModule {
    channel: String,
    log: CallLog,
}

impl EchoModule {
    /// Echo to `channel`, recording handled events into `log`.
    #[must_use]
    pub fn new(channel: &str, log: CallLog) -> Self {
        Self {
            channel: channel.to_owned(),
            log,
        }
    }
}

#[async_trait]
impl NativeModule for EchoModule {
    async fn init(&mut self, host: &SandboxHost) -> Result<(), HookError> {
        host.create_channel(&self.channel)?;
        Ok(())
    }

    async fn start(&mut self, _: &SandboxHost) -> Result<(), HookError> {
        Ok(())
    }

    async fn stop(&mut self, _: &SandboxHost) -> Result<(), HookError> {
        Ok(())
    }

    async fn on_event(&mut self, host: &SandboxHost, event: &str, payload: &Value) -> Result<(), HookError> {
        self.log.push(format!("on_event:{event}"));
        if event.starts_with("channel:") {
            return Ok(());
        }
        host.publish(&self.channel, payload.clone())?;
        Ok(())
    }
}
