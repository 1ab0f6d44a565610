//! Declarative lifecycle suites.
//!
//! A suite is a `*.suite.toml` file. Every case drives one module through a
//! list of steps against a fresh manager that has scanned the suite's
//! directory:
//!
//! ```toml
//! name = "greeter"
//!
//! [[case]]
//! name = "starts and handles joins"
//! module = "greeter"
//! steps = [
//!     { action = "load", state = "loaded" },
//!     { action = "start" },
//!     { action = "dispatch", event = "user.joined", payload = { user = "ada" } },
//!     { action = "dispatch", event = "undeclared", expect = "dropped" },
//!     { action = "stop", state = "loaded" },
//! ]
//! ```

use std::fmt;
use std::path::Path;

use anyhow::{Context, Result};
use bastion_config::BastionConfig;
use bastion_core::ModuleId;
use bastion_runtime::{Dispatch, ModuleManager, ModuleState};
use serde::Deserialize;

/// File suffix that marks a suite.
pub(crate) const SUITE_SUFFIX: &str = ".suite.toml";

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Suite {
    #[serde(default)]
    pub(crate) name: Option<String>,
    #[serde(default, rename = "case")]
    pub(crate) cases: Vec<Case>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Case {
    pub(crate) name: String,
    pub(crate) module: String,
    #[serde(default)]
    pub(crate) steps: Vec<Step>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Action {
    Load,
    Start,
    Stop,
    Unload,
    Reload,
    Dispatch,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Load => "load",
            Self::Start => "start",
            Self::Stop => "stop",
            Self::Unload => "unload",
            Self::Reload => "reload",
            Self::Dispatch => "dispatch",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub(crate) enum Expect {
    Ok,
    Error,
    Delivered,
    Dropped,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub(crate) struct Step {
    pub(crate) action: Action,
    #[serde(default)]
    pub(crate) event: Option<String>,
    #[serde(default)]
    pub(crate) payload: Option<serde_json::Value>,
    #[serde(default)]
    pub(crate) expect: Option<Expect>,
    /// Substring the error message must contain when `expect = "error"`.
    #[serde(default)]
    pub(crate) error_contains: Option<String>,
    /// State the module must be in after the step.
    #[serde(default)]
    pub(crate) state: Option<ModuleState>,
}

impl Step {
    fn expected(&self) -> Expect {
        match (self.expect, self.action) {
            (Some(expect), _) => expect,
            (None, Action::Dispatch) => Expect::Delivered,
            (None, _) => Expect::Ok,
        }
    }
}

#[derive(Debug)]
enum Observed {
    Ok,
    Delivered,
    Dropped,
    Error(String),
}

impl fmt::Display for Observed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ok => f.write_str("ok"),
            Self::Delivered => f.write_str("delivered"),
            Self::Dropped => f.write_str("dropped"),
            Self::Error(e) => write!(f, "error: {e}"),
        }
    }
}

/// Result of one case.
#[derive(Debug)]
pub(crate) struct CaseReport {
    pub(crate) name: String,
    pub(crate) failure: Option<String>,
}

impl CaseReport {
    pub(crate) fn passed(&self) -> bool {
        self.failure.is_none()
    }
}

/// Parse a suite file.
pub(crate) fn parse(content: &str) -> Result<Suite> {
    let suite: Suite = toml::from_str(content)?;
    for case in &suite.cases {
        ModuleId::new(case.module.as_str())
            .with_context(|| format!("case {:?} names an invalid module", case.name))?;
        if let Some(step) = case
            .steps
            .iter()
            .find(|s| s.action == Action::Dispatch && s.event.is_none())
        {
            anyhow::bail!("case {:?}: {} step without an event", case.name, step.action);
        }
    }
    Ok(suite)
}

/// Run every case of `suite` whose name contains `filter`.
pub(crate) async fn run(
    suite: &Suite,
    dir: &Path,
    config: &BastionConfig,
    filter: Option<&str>,
) -> Vec<CaseReport> {
    let mut reports = Vec::new();
    for case in suite
        .cases
        .iter()
        .filter(|c| filter.is_none_or(|f| c.name.contains(f)))
    {
        let manager = ModuleManager::from_config(config.clone());
        manager.scan(dir);
        let failure = run_case(&manager, case).await.err();
        let leftovers = manager.shutdown().await;
        if !leftovers.is_empty() {
            tracing::debug!(case = %case.name, ?leftovers, "Modules did not shut down cleanly");
        }
        reports.push(CaseReport {
            name: case.name.clone(),
            failure,
        });
    }
    reports
}

async fn run_case(manager: &ModuleManager, case: &Case) -> Result<(), String> {
    let id = ModuleId::new(case.module.as_str()).map_err(|e| e.to_string())?;
    for (number, step) in (1usize..).zip(&case.steps) {
        let observed = perform(manager, &id, step).await;
        check(manager, &id, step, &observed)
            .map_err(|e| format!("step {number} ({}): {e}", step.action))?;
    }
    Ok(())
}

async fn perform(manager: &ModuleManager, id: &ModuleId, step: &Step) -> Observed {
    let outcome = match step.action {
        Action::Load => manager.load(id).await.map(|()| Observed::Ok),
        Action::Start => manager.start(id).await.map(|()| Observed::Ok),
        Action::Stop => manager.stop(id).await.map(|()| Observed::Ok),
        Action::Unload => manager.unload(id).await.map(|()| Observed::Ok),
        Action::Reload => manager.reload(id).await.map(|()| Observed::Ok),
        Action::Dispatch => {
            let event = step.event.as_deref().unwrap_or_default();
            let payload = step.payload.clone().unwrap_or(serde_json::Value::Null);
            manager
                .runtime()
                .dispatch_event(id, event, &payload)
                .await
                .map(|d| match d {
                    Dispatch::Delivered => Observed::Delivered,
                    Dispatch::Dropped => Observed::Dropped,
                })
        },
    };
    outcome.unwrap_or_else(|e| Observed::Error(e.to_string()))
}

fn check(
    manager: &ModuleManager,
    id: &ModuleId,
    step: &Step,
    observed: &Observed,
) -> Result<(), String> {
    let expected = step.expected();
    let matched = match (expected, observed) {
        (Expect::Ok, Observed::Ok)
        | (Expect::Delivered, Observed::Delivered)
        | (Expect::Dropped, Observed::Dropped) => true,
        (Expect::Error, Observed::Error(message)) => step
            .error_contains
            .as_deref()
            .is_none_or(|needle| message.contains(needle)),
        _ => false,
    };
    if !matched {
        let wanted = match (expected, step.error_contains.as_deref()) {
            (Expect::Error, Some(needle)) => format!("an error containing {needle:?}"),
            (Expect::Ok, _) => "ok".to_owned(),
            (Expect::Error, None) => "an error".to_owned(),
            (Expect::Delivered, _) => "delivered".to_owned(),
            (Expect::Dropped, _) => "dropped".to_owned(),
        };
        return Err(format!("expected {wanted}, got {observed}"));
    }

    if let Some(want) = step.state {
        let actual = manager.get_status(id).map_err(|e| e.to_string())?.state;
        if actual != want {
            return Err(format!("expected state {want}, got {actual}"));
        }
    }
    Ok(())
}
