//! `BASTION_*` environment overrides.
//!
//! Overrides are applied to the merged TOML tree before it is deserialized,
//! so they take precedence over every file layer.

use std::collections::HashMap;

use crate::error::{ConfigError, ConfigResult};

#[derive(Debug, Clone, Copy)]
enum Kind {
    Int,
    Bool,
    Str,
}

/// Variable name, dotted config path, value kind.
const OVERRIDES: &[(&str, &str, Kind)] = &[
    ("BASTION_INVOCATION_TIMEOUT_MS", "sandbox.invocation_timeout_ms", Kind::Int),
    ("BASTION_SANDBOX_MAX_MEMORY_BYTES", "sandbox.max_memory_bytes", Kind::Int),
    ("BASTION_REQUIRE_HASH", "sandbox.require_hash", Kind::Bool),
    ("BASTION_POLICY_MAX_MEMORY_BYTES", "policy.default_max_memory_bytes", Kind::Int),
    ("BASTION_POLICY_MAX_CPU_TIME_MS", "policy.default_max_cpu_time_ms", Kind::Int),
    ("BASTION_MESSAGE_LOG_CAPACITY", "bus.message_log_capacity", Kind::Int),
    ("BASTION_COLLECTOR_ENABLED", "monitor.collector_enabled", Kind::Bool),
    ("BASTION_COLLECT_INTERVAL_SECS", "monitor.collect_interval_secs", Kind::Int),
    ("BASTION_LOG_LEVEL", "logging.level", Kind::Str),
    ("BASTION_LOG_FORMAT", "logging.format", Kind::Str),
];

/// Snapshot the `BASTION_*` variables of the current process.
#[must_use]
pub fn collect_env_vars() -> HashMap<String, String> {
    std::env::vars()
        .filter(|(k, _)| k.starts_with("BASTION_"))
        .collect()
}

/// Apply every recognised override in `vars` to `tree`.
///
/// Returns the number of overrides applied.
///
/// # Errors
///
/// Returns [`ConfigError::EnvError`] when a value does not parse as the
/// field's type.
pub fn apply_env_overrides(
    tree: &mut toml::Value,
    vars: &HashMap<String, String>,
) -> ConfigResult<usize> {
    let mut applied: usize = 0;
    for (var, path, kind) in OVERRIDES {
        let Some(raw) = vars.get(*var) else {
            continue;
        };
        let value = parse_value(var, raw, *kind)?;
        set_path(tree, path, value);
        applied = applied.saturating_add(1);
    }
    Ok(applied)
}

fn parse_value(var: &str, raw: &str, kind: Kind) -> ConfigResult<toml::Value> {
    let raw = raw.trim();
    match kind {
        Kind::Int => raw
            .parse::<i64>()
            .ok()
            .filter(|v| *v >= 0)
            .map(toml::Value::Integer)
            .ok_or_else(|| ConfigError::EnvError {
                var: var.to_owned(),
                message: format!("expected a non-negative integer, got '{raw}'"),
            }),
        Kind::Bool => match raw.to_ascii_lowercase().as_str() {
            "1" | "true" | "yes" | "on" => Ok(toml::Value::Boolean(true)),
            "0" | "false" | "no" | "off" => Ok(toml::Value::Boolean(false)),
            _ => Err(ConfigError::EnvError {
                var: var.to_owned(),
                message: format!("expected a boolean, got '{raw}'"),
            }),
        },
        Kind::Str => Ok(toml::Value::String(raw.to_owned())),
    }
}

fn set_path(tree: &mut toml::Value, path: &str, value: toml::Value) {
    let mut node = tree;
    let mut parts = path.split('.').peekable();
    while let Some(part) = parts.next() {
        let toml::Value::Table(table) = node else {
            return;
        };
        if parts.peek().is_none() {
            table.insert(part.to_owned(), value);
            return;
        }
        node = table
            .entry(part.to_owned())
            .or_insert_with(|| toml::Value::Table(toml::map::Map::new()));
    }
}
