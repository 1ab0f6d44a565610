//! Post-merge configuration validation.

use crate::error::{ConfigError, ConfigResult};
use crate::types::BastionConfig;

/// Validate a fully merged configuration.
///
/// # Errors
///
/// Returns the first validation error found.
pub fn validate(config: &BastionConfig) -> ConfigResult<()> {
    validate_sandbox(config)?;
    validate_policy(config)?;
    validate_sizes(config)?;
    validate_logging(config)?;
    Ok(())
}

fn invalid(field: &str, message: impl Into<String>) -> ConfigError {
    ConfigError::ValidationError {
        field: field.to_owned(),
        message: message.into(),
    }
}

fn validate_sandbox(config: &BastionConfig) -> ConfigResult<()> {
    let s = &config.sandbox;
    if s.invocation_timeout_ms == 0 {
        return Err(invalid(
            "sandbox.invocation_timeout_ms",
            "must be greater than zero",
        ));
    }
    if s.invocation_timeout_ms > s.max_invocation_timeout_ms {
        return Err(invalid(
            "sandbox.invocation_timeout_ms",
            format!(
                "{} exceeds sandbox.max_invocation_timeout_ms ({})",
                s.invocation_timeout_ms, s.max_invocation_timeout_ms
            ),
        ));
    }
    if s.max_memory_bytes == 0 {
        return Err(invalid("sandbox.max_memory_bytes", "must be greater than zero"));
    }
    Ok(())
}

fn validate_policy(config: &BastionConfig) -> ConfigResult<()> {
    let p = &config.policy;
    if p.default_max_memory_bytes == 0 {
        return Err(invalid(
            "policy.default_max_memory_bytes",
            "must be greater than zero",
        ));
    }
    if p.default_max_memory_bytes > config.sandbox.max_memory_bytes {
        return Err(invalid(
            "policy.default_max_memory_bytes",
            format!(
                "{} exceeds sandbox.max_memory_bytes ({})",
                p.default_max_memory_bytes, config.sandbox.max_memory_bytes
            ),
        ));
    }
    if p.default_max_cpu_time_ms == 0 {
        return Err(invalid(
            "policy.default_max_cpu_time_ms",
            "must be greater than zero",
        ));
    }
    Ok(())
}

fn validate_sizes(config: &BastionConfig) -> ConfigResult<()> {
    if config.bus.message_log_capacity == 0 {
        return Err(invalid("bus.message_log_capacity", "must be greater than zero"));
    }
    if config.bus.event_capacity == 0 {
        return Err(invalid("bus.event_capacity", "must be greater than zero"));
    }
    if config.governor.max_history_entries == 0 {
        return Err(invalid(
            "governor.max_history_entries",
            "must be greater than zero",
        ));
    }
    if config.monitor.collector_enabled && config.monitor.collect_interval_secs == 0 {
        return Err(invalid(
            "monitor.collect_interval_secs",
            "must be greater than zero while the collector is enabled",
        ));
    }
    Ok(())
}

fn validate_logging(config: &BastionConfig) -> ConfigResult<()> {
    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.logging.level.as_str()) {
        return Err(invalid(
            "logging.level",
            format!(
                "unsupported log level '{}'; expected one of: {}",
                config.logging.level,
                valid_levels.join(", ")
            ),
        ));
    }

    let valid_formats = ["pretty", "compact", "json"];
    if !valid_formats.contains(&config.logging.format.as_str()) {
        return Err(invalid(
            "logging.format",
            format!(
                "unsupported log format '{}'; expected one of: {}",
                config.logging.format,
                valid_formats.join(", ")
            ),
        ));
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn field_of(err: ConfigError) -> String {
        match err {
            ConfigError::ValidationError { field, .. } => field,
            other => panic!("expected validation error, got {other:?}"),
        }
    }

    #[test]
    fn defaults_are_valid() {
        assert!(validate(&BastionConfig::default()).is_ok());
    }

    #[test]
    fn zero_timeout_rejected() {
        let mut config = BastionConfig::default();
        config.sandbox.invocation_timeout_ms = 0;
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "sandbox.invocation_timeout_ms"
        );
    }

    #[test]
    fn policy_ceiling_above_sandbox_max_rejected() {
        let mut config = BastionConfig::default();
        config.policy.default_max_memory_bytes = config.sandbox.max_memory_bytes.saturating_add(1);
        assert_eq!(
            field_of(validate(&config).unwrap_err()),
            "policy.default_max_memory_bytes"
        );
    }

    #[test]
    fn unknown_format_rejected() {
        let mut config = BastionConfig::default();
        config.logging.format = "xml".into();
        assert_eq!(field_of(validate(&config).unwrap_err()), "logging.format");
    }

    #[test]
    fn disabled_collector_allows_zero_interval() {
        let mut config = BastionConfig::default();
        config.monitor.collector_enabled = false;
        config.monitor.collect_interval_secs = 0;
        assert!(validate(&config).is_ok());
    }
}
