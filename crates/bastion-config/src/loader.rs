//! Config discovery and layered loading.
//!
//! `load()` builds the configuration in this order:
//! 1. Parse the embedded `defaults.toml`
//! 2. Merge the user config (`$XDG_CONFIG_HOME/bastion/config.toml` or the
//!    platform equivalent), if present
//! 3. Merge the explicitly requested file, if any (it must exist)
//! 4. Apply `BASTION_*` environment overrides
//! 5. Deserialize and validate

use std::collections::HashMap;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use tracing::{debug, info};

use crate::env::{apply_env_overrides, collect_env_vars};
use crate::error::{ConfigError, ConfigResult};
use crate::merge::deep_merge;
use crate::types::BastionConfig;
use crate::validate;

/// Embedded default configuration.
const DEFAULTS_TOML: &str = include_str!("defaults.toml");

/// Maximum allowed config file size (1 MB).
const MAX_CONFIG_FILE_SIZE: usize = 1_048_576;

/// Load configuration with the full precedence chain.
///
/// # Errors
///
/// Returns a [`ConfigError`] if a file is malformed, `explicit` does not
/// exist, an environment override does not parse, or validation fails.
pub fn load(explicit: Option<&Path>) -> ConfigResult<BastionConfig> {
    load_layers(user_config_path().as_deref(), explicit, &collect_env_vars())
}

/// Load from the embedded defaults plus one TOML document, without the user
/// layer or environment.
///
/// # Errors
///
/// Returns a [`ConfigError`] if the document is malformed or invalid.
pub fn from_toml_str(content: &str) -> ConfigResult<BastionConfig> {
    let mut merged = defaults()?;
    let overlay: toml::Value = toml::from_str(content).map_err(|e| ConfigError::ParseError {
        path: "<inline>".to_owned(),
        source: e,
    })?;
    deep_merge(&mut merged, &overlay);
    finish(merged)
}

/// The platform user config location, if a home directory is known.
#[must_use]
pub fn user_config_path() -> Option<PathBuf> {
    ProjectDirs::from("", "", "bastion").map(|dirs| dirs.config_dir().join("config.toml"))
}

pub(crate) fn load_layers(
    user: Option<&Path>,
    explicit: Option<&Path>,
    env: &HashMap<String, String>,
) -> ConfigResult<BastionConfig> {
    let mut merged = defaults()?;

    if let Some(path) = user
        && let Some(overlay) = try_load_file(path)?
    {
        deep_merge(&mut merged, &overlay);
        info!(path = %path.display(), "loaded user config");
    }

    if let Some(path) = explicit {
        let overlay = try_load_file(path)?.ok_or_else(|| ConfigError::ReadError {
            path: path.display().to_string(),
            source: std::io::Error::from(std::io::ErrorKind::NotFound),
        })?;
        deep_merge(&mut merged, &overlay);
        info!(path = %path.display(), "loaded config file");
    }

    let applied = apply_env_overrides(&mut merged, env)?;
    if applied > 0 {
        debug!(count = applied, "applied environment overrides");
    }

    finish(merged)
}

fn defaults() -> ConfigResult<toml::Value> {
    toml::from_str(DEFAULTS_TOML).map_err(|e| ConfigError::ParseError {
        path: "<embedded defaults>".to_owned(),
        source: e,
    })
}

fn finish(merged: toml::Value) -> ConfigResult<BastionConfig> {
    let config: BastionConfig =
        merged
            .try_into()
            .map_err(|e: toml::de::Error| ConfigError::ParseError {
                path: "<merged config>".to_owned(),
                source: e,
            })?;
    validate::validate(&config)?;
    Ok(config)
}

/// Read a TOML file, returning `None` if it does not exist.
fn try_load_file(path: &Path) -> ConfigResult<Option<toml::Value>> {
    let content = match std::fs::read_to_string(path) {
        Ok(c) => c,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "config file not found, skipping");
            return Ok(None);
        },
        Err(e) => {
            return Err(ConfigError::ReadError {
                path: path.display().to_string(),
                source: e,
            });
        },
    };

    if content.len() > MAX_CONFIG_FILE_SIZE {
        return Err(ConfigError::ValidationError {
            field: path.display().to_string(),
            message: format!(
                "config file is {} bytes, exceeding the {MAX_CONFIG_FILE_SIZE} byte limit",
                content.len()
            ),
        });
    }

    let value = toml::from_str(&content).map_err(|e| ConfigError::ParseError {
        path: path.display().to_string(),
        source: e,
    })?;
    Ok(Some(value))
}
