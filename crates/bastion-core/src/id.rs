//! Module identifiers.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, ManifestResult};

/// Reserved id under which process-level metrics are recorded.
pub const SYSTEM_MODULE_ID: &str = "system";

/// Unique, stable, human-readable module identifier.
///
/// Only lowercase ASCII letters, digits and hyphens are accepted
/// (`^[a-z0-9-]+$`).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct ModuleId(String);

impl<'de> Deserialize<'de> for ModuleId {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        if s == SYSTEM_MODULE_ID {
            return Ok(Self::system());
        }
        Self::new(s).map_err(serde::de::Error::custom)
    }
}

impl ModuleId {
    /// Create a validated module id.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Validation`] naming the `id` field when the
    /// value is empty, contains characters outside `[a-z0-9-]`, or is the
    /// reserved [`SYSTEM_MODULE_ID`].
    pub fn new(id: impl Into<String>) -> ManifestResult<Self> {
        let id = id.into();
        Self::validate(&id)?;
        Ok(Self(id))
    }

    /// The id of the process-level pseudo module.
    #[must_use]
    pub fn system() -> Self {
        Self(SYSTEM_MODULE_ID.to_string())
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    fn validate(id: &str) -> ManifestResult<()> {
        if id.is_empty() {
            return Err(ManifestError::validation("id", "must not be empty"));
        }
        if !id
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || c == '-')
        {
            return Err(ManifestError::validation(
                "id",
                format!("must match ^[a-z0-9-]+$, got: {id}"),
            ));
        }
        if id == SYSTEM_MODULE_ID {
            return Err(ManifestError::validation("id", format!("{id} is reserved")));
        }
        Ok(())
    }
}

impl fmt::Display for ModuleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for ModuleId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl TryFrom<&str> for ModuleId {
    type Error = ManifestError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}
