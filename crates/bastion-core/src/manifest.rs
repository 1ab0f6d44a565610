//! Module manifest types.
//!
//! A module manifest (`module.toml` or `module.json`) describes a module's
//! identity, its code entry point, and the events and methods it declares.
//! Manifests are validated as they are parsed, so a [`ModuleManifest`] value
//! always satisfies the id and version format rules.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};

use crate::error::{ManifestError, ManifestResult};
use crate::id::ModuleId;

static VERSION_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[0-9]+\.[0-9]+\.[0-9]+$").expect("version pattern is valid"));

/// Check a version string against `MAJOR.MINOR.PATCH`.
#[must_use]
pub fn is_valid_version(version: &str) -> bool {
    VERSION_RE.is_match(version)
}

/// Serialization format of a manifest document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ManifestFormat {
    /// `module.toml`
    Toml,
    /// `module.json`
    Json,
}

impl ManifestFormat {
    /// Infer the format from a file extension.
    #[must_use]
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension().and_then(|e| e.to_str()) {
            Some("toml") => Some(Self::Toml),
            Some("json") => Some(Self::Json),
            _ => None,
        }
    }
}

/// Where a module's executable code lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EntryPoint {
    /// An in-process module registered with the runtime under `symbol`.
    Native {
        /// Registry symbol.
        symbol: String,
    },
    /// A WebAssembly module, relative to the module directory.
    Wasm {
        /// Path to the `.wasm` file.
        path: PathBuf,
        /// Expected blake3 hex digest of the file.
        #[serde(default)]
        hash: Option<String>,
    },
}

/// A validated module manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleManifest {
    /// Unique module id.
    pub id: ModuleId,
    /// Human-readable name.
    pub name: String,
    /// `MAJOR.MINOR.PATCH` version.
    pub version: String,
    /// Free-form description.
    pub description: String,
    /// Event names this module wants delivered.
    pub events: Vec<String>,
    /// Method names this module exposes.
    pub methods: Vec<String>,
    /// Code entry point.
    pub entry: EntryPoint,
    /// Other modules this module intends to talk to.
    pub dependencies: Vec<ModuleId>,
}

/// Unvalidated on-disk shape. Every field is optional so that validation,
/// not the parser, reports which one is missing.
#[derive(Debug, Default, Deserialize)]
struct RawManifest {
    id: Option<String>,
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    #[serde(default)]
    events: Vec<String>,
    #[serde(default)]
    methods: Vec<String>,
    entry: Option<EntryPoint>,
    #[serde(default)]
    dependencies: Vec<String>,
}

impl<'de> Deserialize<'de> for ModuleManifest {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = RawManifest::deserialize(deserializer)?;
        Self::try_from(raw).map_err(serde::de::Error::custom)
    }
}

impl TryFrom<RawManifest> for ModuleManifest {
    type Error = ManifestError;

    fn try_from(raw: RawManifest) -> ManifestResult<Self> {
        let id = raw
            .id
            .ok_or_else(|| ManifestError::validation("id", "is required"))
            .and_then(ModuleId::new)?;

        let name = required_text("name", raw.name)?;

        let version = required_text("version", raw.version)?;
        if !is_valid_version(&version) {
            return Err(ManifestError::validation(
                "version",
                format!("must match MAJOR.MINOR.PATCH, got: {version}"),
            ));
        }

        let entry = raw
            .entry
            .ok_or_else(|| ManifestError::validation("entry", "is required"))?;
        match &entry {
            EntryPoint::Native { symbol } if symbol.trim().is_empty() => {
                return Err(ManifestError::validation(
                    "entry.symbol",
                    "must not be empty",
                ));
            },
            EntryPoint::Wasm { path, .. } if path.as_os_str().is_empty() => {
                return Err(ManifestError::validation("entry.path", "must not be empty"));
            },
            _ => {},
        }

        check_names("events", &raw.events)?;
        check_names("methods", &raw.methods)?;

        let dependencies = raw
            .dependencies
            .into_iter()
            .map(|dep| {
                ModuleId::new(dep.clone()).map_err(|_| {
                    ManifestError::validation("dependencies", format!("invalid module id: {dep}"))
                })
            })
            .collect::<ManifestResult<Vec<_>>>()?;

        Ok(Self {
            id,
            name,
            version,
            description: raw.description.unwrap_or_default(),
            events: raw.events,
            methods: raw.methods,
            entry,
            dependencies,
        })
    }
}

fn required_text(field: &str, value: Option<String>) -> ManifestResult<String> {
    match value {
        Some(v) if !v.trim().is_empty() => Ok(v),
        Some(_) => Err(ManifestError::validation(field, "must not be empty")),
        None => Err(ManifestError::validation(field, "is required")),
    }
}

fn check_names(field: &str, names: &[String]) -> ManifestResult<()> {
    let mut seen = HashSet::with_capacity(names.len());
    for name in names {
        if name.trim().is_empty() {
            return Err(ManifestError::validation(field, "entries must not be empty"));
        }
        if !seen.insert(name.as_str()) {
            return Err(ManifestError::validation(
                field,
                format!("duplicate entry: {name}"),
            ));
        }
    }
    Ok(())
}

impl ModuleManifest {
    /// Parse and validate a TOML manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Validation`] naming the bad field, or
    /// [`ManifestError::Parse`] for malformed TOML.
    pub fn from_toml_str(content: &str) -> ManifestResult<Self> {
        Self::parse(content, ManifestFormat::Toml, Path::new("<inline>"))
    }

    /// Parse and validate a JSON manifest.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Validation`] naming the bad field, or
    /// [`ManifestError::Parse`] for malformed JSON.
    pub fn from_json_str(content: &str) -> ManifestResult<Self> {
        Self::parse(content, ManifestFormat::Json, Path::new("<inline>"))
    }

    /// Build and validate a manifest from an already-decoded JSON value.
    ///
    /// # Errors
    ///
    /// Same as [`from_json_str`](Self::from_json_str).
    pub fn from_json_value(value: serde_json::Value) -> ManifestResult<Self> {
        let raw: RawManifest =
            serde_json::from_value(value).map_err(|e| ManifestError::Parse {
                path: PathBuf::from("<inline>"),
                message: e.to_string(),
            })?;
        Self::try_from(raw)
    }

    /// Read a manifest file, choosing the format from its extension.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, has an unknown extension,
    /// or fails validation.
    pub fn load(path: &Path) -> ManifestResult<Self> {
        let format = ManifestFormat::from_path(path)
            .ok_or_else(|| ManifestError::UnsupportedFormat(path.to_path_buf()))?;
        let content = std::fs::read_to_string(path).map_err(|source| ManifestError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::parse(&content, format, path)
    }

    /// Parse `content` in the given format. `origin` is only used in errors.
    ///
    /// # Errors
    ///
    /// Returns [`ManifestError::Parse`] or [`ManifestError::Validation`].
    pub fn parse(content: &str, format: ManifestFormat, origin: &Path) -> ManifestResult<Self> {
        let raw: RawManifest = match format {
            ManifestFormat::Toml => toml::from_str(content).map_err(|e| ManifestError::Parse {
                path: origin.to_path_buf(),
                message: e.to_string(),
            })?,
            ManifestFormat::Json => {
                serde_json::from_str(content).map_err(|e| ManifestError::Parse {
                    path: origin.to_path_buf(),
                    message: e.to_string(),
                })?
            },
        };
        Self::try_from(raw)
    }

    /// Whether this module declared interest in `event`.
    #[must_use]
    pub fn declares_event(&self, event: &str) -> bool {
        self.events.iter().any(|e| e == event)
    }

    /// Whether this module declared `method`.
    #[must_use]
    pub fn declares_method(&self, method: &str) -> bool {
        self.methods.iter().any(|m| m == method)
    }
}
