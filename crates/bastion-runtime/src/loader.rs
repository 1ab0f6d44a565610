//! Manifest catalog and code resolution.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use bastion_config::SandboxSection;
use bastion_core::{EntryPoint, ManifestResult, ModuleId, ModuleManifest};
use dashmap::DashMap;
use tracing::{debug, info, warn};

use crate::discovery::discover;
use crate::engine::{Hook, NativeFactory, NativeRegistry};
use crate::error::{RuntimeError, RuntimeResult};

/// Where to read a manifest from.
#[derive(Debug, Clone, Copy)]
pub enum ManifestSource<'a> {
    /// A file; the format follows the extension.
    Path(&'a Path),
    /// An in-memory TOML document.
    Toml(&'a str),
    /// An in-memory JSON document.
    Json(&'a str),
}

/// Parse and validate a manifest.
///
/// # Errors
///
/// [`ManifestError::Validation`](bastion_core::ManifestError::Validation)
/// naming the first bad field, or a parse/IO error.
pub fn load_manifest(source: ManifestSource<'_>) -> ManifestResult<ModuleManifest> {
    match source {
        ManifestSource::Path(path) => ModuleManifest::load(path),
        ManifestSource::Toml(content) => ModuleManifest::from_toml_str(content),
        ManifestSource::Json(content) => ModuleManifest::from_json_str(content),
    }
}

/// A cataloged module.
#[derive(Debug, Clone)]
pub struct CatalogEntry {
    /// The validated manifest.
    pub manifest: Arc<ModuleManifest>,
    /// Directory the entry point is resolved against.
    pub module_dir: PathBuf,
}

/// Outcome of [`ManifestLoader::scan`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ScanReport {
    /// Modules added to (or replaced in) the catalog.
    pub registered: Vec<ModuleId>,
    /// Manifests that failed to load, with the reason.
    pub skipped: Vec<(PathBuf, String)>,
}

/// Code ready to be placed in a sandbox.
#[derive(Clone)]
pub enum ResolvedCode {
    /// A registered native module.
    Native(NativeFactory),
    /// Verified WebAssembly bytes.
    Wasm(Vec<u8>),
}

impl std::fmt::Debug for ResolvedCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Native(_) => f.write_str("Native"),
            Self::Wasm(bytes) => write!(f, "Wasm({} bytes)", bytes.len()),
        }
    }
}

/// Catalog of known manifests, keyed by module id.
#[derive(Debug)]
pub struct ManifestLoader {
    catalog: DashMap<ModuleId, CatalogEntry>,
    natives: Arc<NativeRegistry>,
    require_hash: bool,
}

impl ManifestLoader {
    /// Create an empty catalog.
    #[must_use]
    pub fn new(natives: Arc<NativeRegistry>, settings: &SandboxSection) -> Self {
        Self {
            catalog: DashMap::new(),
            natives,
            require_hash: settings.require_hash,
        }
    }

    /// Catalog every valid manifest under `root`. Invalid candidates are
    /// logged and reported, never fatal.
    pub fn scan(&self, root: &Path) -> ScanReport {
        let mut report = ScanReport::default();
        for candidate in discover(root).iter() {
            match load_manifest(ManifestSource::Path(&candidate.manifest_path)) {
                Ok(manifest) => {
                    let id = manifest.id.clone();
                    self.register(manifest, candidate.module_dir);
                    report.registered.push(id);
                },
                Err(e) => {
                    warn!(
                        path = %candidate.manifest_path.display(),
                        error = %e,
                        "Skipping invalid manifest"
                    );
                    report.skipped.push((candidate.manifest_path, e.to_string()));
                },
            }
        }
        info!(
            root = %root.display(),
            registered = report.registered.len(),
            skipped = report.skipped.len(),
            "Manifest scan complete"
        );
        report
    }

    /// Add a manifest to the catalog, replacing any entry with the same id.
    pub fn register(&self, manifest: ModuleManifest, module_dir: PathBuf) -> Arc<ModuleManifest> {
        let manifest = Arc::new(manifest);
        debug!(module_id = %manifest.id, dir = %module_dir.display(), "Manifest cataloged");
        self.catalog.insert(
            manifest.id.clone(),
            CatalogEntry {
                manifest: Arc::clone(&manifest),
                module_dir,
            },
        );
        manifest
    }

    /// Remove a catalog entry. Returns `true` if it existed.
    pub fn forget(&self, id: &ModuleId) -> bool {
        self.catalog.remove(id).is_some()
    }

    /// Look up a cataloged module.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::NotFound`].
    pub fn lookup(&self, id: &ModuleId) -> RuntimeResult<CatalogEntry> {
        self.catalog
            .get(id)
            .map(|e| e.value().clone())
            .ok_or_else(|| RuntimeError::NotFound(id.clone()))
    }

    /// Cataloged ids, sorted.
    #[must_use]
    pub fn catalog(&self) -> Vec<ModuleId> {
        let mut ids: Vec<_> = self.catalog.iter().map(|e| e.key().clone()).collect();
        ids.sort();
        ids
    }

    /// Resolve the manifest's entry point to executable code.
    ///
    /// # Errors
    ///
    /// [`RuntimeError::CodeResolution`] when the entry point is missing or
    /// unreadable, the hash does not match (or is absent while required),
    /// or a lifecycle hook is not exported.
    pub fn resolve_code(
        &self,
        manifest: &ModuleManifest,
        module_dir: &Path,
    ) -> RuntimeResult<ResolvedCode> {
        let fail = |reason: String| RuntimeError::CodeResolution {
            module_id: manifest.id.clone(),
            reason,
        };
        match &manifest.entry {
            EntryPoint::Native { symbol } => self
                .natives
                .get(symbol)
                .map(ResolvedCode::Native)
                .ok_or_else(|| fail(format!("native symbol `{symbol}` is not registered"))),
            EntryPoint::Wasm { path, hash } => {
                let path = if path.is_absolute() {
                    path.clone()
                } else {
                    module_dir.join(path)
                };
                let bytes = std::fs::read(&path)
                    .map_err(|e| fail(format!("failed to read {}: {e}", path.display())))?;
                verify_hash(&bytes, hash.as_deref(), self.require_hash).map_err(fail)?;
                let missing = missing_hooks(&bytes).map_err(fail)?;
                if !missing.is_empty() {
                    let names: Vec<_> = missing.iter().map(|h| h.as_str()).collect();
                    return Err(fail(format!("missing exported hooks: {}", names.join(", "))));
                }
                Ok(ResolvedCode::Wasm(bytes))
            },
        }
    }
}

fn verify_hash(bytes: &[u8], expected: Option<&str>, required: bool) -> Result<(), String> {
    match expected {
        Some(expected) => {
            let actual = blake3::hash(bytes).to_hex().to_string();
            if !actual.eq_ignore_ascii_case(expected) {
                return Err(format!("hash mismatch: expected {expected}, got {actual}"));
            }
            Ok(())
        },
        None if required => Err("a blake3 hash is required for wasm entry points".into()),
        None => Ok(()),
    }
}

/// Lifecycle hooks not exported as functions by the module.
fn missing_hooks(bytes: &[u8]) -> Result<Vec<Hook>, String> {
    let mut exported = Vec::new();
    for payload in wasmparser::Parser::new(0).parse_all(bytes) {
        let payload = payload.map_err(|e| format!("invalid wasm: {e}"))?;
        if let wasmparser::Payload::ExportSection(reader) = payload {
            for export in reader {
                let export = export.map_err(|e| format!("invalid export: {e}"))?;
                if export.kind == wasmparser::ExternalKind::Func {
                    exported.push(export.name.to_owned());
                }
            }
        }
    }
    Ok(Hook::ALL
        .into_iter()
        .filter(|h| !exported.iter().any(|e| e == h.as_str()))
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    fn wasm_exporting(names: &[&str]) -> Vec<u8> {
        let mut module = wasm_encoder::Module::new();
        let mut types = wasm_encoder::TypeSection::new();
        types.ty().function([], []);
        module.section(&types);
        let mut functions = wasm_encoder::FunctionSection::new();
        functions.function(0);
        module.section(&functions);
        let mut exports = wasm_encoder::ExportSection::new();
        for name in names {
            exports.export(name, wasm_encoder::ExportKind::Func, 0);
        }
        module.section(&exports);
        let mut code = wasm_encoder::CodeSection::new();
        let mut f = wasm_encoder::Function::new([]);
        f.instruction(&wasm_encoder::Instruction::End);
        code.function(&f);
        module.section(&code);
        module.finish()
    }

    fn wasm_manifest(id: &str, hash: Option<&str>) -> ModuleManifest {
        let hash_line = hash.map(|h| format!("hash = \"{h}\"")).unwrap_or_default();
        load_manifest(ManifestSource::Toml(&format!(
            r#"
            id = "{id}"
            name = "Test"
            version = "1.0.0"

            [entry]
            type = "wasm"
            path = "module.wasm"
            {hash_line}
            "#
        )))
        .unwrap()
    }

    fn loader(require_hash: bool) -> ManifestLoader {
        ManifestLoader::new(
            Arc::new(NativeRegistry::new()),
            &SandboxSection {
                require_hash,
                ..SandboxSection::default()
            },
        )
    }

    #[test]
    fn invalid_id_names_the_field() {
        let err = load_manifest(ManifestSource::Json(
            r#"{"id":"My_Module","name":"x","version":"1.0.0","entry":{"type":"native","symbol":"x"}}"#,
        ))
        .unwrap_err();
        assert_eq!(err.field(), Some("id"));

        let ok = load_manifest(ManifestSource::Json(
            r#"{"id":"my-module-2","name":"x","version":"1.0.0","entry":{"type":"native","symbol":"x"}}"#,
        ))
        .unwrap();
        assert_eq!(ok.id.as_str(), "my-module-2");
    }

    #[test]
    fn scan_catalogs_valid_and_reports_invalid() {
        let root = tempfile::tempdir().unwrap();
        let good = root.path().join("good");
        fs::create_dir(&good).unwrap();
        fs::write(
            good.join("module.toml"),
            "id = \"good\"\nname = \"Good\"\nversion = \"0.1.0\"\n[entry]\ntype = \"native\"\nsymbol = \"good\"\n",
        )
        .unwrap();
        let bad = root.path().join("bad");
        fs::create_dir(&bad).unwrap();
        fs::write(bad.join("module.toml"), "id = \"Bad\"\n").unwrap();

        let l = loader(false);
        let report = l.scan(root.path());
        assert_eq!(report.registered, vec![ModuleId::new("good").unwrap()]);
        assert_eq!(report.skipped.len(), 1);
        assert_eq!(l.lookup(&ModuleId::new("good").unwrap()).unwrap().module_dir, good);
        assert!(matches!(
            l.lookup(&ModuleId::new("bad").unwrap()),
            Err(RuntimeError::NotFound(_))
        ));
    }

    #[test]
    fn unregistered_native_symbol_fails_resolution() {
        let l = loader(false);
        let manifest = load_manifest(ManifestSource::Toml(
            "id = \"n\"\nname = \"N\"\nversion = \"1.0.0\"\n[entry]\ntype = \"native\"\nsymbol = \"nope\"\n",
        ))
        .unwrap();
        assert!(matches!(
            l.resolve_code(&manifest, Path::new(".")),
            Err(RuntimeError::CodeResolution { .. })
        ));
    }

    #[test]
    fn wasm_with_all_hooks_resolves() {
        let dir = tempfile::tempdir().unwrap();
        let bytes = wasm_exporting(&["init", "start", "stop", "on_event"]);
        fs::write(dir.path().join("module.wasm"), &bytes).unwrap();
        let hash = blake3::hash(&bytes).to_hex().to_string();

        let resolved = loader(true)
            .resolve_code(&wasm_manifest("w", Some(&hash)), dir.path())
            .unwrap();
        assert!(matches!(resolved, ResolvedCode::Wasm(b) if b == bytes));
    }

    #[test]
    fn wasm_missing_hook_fails() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("module.wasm"),
            wasm_exporting(&["init", "start", "stop"]),
        )
        .unwrap();
        let err = loader(false)
            .resolve_code(&wasm_manifest("w", None), dir.path())
            .unwrap_err();
        assert!(err.to_string().contains("on_event"));
    }

    #[test]
    fn hash_mismatch_and_required_hash() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("module.wasm"),
            wasm_exporting(&["init", "start", "stop", "on_event"]),
        )
        .unwrap();
        assert!(
            loader(false)
                .resolve_code(&wasm_manifest("w", Some("00")), dir.path())
                .is_err()
        );
        assert!(
            loader(true)
                .resolve_code(&wasm_manifest("w", None), dir.path())
                .is_err()
        );
    }
}
