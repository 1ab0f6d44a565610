//! Test fixtures: manifests, module directories, configuration and WASM.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use bastion_config::BastionConfig;
use bastion_core::ModuleManifest;
use bastion_runtime::{Hook, ModuleManager, NativeRegistry, RuntimeContext};
use tempfile::TempDir;

/// Builds manifests as TOML text or parsed [`ModuleManifest`]s.
#[derive(Debug, Clone)]
pub struct ManifestBuilder {
    id: String,
    name: String,
    version: String,
    events: Vec<String>,
    methods: Vec<String>,
    dependencies: Vec<String>,
    entry: String,
}

impl ManifestBuilder {
    /// A module backed by the native symbol `symbol`.
    #[must_use]
    pub fn native(id: &str, symbol: &str) -> Self {
        Self::with_entry(id, format!("type = \"native\"\nsymbol = \"{symbol}\"\n"))
    }

    /// A module backed by a `.wasm` file relative to its directory.
    #[must_use]
    pub fn wasm(id: &str, path: &str) -> Self {
        Self::with_entry(id, format!("type = \"wasm\"\npath = \"{path}\"\n"))
    }

    fn with_entry(id: &str, entry: String) -> Self {
        Self {
            id: id.to_owned(),
            name: format!("Test module {id}"),
            version: "0.1.0".to_owned(),
            events: Vec::new(),
            methods: Vec::new(),
            dependencies: Vec::new(),
            entry,
        }
    }

    /// Set the version string.
    #[must_use]
    pub fn version(mut self, version: &str) -> Self {
        version.clone_into(&mut self.version);
        self
    }

    /// Declare an event.
    #[must_use]
    pub fn event(mut self, event: &str) -> Self {
        self.events.push(event.to_owned());
        self
    }

    /// Declare a method.
    #[must_use]
    pub fn method(mut self, method: &str) -> Self {
        self.methods.push(method.to_owned());
        self
    }

    /// Declare a dependency.
    #[must_use]
    pub fn dependency(mut self, id: &str) -> Self {
        self.dependencies.push(id.to_owned());
        self
    }

    /// Render as `module.toml` content.
    #[must_use]
    pub fn to_toml(&self) -> String {
        let list = |items: &[String]| {
            let quoted: Vec<_> = items.iter().map(|i| format!("\"{i}\"")).collect();
            format!("[{}]", quoted.join(", "))
        };
        format!(
            "id = \"{}\"\nname = \"{}\"\nversion = \"{}\"\nevents = {}\nmethods = {}\ndependencies = {}\n\n[entry]\n{}",
            self.id,
            self.name,
            self.version,
            list(&self.events),
            list(&self.methods),
            list(&self.dependencies),
            self.entry,
        )
    }

    /// Parse into a validated manifest.
    ///
    /// # Panics
    ///
    /// If the builder was given invalid values.
    #[must_use]
    pub fn build(&self) -> ModuleManifest {
        ModuleManifest::from_toml_str(&self.to_toml()).expect("builder produced an invalid manifest")
    }
}

/// A temporary modules root. Removed on drop.
#[derive(Debug)]
pub struct ModuleDir {
    root: TempDir,
}

impl ModuleDir {
    /// Create an empty root.
    ///
    /// # Panics
    ///
    /// If the temporary directory cannot be created.
    #[must_use]
    pub fn new() -> Self {
        Self {
            root: TempDir::new().expect("failed to create temp dir"),
        }
    }

    /// The root path.
    #[must_use]
    pub fn path(&self) -> &Path {
        self.root.path()
    }

    /// Write `<root>/<dir>/module.toml` and return the module directory.
    ///
    /// # Panics
    ///
    /// On IO errors.
    pub fn add_module(&self, dir: &str, manifest: &ManifestBuilder) -> PathBuf {
        self.add_raw_manifest(dir, "module.toml", &manifest.to_toml())
    }

    /// Write arbitrary manifest content under `<root>/<dir>/<file_name>`.
    ///
    /// # Panics
    ///
    /// On IO errors.
    pub fn add_raw_manifest(&self, dir: &str, file_name: &str, content: &str) -> PathBuf {
        let module_dir = self.root.path().join(dir);
        fs::create_dir_all(&module_dir).expect("failed to create module dir");
        fs::write(module_dir.join(file_name), content).expect("failed to write manifest");
        module_dir
    }

    /// Write a file inside a module directory.
    ///
    /// # Panics
    ///
    /// On IO errors.
    pub fn add_file(&self, dir: &str, relative: &str, bytes: &[u8]) -> PathBuf {
        let path = self.root.path().join(dir).join(relative);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("failed to create parent dir");
        }
        fs::write(&path, bytes).expect("failed to write file");
        path
    }
}

impl Default for ModuleDir {
    fn default() -> Self {
        Self::new()
    }
}

/// A directory for manifests registered without a scan.
#[must_use]
pub fn scratch_dir() -> PathBuf {
    std::env::temp_dir()
}

/// Default configuration with the periodic collector disabled.
#[must_use]
pub fn test_config() -> BastionConfig {
    let mut config = BastionConfig::default();
    config.monitor.collector_enabled = false;
    config
}

/// A manager over [`test_config`] resolving native symbols via `natives`.
#[must_use]
pub fn test_manager(natives: NativeRegistry) -> ModuleManager {
    ModuleManager::new(RuntimeContext::with_native_registry(
        test_config(),
        Arc::new(natives),
    ))
}

/// Install a test-writer subscriber honoring `RUST_LOG`. Safe to call from
/// every test.
pub fn init_test_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// A WASM module exporting every lifecycle hook as `() -> i32`.
///
/// Each hook returns `0`; `failing` makes that one hook return `1`, which
/// Extism reports as an error.
#[must_use]
pub fn hook_module(failing: Option<Hook>) -> Vec<u8> {
    use wasm_encoder::{
        CodeSection, ExportKind, ExportSection, Function, FunctionSection, Instruction, Module,
        TypeSection, ValType,
    };

    let mut module = Module::new();
    let mut types = TypeSection::new();
    types.ty().function([], [ValType::I32]);
    module.section(&types);

    let mut functions = FunctionSection::new();
    for _ in Hook::ALL {
        functions.function(0);
    }
    module.section(&functions);

    let mut exports = ExportSection::new();
    for (index, hook) in (0u32..).zip(Hook::ALL) {
        exports.export(hook.as_str(), ExportKind::Func, index);
    }
    module.section(&exports);

    let mut code = CodeSection::new();
    for hook in Hook::ALL {
        let rc = i32::from(failing == Some(hook));
        let mut f = Function::new([]);
        f.instruction(&Instruction::I32Const(rc));
        f.instruction(&Instruction::End);
        code.function(&f);
    }
    module.section(&code);
    module.finish()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn builder_output_parses() {
        let manifest = ManifestBuilder::native("greeter", "greeter")
            .version("2.0.1")
            .event("user.joined")
            .method("greet")
            .dependency("logger")
            .build();
        assert_eq!(manifest.version, "2.0.1");
        assert!(manifest.declares_event("user.joined"));
        assert!(manifest.declares_method("greet"));
        assert_eq!(manifest.dependencies.len(), 1);
    }

    #[test]
    fn module_dir_writes_manifests() {
        let dir = ModuleDir::new();
        let module_dir = dir.add_module("alpha", &ManifestBuilder::wasm("alpha", "alpha.wasm"));
        assert!(module_dir.join("module.toml").is_file());
        let wasm = dir.add_file("alpha", "alpha.wasm", &hook_module(None));
        assert!(wasm.is_file());
    }
}
