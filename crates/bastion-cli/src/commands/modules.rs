//! `bastion modules`.

use std::path::{Path, PathBuf};

use anyhow::Result;
use bastion_core::ModuleManifest;
use bastion_runtime::{ManifestSource, discover, load_manifest};
use serde::Serialize;

use crate::theme::Theme;

#[derive(Debug, Serialize)]
struct Listing {
    path: PathBuf,
    valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    module_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    version: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl Listing {
    fn new(path: PathBuf, result: Result<ModuleManifest, bastion_core::ManifestError>) -> Self {
        match result {
            Ok(manifest) => Self {
                path,
                valid: true,
                module_id: Some(manifest.id.to_string()),
                version: Some(manifest.version),
                error: None,
            },
            Err(e) => Self {
                path,
                valid: false,
                module_id: None,
                version: None,
                error: Some(e.to_string()),
            },
        }
    }
}

fn collect(dir: &Path) -> Vec<Listing> {
    discover(dir)
        .iter()
        .map(|candidate| {
            let result = load_manifest(ManifestSource::Path(&candidate.manifest_path));
            Listing::new(candidate.manifest_path, result)
        })
        .collect()
}

/// List manifests under `dir`. Returns whether every one validated.
pub(crate) fn run(dir: &Path, json: bool) -> Result<bool> {
    if !dir.is_dir() {
        anyhow::bail!("not a directory: {}", dir.display());
    }
    let listings = collect(dir);
    let all_valid = listings.iter().all(|l| l.valid);

    if json {
        println!("{}", serde_json::to_string_pretty(&listings)?);
        return Ok(all_valid);
    }

    println!("{}", Theme::header(&format!("Modules under {}", dir.display())));
    if listings.is_empty() {
        println!("{}", Theme::dimmed("  (none)"));
    }
    for listing in &listings {
        let shown = listing
            .path
            .strip_prefix(dir)
            .unwrap_or(&listing.path)
            .display()
            .to_string();
        match (&listing.module_id, &listing.version, &listing.error) {
            (Some(id), Some(version), _) => {
                println!("  {} {}", Theme::success(&format!("{id} {version}")), Theme::dimmed(&shown));
            },
            (_, _, error) => {
                println!("  {}", Theme::error(&shown));
                if let Some(error) = error {
                    println!("    {}", Theme::dimmed(error));
                }
            },
        }
    }
    Ok(all_valid)
}

#[cfg(test)]
mod tests {
    use super::*;
    use bastion_test::{ManifestBuilder, ModuleDir};

    #[test]
    fn reports_each_manifest() {
        let dir = ModuleDir::new();
        dir.add_module("good", &ManifestBuilder::native("good", "good").version("1.4.0"));
        dir.add_raw_manifest("bad", "module.json", r#"{"id":"bad","name":"x","version":"one"}"#);

        let listings = collect(dir.path());
        assert_eq!(listings.len(), 2);
        let bad = &listings[0];
        assert!(!bad.valid);
        assert!(bad.error.as_deref().unwrap().contains("version"));
        let good = &listings[1];
        assert!(good.valid);
        assert_eq!(good.module_id.as_deref(), Some("good"));
        assert_eq!(good.version.as_deref(), Some("1.4.0"));

        assert!(!run(dir.path(), true).unwrap());
    }
}
