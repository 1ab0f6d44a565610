//! Manifest parsing, discovery and cataloging.

use bastion_core::{Classify, ErrorKind, ModuleId};
use bastion_runtime::{ManifestSource, ModuleState, load_manifest};
use bastion_test::{ManifestBuilder, ModuleDir, test_manager};

const NATIVE_ENTRY: &str = r#""entry":{"type":"native","symbol":"x"}"#;

#[test]
fn rejects_uppercase_and_underscore_ids() {
    let err = load_manifest(ManifestSource::Json(&format!(
        r#"{{"id":"My_Module","name":"x","version":"1.0.0",{NATIVE_ENTRY}}}"#
    )))
    .unwrap_err();
    assert_eq!(err.field(), Some("id"));
    assert_eq!(err.kind(), ErrorKind::Validation);
    assert_eq!(err.kind().status_code(), 400);
}

#[test]
fn accepts_lowercase_digits_and_dashes() {
    let manifest = load_manifest(ManifestSource::Json(&format!(
        r#"{{"id":"my-module-2","name":"x","version":"1.0.0",{NATIVE_ENTRY}}}"#
    )))
    .unwrap();
    assert_eq!(manifest.id, ModuleId::new("my-module-2").unwrap());
    assert!(manifest.events.is_empty());
}

#[test]
fn missing_fields_are_named() {
    for (doc, field) in [
        (format!(r#"{{"name":"x","version":"1.0.0",{NATIVE_ENTRY}}}"#), "id"),
        (format!(r#"{{"id":"a","version":"1.0.0",{NATIVE_ENTRY}}}"#), "name"),
        (format!(r#"{{"id":"a","name":"x","version":"1.0",{NATIVE_ENTRY}}}"#), "version"),
        (r#"{"id":"a","name":"x","version":"1.0.0"}"#.to_owned(), "entry"),
    ] {
        let err = load_manifest(ManifestSource::Json(&doc)).unwrap_err();
        assert_eq!(err.field(), Some(field), "document: {doc}");
    }
}

#[tokio::test]
async fn scan_catalogs_what_it_can() {
    let dir = ModuleDir::new();
    dir.add_module("alpha", &ManifestBuilder::native("alpha", "alpha").event("tick"));
    dir.add_raw_manifest(
        "beta",
        "module.json",
        r#"{"id":"beta","name":"Beta","version":"0.2.0","entry":{"type":"native","symbol":"beta"}}"#,
    );
    dir.add_raw_manifest("broken", "module.toml", "id = \"Broken\"\n");

    let manager = test_manager(bastion_runtime::NativeRegistry::new());
    let report = manager.scan(dir.path());
    assert_eq!(report.registered.len(), 2);
    assert_eq!(report.skipped.len(), 1);
    assert!(report.skipped[0].0.ends_with("broken/module.toml"));

    let statuses = manager.list();
    let ids: Vec<_> = statuses.iter().map(|s| s.module_id.as_str()).collect();
    assert_eq!(ids, vec!["alpha", "beta"]);
    assert!(statuses.iter().all(|s| s.state == ModuleState::Unloaded));
    assert_eq!(statuses[0].declared_events, vec!["tick"]);
}
