//! Module lifecycle through the manager.

mod common;

use bastion_core::{Classify, ErrorKind};
use bastion_monitor::HealthStatus;
use bastion_runtime::{Hook, ModuleState, NativeRegistry, RuntimeError};
use bastion_test::{ManifestBuilder, ModuleDir, hook_module, test_manager};
use common::Harness;
use serde_json::json;

#[tokio::test]
async fn full_lifecycle_emits_events_in_order() {
    let h = Harness::new();
    let mut events = h.manager.context().events.subscribe();
    let id = h.register("greeter", "recorder", &["user.joined"]);

    h.manager.load(&id).await.unwrap();
    assert_eq!(h.manager.get_status(&id).unwrap().state, ModuleState::Loaded);
    h.manager.start(&id).await.unwrap();
    assert_eq!(h.manager.get_status(&id).unwrap().state, ModuleState::Running);

    let report = h.manager.broadcast_event("user.joined", &json!({"user": "ada"})).await;
    assert_eq!(report.delivered, vec![id.clone()]);

    h.manager.stop(&id).await.unwrap();
    assert_eq!(h.manager.get_status(&id).unwrap().state, ModuleState::Loaded);
    h.manager.unload(&id).await.unwrap();
    assert_eq!(h.manager.get_status(&id).unwrap().state, ModuleState::Unloaded);

    assert_eq!(
        h.log.entries(),
        vec!["init", "start", "on_event:user.joined", "stop"]
    );
    let lifecycle: Vec<_> = events
        .drain()
        .into_iter()
        .filter(|e| e.is_lifecycle_event())
        .map(|e| e.event_type())
        .collect();
    assert_eq!(
        lifecycle,
        vec!["module_loaded", "module_started", "module_stopped", "module_unloaded"]
    );
    assert!(!h.manager.context().governor.is_registered(&id));
}

#[tokio::test]
async fn invalid_transitions_are_refused() {
    let h = Harness::new();
    let id = h.register("strict", "recorder", &[]);

    assert!(matches!(h.manager.start(&id).await, Err(RuntimeError::NotFound(_))));
    h.manager.load(&id).await.unwrap();
    assert!(matches!(h.manager.load(&id).await, Err(RuntimeError::AlreadyLoaded(_))));
    assert!(matches!(h.manager.stop(&id).await, Err(RuntimeError::AlreadyStopped(_))));
    h.manager.start(&id).await.unwrap();
    let err = h.manager.start(&id).await.unwrap_err();
    assert!(matches!(err, RuntimeError::AlreadyRunning(_)));
    assert_eq!(err.kind(), ErrorKind::Conflict);
    assert_eq!(h.log.count("start"), 1);
}

#[tokio::test]
async fn broadcast_isolates_a_failing_module() {
    let h = Harness::new();
    let one = h.running("one", "recorder", &["tick"]).await;
    let two = h.running("two", "bad-event", &["tick"]).await;
    let three = h.running("three", "recorder", &["tick"]).await;

    let report = h.manager.broadcast_event("tick", &json!({})).await;
    let mut delivered = report.delivered.clone();
    delivered.sort();
    assert_eq!(delivered, vec![one.clone(), three.clone()]);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].module_id, two);

    let monitor = &h.manager.context().monitor;
    assert_eq!(monitor.get_module_health(&two), HealthStatus::Error);
    assert_eq!(monitor.get_module_health(&one), HealthStatus::Healthy);
    assert_eq!(h.manager.get_status(&two).unwrap().state, ModuleState::Error);
    assert_eq!(h.manager.get_status(&three).unwrap().state, ModuleState::Running);
}

#[tokio::test]
async fn failed_start_leaves_module_reloadable() {
    let h = Harness::new();
    let id = h.register("flaky", "bad-start", &[]);
    h.manager.load(&id).await.unwrap();

    let err = h.manager.start(&id).await.unwrap_err();
    assert!(err.is_execution_failure());
    assert_eq!(h.manager.get_status(&id).unwrap().state, ModuleState::Error);

    h.manager.reload(&id).await.unwrap();
    assert_eq!(h.manager.get_status(&id).unwrap().state, ModuleState::Loaded);
    assert_eq!(h.log.count("init"), 2);
}

#[tokio::test]
async fn reload_that_cannot_load_leaves_module_unloaded() {
    let h = Harness::new();
    let id = h.running("fickle", "recorder", &[]).await;
    let mut events = h.manager.context().events.subscribe();

    // The replacement entry names a symbol nobody registered.
    h.register("fickle", "vanished", &[]);
    let err = h.manager.reload(&id).await.unwrap_err();
    assert!(matches!(err, RuntimeError::CodeResolution { .. }), "{err}");

    assert_eq!(h.manager.get_status(&id).unwrap().state, ModuleState::Unloaded);
    assert!(h.manager.runtime().loaded_modules().is_empty());
    assert!(!h.manager.context().governor.is_registered(&id));
    assert!(!h.manager.context().bus.is_attached(&id));
    let types: Vec<_> = events.drain().iter().map(|e| e.event_type()).collect();
    assert!(types.contains(&"module_unloaded"), "{types:?}");
    assert!(!types.contains(&"module_loaded"), "{types:?}");
    assert_eq!(h.log.entries(), vec!["init", "start", "stop"]);
}

#[tokio::test(start_paused = true)]
async fn hanging_hooks_time_out() {
    let h = Harness::new();
    let id = h.register("sleepy", "slow-start", &[]);
    h.manager.load(&id).await.unwrap();

    let err = h.manager.start(&id).await.unwrap_err();
    assert!(matches!(err, RuntimeError::Timeout { hook: Hook::Start, .. }));
    assert_eq!(h.manager.get_status(&id).unwrap().state, ModuleState::Error);
}

#[tokio::test]
async fn shutdown_stops_and_unloads_everything() {
    let h = Harness::new();
    h.running("a", "recorder", &[]).await;
    h.running("b", "recorder", &[]).await;
    let c = h.register("c", "recorder", &[]);
    h.manager.load(&c).await.unwrap();

    let failures = h.manager.shutdown().await;
    assert!(failures.is_empty());
    assert_eq!(h.log.count("stop"), 2);
    assert!(
        h.manager
            .list()
            .iter()
            .all(|s| s.state == ModuleState::Unloaded)
    );
}

#[tokio::test]
async fn wasm_modules_run_their_hooks() {
    let dir = ModuleDir::new();
    dir.add_module("wasm-ok", &ManifestBuilder::wasm("wasm-ok", "module.wasm").event("tick"));
    dir.add_file("wasm-ok", "module.wasm", &hook_module(None));
    dir.add_module("wasm-bad", &ManifestBuilder::wasm("wasm-bad", "module.wasm"));
    dir.add_file("wasm-bad", "module.wasm", &hook_module(Some(Hook::Start)));

    let manager = test_manager(NativeRegistry::new());
    assert_eq!(manager.scan(dir.path()).registered.len(), 2);

    let ok = bastion_core::ModuleId::new("wasm-ok").unwrap();
    manager.load(&ok).await.unwrap();
    manager.start(&ok).await.unwrap();
    let status = manager.get_status(&ok).unwrap();
    assert_eq!(status.state, ModuleState::Running);
    assert_eq!(status.engine, Some("wasm"));
    let report = manager.broadcast_event("tick", &json!({"n": 1})).await;
    assert_eq!(report.delivered, vec![ok.clone()]);

    let bad = bastion_core::ModuleId::new("wasm-bad").unwrap();
    manager.load(&bad).await.unwrap();
    assert!(matches!(
        manager.start(&bad).await,
        Err(RuntimeError::HookFailed { hook: Hook::Start, .. })
    ));
    manager.shutdown().await;
}
