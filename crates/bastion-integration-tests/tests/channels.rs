//! Inter-module channels, with and without running modules.

mod common;

use bastion_bus::BusError;
use bastion_core::{Classify, ErrorKind, ModuleId};
use bastion_policy::{PUBLISH_API, PolicyPatch};
use bastion_runtime::RuntimeContext;
use bastion_test::test_config;
use common::{DELIVERY_TIMEOUT, Harness};
use serde_json::json;

fn id(s: &str) -> ModuleId {
    ModuleId::new(s).unwrap()
}

#[tokio::test]
async fn subscribers_receive_and_log_keeps_one_copy() {
    let ctx = RuntimeContext::new(test_config());
    let (a, b) = (id("producer"), id("consumer"));
    ctx.policies
        .set_policy(&a, PolicyPatch::default().with_allowed_apis([PUBLISH_API]))
        .unwrap();
    let mut inbox = ctx.bus.attach(&b);

    ctx.bus.create_channel("ch", &a).unwrap();
    ctx.bus.subscribe(&b, "ch").unwrap();
    let receipt = ctx.bus.publish(&a, "ch", json!({"x": 1})).unwrap();
    assert_eq!(receipt.delivered_to, vec![b.clone()]);

    let message = inbox.recv().await.unwrap();
    assert_eq!(message.payload, json!({"x": 1}));
    assert_eq!(message.sender, a);
    assert_eq!(message.event_name(), "channel:ch");

    let log = ctx.bus.get_messages(&b, "ch").unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].id, receipt.message_id);
}

#[test]
fn outsiders_cannot_publish_or_read() {
    let ctx = RuntimeContext::new(test_config());
    let (owner, outsider) = (id("owner"), id("outsider"));
    ctx.policies
        .set_policy(&outsider, PolicyPatch::default().with_allowed_apis(["bus.*"]))
        .unwrap();
    ctx.bus.create_channel("private", &owner).unwrap();

    let err = ctx
        .bus
        .publish(&outsider, "private", json!(null))
        .unwrap_err();
    assert!(matches!(err, BusError::NotSubscribed { .. }));
    assert_eq!(err.kind(), ErrorKind::PermissionDenied);

    assert!(matches!(
        ctx.bus.get_messages(&outsider, "private"),
        Err(BusError::PermissionDenied { .. })
    ));
    assert!(matches!(
        ctx.bus.publish(&owner, "missing", json!(null)),
        Err(BusError::ChannelNotFound(_))
    ));
}

#[test]
fn members_without_publish_grant_are_refused() {
    let ctx = RuntimeContext::new(test_config());
    let owner = id("quiet");
    ctx.bus.create_channel("ch", &owner).unwrap();
    assert!(matches!(
        ctx.bus.publish(&owner, "ch", json!(1)),
        Err(BusError::PermissionDenied { .. })
    ));
    assert!(ctx.bus.get_messages(&owner, "ch").unwrap().is_empty());
}

#[tokio::test]
async fn running_modules_get_channel_traffic() {
    let h = Harness::new();
    let ctx = h.manager.context();

    let echo = h.register("echo", "echo", &["ping"]);
    ctx.policies
        .set_policy(&echo, PolicyPatch::default().with_allowed_apis([PUBLISH_API]))
        .unwrap();
    h.manager.load(&echo).await.unwrap();
    h.manager.start(&echo).await.unwrap();

    let listener = h.running("listener", "recorder", &[]).await;
    ctx.bus.subscribe(&listener, "echoes").unwrap();

    let report = h.manager.broadcast_event("ping", &json!({"n": 7})).await;
    assert_eq!(report.delivered, vec![echo.clone()]);
    assert_eq!(report.dropped, vec![listener.clone()]);

    assert!(h.log.wait_for("on_event:channel:echoes", DELIVERY_TIMEOUT).await);
    let log = ctx.bus.get_messages(&listener, "echoes").unwrap();
    assert_eq!(log.len(), 1);
    assert_eq!(log[0].payload, json!({"n": 7}));
    assert_eq!(log[0].sender, echo);
}
