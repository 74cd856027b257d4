//! Unit tests for the event bridge.

use std::sync::Arc;

use rstest::{fixture, rstest};
use warden_core::{
    CallDescriptor, CallKind, ComponentName, DescriptorBuilder, ParceledPayload, TaintSet, kinds,
};
use warden_policy::{ChannelDecl, ChannelExport, ManifestRegistry, PackageManifest};

use super::EventBridge;

fn name(text: &str) -> ComponentName {
    text.parse().expect("name")
}

fn recorder(package: &str) -> CallDescriptor {
    DescriptorBuilder::new(CallKind::Static, name(&format!("{package}/Events")))
        .method("record")
        .param::<String>()
        .build()
        .expect("descriptor")
}

fn payload(text: &str) -> ParceledPayload {
    ParceledPayload::encode(&String::from(text)).expect("encode")
}

fn manifest(package: &str, channel: &str, exported: ChannelExport) -> PackageManifest {
    PackageManifest::new(package)
        .with_channel(ChannelDecl::new(
            name(&format!("{package}/{channel}")),
            exported,
        ))
        .expect("channel")
}

#[fixture]
fn bridge() -> EventBridge {
    let mut registry = ManifestRegistry::new();
    registry
        .register(manifest("owner.app", "open", ChannelExport::Both))
        .expect("register open");
    registry
        .register(manifest("sealed.app", "closed", ChannelExport::None))
        .expect("register sealed");
    registry
        .register(manifest("feed.app", "news", ChannelExport::Subscribe))
        .expect("register feed");
    EventBridge::new(Arc::new(registry))
}

#[rstest]
fn own_channels_need_no_export(bridge: EventBridge) {
    bridge
        .subscribe("me.app", &TaintSet::empty(), "me.app/private", recorder("me.app"))
        .expect("subscribe");

    let queued = bridge
        .fire("me.app", &TaintSet::empty(), "me.app/private", vec![payload("x")])
        .expect("fire");

    assert_eq!(queued, 1);
}

#[rstest]
fn deliveries_merge_firing_and_subscriber_taint(bridge: EventBridge) {
    let subscriber_taint = TaintSet::singleton(name("a.pkg/x"));
    let firing_taint = TaintSet::singleton(name("b.pkg/y"));
    bridge
        .subscribe("me.app", &subscriber_taint, "owner.app/open", recorder("me.app"))
        .expect("subscribe");

    bridge
        .fire("other.app", &firing_taint, "owner.app/open", vec![payload("hello")])
        .expect("fire");
    let deliveries = bridge.take_pending();

    let [delivery] = deliveries.as_slice() else {
        panic!("expected one delivery, got {deliveries:?}");
    };
    assert_eq!(delivery.subscriber(), &recorder("me.app"));
    assert_eq!(delivery.args(), [payload("hello")]);
    assert_eq!(delivery.channel(), &name("owner.app/open"));
    assert!(delivery.taint().is_tainted_with(&name("a.pkg/x")));
    assert!(delivery.taint().is_tainted_with(&name("b.pkg/y")));
    assert!(bridge.take_pending().is_empty());
}

#[rstest]
#[case::unexported("sealed.app/closed")]
#[case::undeclared("ghost.app/channel")]
fn foreign_subscriptions_need_an_export(bridge: EventBridge, #[case] channel: &str) {
    let error = bridge
        .subscribe("me.app", &TaintSet::empty(), channel, recorder("me.app"))
        .expect_err("rejected");

    assert!(error.is_kind(kinds::SECURITY));
}

#[rstest]
fn subscribe_only_exports_refuse_foreign_fires(bridge: EventBridge) {
    bridge
        .subscribe("me.app", &TaintSet::empty(), "feed.app/news", recorder("me.app"))
        .expect("subscribe");

    let error = bridge
        .fire("me.app", &TaintSet::empty(), "feed.app/news", Vec::new())
        .expect_err("rejected");

    assert!(error.is_kind(kinds::SECURITY));
}

#[rstest]
fn subscribers_must_belong_to_the_caller(bridge: EventBridge) {
    let error = bridge
        .subscribe("me.app", &TaintSet::empty(), "me.app/private", recorder("other.app"))
        .expect_err("rejected");

    assert!(error.is_kind(kinds::SECURITY));
}

#[rstest]
fn subscribers_must_be_static(bridge: EventBridge) {
    let instance = DescriptorBuilder::new(CallKind::Instance, name("me.app/Events"))
        .method("record")
        .build()
        .expect("descriptor");

    let error = bridge
        .subscribe("me.app", &TaintSet::empty(), "me.app/private", instance)
        .expect_err("rejected");

    assert!(error.is_kind(kinds::ILLEGAL_ARGUMENT));
}

#[rstest]
fn malformed_channels_are_illegal(bridge: EventBridge) {
    let error = bridge
        .fire("me.app", &TaintSet::empty(), "no-slash", Vec::new())
        .expect_err("rejected");

    assert!(error.is_kind(kinds::ILLEGAL_ARGUMENT));
}

#[rstest]
fn resubscribing_replaces_and_unsubscribing_removes(bridge: EventBridge) {
    let channel = name("me.app/private");
    for _ in 0..2 {
        bridge
            .subscribe("me.app", &TaintSet::empty(), "me.app/private", recorder("me.app"))
            .expect("subscribe");
    }
    assert_eq!(bridge.subscribers(&channel), 1);

    let removed = bridge
        .unsubscribe("me.app", "me.app/private", &recorder("me.app"))
        .expect("unsubscribe");
    let again = bridge
        .unsubscribe("me.app", "me.app/private", &recorder("me.app"))
        .expect("unsubscribe");

    assert!(removed);
    assert!(!again);
    assert_eq!(bridge.subscribers(&channel), 0);
}

#[rstest]
fn host_fires_skip_export_checks(bridge: EventBridge) {
    bridge
        .subscribe("sealed.app", &TaintSet::empty(), "sealed.app/closed", recorder("sealed.app"))
        .expect("subscribe");

    let queued = bridge.fire_event(&TaintSet::empty(), &name("sealed.app/closed"), Vec::new());

    assert_eq!(queued, 1);
}
