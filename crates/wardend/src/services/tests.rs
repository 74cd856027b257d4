//! Unit tests for the trusted API.

use std::sync::Arc;

use rstest::{fixture, rstest};
use serde_json::{Value, json};
use warden_core::protocol::Callout;
use warden_core::{CallDescriptor, ComponentName, ParceledPayload, RemoteException, TaintSet, kinds};
use warden_policy::{
    Filter, ManifestRegistry, PackageManifest, Policy, Rule, Source, sinks,
};
use warden_worker::CapabilityCall;

use super::{CallScope, MockDeviceController, MockNotifier, TrustedServices};

const PUSH_ENDPOINT: &str = "https://push.example/";

fn label(text: &str) -> ComponentName {
    text.parse().expect("label")
}

fn callout(call: CapabilityCall) -> Callout {
    call.into_callout().expect("callout")
}

fn registry() -> Arc<ManifestRegistry> {
    let secret = label("secret.app/contacts");
    let quiet = label("quiet.app/mic");
    let mut registry = ManifestRegistry::new();
    registry
        .register(
            PackageManifest::new("secret.app")
                .with_source(Source::new(
                    secret.clone(),
                    "contacts",
                    Policy::new(vec![Rule::deny(
                        Filter::sink(sinks::TOAST),
                        "contacts may not be shown",
                    )]),
                ))
                .expect("source"),
        )
        .expect("register secret");
    registry
        .register(
            PackageManifest::new("quiet.app")
                .with_source(Source::new(
                    quiet,
                    "mic",
                    Policy::new(vec![
                        Rule::drop(Filter::sink(sinks::TOAST)),
                        Rule::allow(Filter::sink_value(sinks::NETWORK, "https://push.example/")),
                    ]),
                ))
                .expect("source"),
        )
        .expect("register quiet");
    Arc::new(registry)
}

#[fixture]
fn scope() -> CallScope {
    CallScope::new(0, "me.app", TaintSet::empty())
}

fn services_with(notifier: MockNotifier) -> TrustedServices {
    TrustedServices::new(registry(), PUSH_ENDPOINT).with_notifier(Arc::new(notifier))
}

#[rstest]
fn untainted_toasts_are_delivered(mut scope: CallScope) {
    let mut notifier = MockNotifier::new();
    notifier
        .expect_toast()
        .withf(|package, text| package == "me.app" && text == "hello")
        .times(1)
        .returning(|_, _| Ok(()));
    let services = services_with(notifier);

    let value = services
        .handle(&mut scope, &callout(CapabilityCall::Toast { text: "hello".into() }))
        .expect("toast");

    assert_eq!(value, Value::Null);
}

#[rstest]
fn denied_toasts_raise_security_errors() {
    let mut notifier = MockNotifier::new();
    notifier.expect_toast().never();
    let services = services_with(notifier);
    let mut scope = CallScope::new(0, "me.app", TaintSet::singleton(label("secret.app/contacts")));

    let error = services
        .handle(&mut scope, &callout(CapabilityCall::Toast { text: "leak".into() }))
        .expect_err("denied");

    assert!(error.is_kind(kinds::SECURITY));
    assert_eq!(error.message(), "contacts may not be shown");
}

#[rstest]
fn dropped_toasts_succeed_without_delivery() {
    let mut notifier = MockNotifier::new();
    notifier.expect_toast().never();
    let services = services_with(notifier);
    let mut scope = CallScope::new(0, "me.app", TaintSet::singleton(label("quiet.app/mic")));

    let value = services
        .handle(&mut scope, &callout(CapabilityCall::Toast { text: "shh".into() }))
        .expect("dropped");

    assert_eq!(value, Value::Null);
}

#[rstest]
fn pushes_are_checked_against_the_endpoint() {
    let mut notifier = MockNotifier::new();
    notifier
        .expect_push()
        .withf(|endpoint, title, _| endpoint == PUSH_ENDPOINT && title == "t")
        .times(1)
        .returning(|_, _, _| Ok(()));
    let services = services_with(notifier);
    let mut scope = CallScope::new(0, "me.app", TaintSet::singleton(label("quiet.app/mic")));

    services
        .handle(
            &mut scope,
            &callout(CapabilityCall::Push {
                title: "t".into(),
                body: "b".into(),
            }),
        )
        .expect("push");
}

#[rstest]
fn backend_failures_reach_the_caller(mut scope: CallScope) {
    let mut devices = MockDeviceController::new();
    devices
        .expect_set_switch()
        .returning(|device, _| Err(RemoteException::illegal_argument(format!("no {device}"))));
    let services = TrustedServices::new(registry(), PUSH_ENDPOINT).with_devices(Arc::new(devices));

    let error = services
        .handle(
            &mut scope,
            &callout(CapabilityCall::SmartSwitch {
                device: "lamp".into(),
                on: true,
            }),
        )
        .expect_err("failed");

    assert_eq!(error.message(), "no lamp");
}

#[rstest]
fn taint_can_be_added_and_own_labels_removed(mut scope: CallScope) {
    let services = TrustedServices::new(registry(), PUSH_ENDPOINT);
    let own = TaintSet::singleton(label("me.app/location"));

    services
        .handle(&mut scope, &callout(CapabilityCall::AddTaint { taint: own.clone() }))
        .expect("add");
    assert!(scope.taint().is_tainted_with(&label("me.app/location")));

    services
        .handle(&mut scope, &callout(CapabilityCall::RemoveTaint { taint: own }))
        .expect("remove");
    assert!(scope.taint().is_empty());
}

#[rstest]
fn foreign_labels_cannot_be_removed() {
    let foreign = TaintSet::singleton(label("secret.app/contacts"));
    let services = TrustedServices::new(registry(), PUSH_ENDPOINT);
    let mut scope = CallScope::new(0, "me.app", foreign.clone());

    let error = services
        .handle(&mut scope, &callout(CapabilityCall::RemoveTaint { taint: foreign }))
        .expect_err("refused");

    assert!(error.is_kind(kinds::SECURITY));
    assert_eq!(scope.taint().len(), 1);
}

#[rstest]
fn store_reads_carry_the_writer_taint() {
    let services = TrustedServices::new(registry(), PUSH_ENDPOINT);
    let value = ParceledPayload::encode(&String::from("secret")).expect("encode");
    let mut writer = CallScope::new(0, "me.app", TaintSet::singleton(label("secret.app/contacts")));
    let mut reader = CallScope::new(1, "me.app", TaintSet::empty());

    services
        .handle(
            &mut writer,
            &callout(CapabilityCall::KvPut {
                store: "prefs".into(),
                key: "k".into(),
                value: value.clone(),
            }),
        )
        .expect("put");
    let read = services
        .handle(
            &mut reader,
            &callout(CapabilityCall::KvGet {
                store: "prefs".into(),
                key: "k".into(),
            }),
        )
        .expect("get");

    let decoded: Option<ParceledPayload> = serde_json::from_value(read).expect("payload");
    assert_eq!(decoded, Some(value));
    assert!(reader.taint().is_tainted_with(&label("secret.app/contacts")));
}

#[rstest]
fn missing_keys_read_as_null(mut scope: CallScope) {
    let services = TrustedServices::new(registry(), PUSH_ENDPOINT);

    let read = services
        .handle(
            &mut scope,
            &callout(CapabilityCall::KvGet {
                store: "nowhere".into(),
                key: "k".into(),
            }),
        )
        .expect("get");

    assert_eq!(read, Value::Null);
    assert!(scope.taint().is_empty());
}

#[rstest]
fn sensitive_view_reads_taint_the_reader(mut scope: CallScope) {
    let services = TrustedServices::new(registry(), PUSH_ENDPOINT);
    services.views().write(
        "pin",
        ParceledPayload::encode(&String::from("1234")).expect("encode"),
        TaintSet::singleton(label("me.app/pin")),
    );

    let read = services
        .handle(&mut scope, &callout(CapabilityCall::UiRead { view: "pin".into() }))
        .expect("read");

    assert_ne!(read, Value::Null);
    assert!(scope.taint().is_tainted_with(&label("me.app/pin")));
}

#[rstest]
fn fires_queue_deliveries(mut scope: CallScope) {
    let services = TrustedServices::new(registry(), PUSH_ENDPOINT);
    let subscriber = "me.app/Events::record(string)"
        .parse::<CallDescriptor>()
        .expect("descriptor");
    services
        .handle(
            &mut scope,
            &callout(CapabilityCall::Subscribe {
                channel: "me.app/ping".into(),
                subscriber,
            }),
        )
        .expect("subscribe");

    let queued = services
        .handle(
            &mut scope,
            &callout(CapabilityCall::Fire {
                channel: "me.app/ping".into(),
                args: Vec::new(),
            }),
        )
        .expect("fire");

    assert_eq!(queued, json!(1));
    assert_eq!(services.events().take_pending().len(), 1);
}

#[rstest]
fn unknown_capabilities_resolve_to_nothing(mut scope: CallScope) {
    let services = TrustedServices::new(registry(), PUSH_ENDPOINT);

    let error = services
        .handle(
            &mut scope,
            &Callout {
                capability: "camera".into(),
                method: "snap".into(),
                args: Value::Null,
            },
        )
        .expect_err("unknown");

    assert!(error.is_kind(kinds::UNKNOWN_CAPABILITY));
}
