//! Unit tests for capability callouts.

use mockall::predicate::function;
use rstest::rstest;
use serde_json::json;
use warden_core::protocol::Callout;
use warden_core::{ComponentName, TaintSet, kinds};

use super::*;

#[rstest]
#[case::toast("toast", Some(Capability::Toast))]
#[case::smartswitch("smartswitch", Some(Capability::SmartSwitch))]
#[case::ui("ui", Some(Capability::Ui))]
#[case::unknown("camera", None)]
fn capability_names_resolve(#[case] name: &str, #[case] expected: Option<Capability>) {
    assert_eq!(name.parse::<Capability>().ok(), expected);
}

#[rstest]
fn grants_drop_unknown_names() {
    let names = vec![
        String::from("toast"),
        String::from("camera"),
        String::from("kvs"),
    ];
    assert_eq!(
        Capability::parse_grants(&names),
        vec![Capability::Toast, Capability::Kvs]
    );
}

#[rstest]
fn calls_split_into_capability_and_method() {
    let callout = CapabilityCall::SmartSwitch {
        device: String::from("lamp"),
        on: true,
    }
    .into_callout()
    .expect("encodes");
    assert_eq!(callout.capability, "smartswitch");
    assert_eq!(callout.method, "set");
    assert_eq!(callout.args, json!({"device": "lamp", "on": true}));
}

#[rstest]
fn callouts_parse_back_into_calls() {
    let label = ComponentName::new("com.example.hr", "pulse").expect("valid");
    let call = CapabilityCall::AddTaint {
        taint: TaintSet::singleton(label),
    };
    let callout = call.clone().into_callout().expect("encodes");
    assert_eq!(CapabilityCall::from_callout(&callout), Ok(call));
}

#[rstest]
#[case::unknown_capability("camera", "snap", json!({}), kinds::UNKNOWN_CAPABILITY)]
#[case::unknown_method("toast", "explode", json!({"text": "x"}), kinds::ILLEGAL_ARGUMENT)]
#[case::bad_args("toast", "show", json!({"words": 1}), kinds::ILLEGAL_ARGUMENT)]
fn malformed_callouts_are_rejected(
    #[case] capability: &str,
    #[case] method: &str,
    #[case] args: Value,
    #[case] kind: &str,
) {
    let callout = Callout {
        capability: capability.to_owned(),
        method: method.to_owned(),
        args,
    };
    let error = CapabilityCall::from_callout(&callout).expect_err("rejected");
    assert!(error.is_kind(kind), "{error}");
}

#[rstest]
fn granted_capabilities_reach_the_port() {
    let mut port = MockCalloutPort::new();
    port.expect_callout()
        .with(function(|callout: &Callout| {
            callout.capability == "toast" && callout.args == json!({"text": "hi"})
        }))
        .times(1)
        .returning(|_| Ok(Value::Null));
    let grants = [Capability::Toast];
    let mut api = TrustedApi::new(&grants, &mut port);
    assert_eq!(api.capability("toast"), Some(Capability::Toast));
    api.toast("hi").expect("delivered");
}

#[rstest]
fn ungranted_capabilities_resolve_to_nothing() {
    let mut port = MockCalloutPort::new();
    port.expect_callout().never();
    let grants = [Capability::Toast];
    let mut api = TrustedApi::new(&grants, &mut port);
    assert_eq!(api.capability("push"), None);
    let error = api.push("title", "body").expect_err("not granted");
    assert!(error.is_kind(kinds::UNKNOWN_CAPABILITY));
}

#[rstest]
fn store_reads_decode_optional_payloads() {
    let mut port = MockCalloutPort::new();
    port.expect_callout()
        .times(1)
        .returning(|_| Ok(json!({"type_name": "int", "data": "5"})));
    let grants = [Capability::Kvs];
    let mut api = TrustedApi::new(&grants, &mut port);
    let value = api.kv_get("prefs", "volume").expect("read");
    assert_eq!(value, Some(ParceledPayload::from_raw("int", "5")));
}
