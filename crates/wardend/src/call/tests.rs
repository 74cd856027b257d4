//! Unit tests for calls and results.

use std::collections::BTreeMap;
use std::sync::mpsc;

use rstest::{fixture, rstest};
use warden_core::{
    CallKind, ComponentName, DescriptorBuilder, HandleId, ObjectId, OutputSlot, RETURN_VALUE,
    RemoteException, TaintSet, kinds,
};

use super::{HostCall, HostResult, PendingCall};
use crate::error::HostError;
use crate::handle::{HostArg, HostHandle};

fn label(text: &str) -> ComponentName {
    text.parse().expect("label")
}

fn handle_with(taint: TaintSet) -> HostHandle {
    HostHandle::from_slot(
        0,
        1,
        OutputSlot {
            handle: HandleId::new(1),
            object: ObjectId::new(1),
            declared_type: "string".into(),
            actual_type: "string".into(),
        },
        taint,
    )
}

#[fixture]
fn call() -> HostCall {
    let descriptor = DescriptorBuilder::new(CallKind::Static, label("warden/Runtime"))
        .method("noop")
        .build()
        .expect("descriptor");
    HostCall::new(descriptor)
}

#[rstest]
fn inbound_taint_unions_handles_and_extras(call: HostCall) {
    let call = call
        .taint(&TaintSet::singleton(label("a.pkg/x")))
        .arg(HostArg::handle(handle_with(TaintSet::singleton(label("b.pkg/y")))))
        .arg(HostArg::null());

    let inbound = call.inbound_taint();

    assert!(inbound.is_tainted_with(&label("a.pkg/x")));
    assert!(inbound.is_tainted_with(&label("b.pkg/y")));
    assert_eq!(inbound.len(), 2);
}

#[rstest]
fn untainted_calls_have_empty_inbound_taint(call: HostCall) {
    assert!(call.inbound_taint().is_empty());
    assert!(!call.allows_best_match());
}

#[rstest]
fn failed_results_expose_the_throwable() {
    let result = HostResult::failed(1, RemoteException::illegal_argument("bad"));

    assert!(result.is_error());
    assert!(
        result
            .throwable()
            .is_some_and(|error| error.is_kind(kinds::ILLEGAL_ARGUMENT))
    );
    assert!(result.return_value().is_err());
}

#[rstest]
fn completed_results_expose_outputs() {
    let mut outputs = BTreeMap::new();
    outputs.insert(RETURN_VALUE, Some(handle_with(TaintSet::empty())));
    outputs.insert(0, None);
    let result = HostResult::completed(3, outputs);

    assert_eq!(result.sandbox(), 3);
    assert!(result.throwable().is_none());
    assert!(result.return_value().expect("outputs").is_some());
    assert!(result.output(0).expect("outputs").is_none());
    assert!(result.output(5).expect("outputs").is_none());
}

#[rstest]
fn waiting_calls_report_abandonment() {
    let (sender, receiver) = mpsc::channel::<Result<HostResult, HostError>>();
    drop(sender);
    let pending = PendingCall::Waiting(receiver);

    assert!(pending.is_async());
    assert!(matches!(pending.wait(), Err(HostError::Abandoned)));
}
