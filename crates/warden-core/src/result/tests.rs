//! Unit tests for call results.

use rstest::{fixture, rstest};

use super::*;

#[fixture]
fn completed() -> CallResult {
    let slot = OutputSlot {
        handle: HandleId::new(1),
        object: ObjectId::new(10),
        declared_type: String::from("int"),
        actual_type: String::from("int"),
    };
    CallResult::completed(BTreeMap::from([(RETURN_VALUE, Some(slot)), (0, None)]))
}

#[rstest]
fn completed_results_expose_outputs(completed: CallResult) {
    assert!(!completed.is_error());
    assert!(completed.throwable().is_none());
    let ret = completed.output(RETURN_VALUE).expect("completed");
    assert_eq!(ret.map(|slot| slot.object), Some(ObjectId::new(10)));
    assert_eq!(completed.output(0).expect("completed"), None);
    assert_eq!(completed.output(3).expect("completed"), None);
    assert_eq!(completed.outputs().count(), 1);
}

#[rstest]
fn failed_results_surface_the_exception() {
    let result = CallResult::failed(RemoteException::illegal_argument("bad"));
    assert!(result.is_error());
    assert_eq!(result.throwable().map(RemoteException::message).as_deref(), Some("bad"));
    let error = result.output(RETURN_VALUE).expect_err("failed");
    assert_eq!(error.message(), "bad");
}

#[rstest]
fn results_are_tagged_on_the_wire(completed: CallResult) {
    let value = serde_json::to_value(&completed).expect("serialise");
    assert_eq!(value["status"], "completed");
    let back: CallResult = serde_json::from_value(value).expect("deserialise");
    assert_eq!(back, completed);
}
