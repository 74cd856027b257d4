//! Unit tests for host handles and arguments.

use rstest::{fixture, rstest};
use warden_core::{
    ComponentName, HandleId, ObjectId, OutputSlot, ParamFlags, ParamValue, TaintSet,
};

use super::{ArgValue, HostArg, HostHandle};

#[fixture]
fn handle() -> HostHandle {
    let label: ComponentName = "com.example.camera/frames".parse().expect("label");
    HostHandle::from_slot(
        2,
        5,
        OutputSlot {
            handle: HandleId::new(11),
            object: ObjectId::new(40),
            declared_type: "warden/Buffer".into(),
            actual_type: "warden/Buffer".into(),
        },
        TaintSet::singleton(label),
    )
}

#[rstest]
fn handles_keep_their_origin(handle: HostHandle) {
    assert_eq!(handle.sandbox(), 2);
    assert_eq!(handle.generation(), 5);
    assert_eq!(handle.id(), HandleId::new(11));
    assert_eq!(handle.object(), ObjectId::new(40));
    assert_eq!(handle.declared_type(), "warden/Buffer");
    assert_eq!(handle.taint().len(), 1);
    assert_eq!(handle.to_string(), format!("{}@sandbox2#5", HandleId::new(11)));
}

#[rstest]
fn flags_accumulate(handle: HostHandle) {
    let arg = HostArg::handle(handle).released().by_ref().returned();
    assert_eq!(
        arg.flags(),
        ParamFlags::HANDLE_RELEASE | ParamFlags::BY_REF | ParamFlags::RETURN
    );
    assert!(arg.as_handle().is_some());
}

#[rstest]
fn values_are_encoded_on_the_host() {
    let arg = HostArg::value(&String::from("hello")).expect("encode");
    let ArgValue::Data(param) = arg.arg_value() else {
        panic!("expected data, got {:?}", arg.arg_value());
    };
    assert!(matches!(param.value(), ParamValue::Data(_)));
    assert!(arg.as_handle().is_none());
}

#[rstest]
fn null_arguments_carry_nothing() {
    let arg = HostArg::null().sync_only();
    assert_eq!(arg.arg_value(), &ArgValue::Null);
    assert_eq!(arg.flags(), ParamFlags::HANDLE_SYNC_ONLY);
}
