//! Unit tests for sandbox objects.

use rstest::{fixture, rstest};
use warden_core::{ParceledPayload, kinds};

use super::*;

#[fixture]
fn ids() -> ObjectIds {
    ObjectIds::new()
}

#[rstest]
fn identities_are_unique_and_start_at_one(ids: ObjectIds) {
    let first = ids.allocate();
    let second = ids.allocate();
    assert_eq!(first.get(), 1);
    assert_ne!(first, second);
}

#[rstest]
fn encoded_objects_keep_their_bytes_until_decoded(ids: ObjectIds) {
    let payload = ParceledPayload::from_raw("int", "  42 ");
    let mut object = ids.wrap_encoded(payload.clone());
    assert_eq!(object.type_name(), "int");
    assert_eq!(object.encode().expect("encode"), payload);

    assert_eq!(object.get::<i32>().copied(), Ok(42));
    assert_eq!(object.encode().expect("encode").data(), "42");
}

#[rstest]
fn live_values_mutate_in_place(ids: ObjectIds) {
    let mut object = ids.wrap(String::from("ab"));
    let id = object.id();
    object.get_mut::<String>().expect("string").push('c');
    assert_eq!(object.id(), id);
    assert_eq!(object.into_value::<String>(), Ok(String::from("abc")));
}

#[rstest]
#[case::live(true)]
#[case::encoded(false)]
fn wrong_types_are_illegal_arguments(ids: ObjectIds, #[case] live: bool) {
    let mut object = if live {
        ids.wrap(7_i64)
    } else {
        ids.wrap_encoded(ParceledPayload::from_raw("long", "7"))
    };
    let error = object.get::<String>().expect_err("type mismatch");
    assert!(error.is_kind(kinds::ILLEGAL_ARGUMENT));
    assert!(error.message().contains("expected string"), "{error}");
}

#[rstest]
fn undecodable_payloads_are_illegal_arguments(ids: ObjectIds) {
    let mut object = ids.wrap_encoded(ParceledPayload::from_raw("int", "not a number"));
    let error = object.get::<i32>().expect_err("decode failure");
    assert!(error.is_kind(kinds::ILLEGAL_ARGUMENT));
    assert_eq!(object.type_name(), "int");
}
