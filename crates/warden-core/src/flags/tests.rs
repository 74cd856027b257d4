//! Unit tests for call flags.

use rstest::rstest;

use super::*;

#[rstest]
#[case(CallFlags::empty(), false)]
#[case(CallFlags::ASYNC, true)]
#[case(CallFlags::NO_RETURN_VALUE, true)]
#[case(CallFlags::NO_RETURN_VALUE | CallFlags::FORCE_SYNC_ASYNC, false)]
#[case(CallFlags::ASYNC | CallFlags::FORCE_SYNC_ASYNC, true)]
fn async_policy(#[case] flags: CallFlags, #[case] expected: bool) {
    assert_eq!(flags.is_async(), expected);
}

#[rstest]
fn sandbox_override_requires_flag() {
    let flags = CallFlags::from(3_u32);
    assert_eq!(flags.sandbox_override(16), None);
}

#[rstest]
#[case(3, 16, Some(3))]
#[case(12, 4, Some(0))]
#[case(31, 16, Some(15))]
#[case(2, 0, None)]
fn sandbox_override_wraps_into_pool(
    #[case] index: u32,
    #[case] pool: usize,
    #[case] expected: Option<usize>,
) {
    let flags = CallFlags::ASYNC.with_sandbox(index);
    assert!(flags.contains(CallFlags::ASYNC));
    assert_eq!(flags.sandbox_override(pool), expected);
}

#[rstest]
fn flags_serialise_as_raw_bits() {
    let flags = CallFlags::FILTER_EXCEPTIONS.with_sandbox(5);
    let json = serde_json::to_string(&flags).expect("serialise");
    assert_eq!(json, (0x1800_0005_u32).to_string());
    let back: CallFlags = serde_json::from_str(&json).expect("deserialise");
    assert_eq!(back, flags);
}
