//! Unit tests for component names.

use rstest::rstest;

use super::*;

#[rstest]
fn parses_flattened_form() {
    let name: ComponentName = "com.example.hr/Pulse".parse().expect("parse");
    assert_eq!(name.package(), "com.example.hr");
    assert_eq!(name.name(), "Pulse");
    assert_eq!(name.to_string(), "com.example.hr/Pulse");
}

#[rstest]
#[case("no-separator")]
#[case("/missing-package")]
#[case("missing-name/")]
#[case("pkg/has space")]
#[case("pkg/Class#method")]
fn rejects_malformed_names(#[case] input: &str) {
    assert!(input.parse::<ComponentName>().is_err(), "{input} should fail");
}

#[rstest]
fn serialises_as_flat_string() {
    let name = ComponentName::new("pkg", "Tag").expect("name");
    let json = serde_json::to_string(&name).expect("serialise");
    assert_eq!(json, "\"pkg/Tag\"");
    let back: ComponentName = serde_json::from_str(&json).expect("deserialise");
    assert_eq!(back, name);
}
