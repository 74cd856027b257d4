//! Unit tests for manifest loading.

use rstest::{fixture, rstest};

use super::*;
use crate::sink::names;

#[fixture]
fn sinks() -> SinkRegistry {
    SinkRegistry::with_defaults()
}

const HR_MANIFEST: &str = r#"
package: com.example.hr
sources:
  - tag: pulse
    label: Heart rate
    policy:
      - log: { sink: NETWORK }
      - allow: { sink: NETWORK, value: "https://a.example/" }
      - deny: { sink: TOAST, message: "{source} stays off screen" }
      - drop:
  - tag: steps
channels:
  - name: updates
    exported: subscribe
  - name: private
"#;

#[rstest]
fn loads_sources_rules_and_channels(sinks: SinkRegistry) {
    let manifest = PackageManifest::from_yaml(HR_MANIFEST, &sinks).expect("manifest");
    assert_eq!(manifest.package(), "com.example.hr");

    let pulse = manifest.source("pulse").expect("pulse source");
    assert_eq!(pulse.label(), "Heart rate");
    assert_eq!(pulse.name().to_string(), "com.example.hr/pulse");
    assert_eq!(
        pulse.policy().rules(),
        [
            Rule::log(Filter::sink(names::NETWORK), DEFAULT_AUDIT_MESSAGE),
            Rule::allow(Filter::sink_value(names::NETWORK, "https://a.example/")),
            Rule::deny(Filter::sink(names::TOAST), "{source} stays off screen"),
            Rule::drop(Filter::Always),
        ]
    );

    let steps = manifest.source("steps").expect("steps source");
    assert_eq!(steps.label(), "steps");
    assert!(steps.policy().rules().is_empty());

    let updates = manifest.channel("updates").expect("channel");
    assert!(updates.exported().allows_subscribe());
    assert!(!updates.exported().allows_fire());
    assert_eq!(
        manifest.channel("private").map(ChannelDecl::exported),
        Some(ChannelExport::None)
    );
}

#[rstest]
#[case::unknown_rule(
    "package: p\nsources:\n  - tag: t\n    policy:\n      - quarantine: {}\n",
    "unknown rule 'quarantine'"
)]
#[case::unknown_sink(
    "package: p\nsources:\n  - tag: t\n    policy:\n      - deny: { sink: FAX }\n",
    "unknown sink 'FAX'"
)]
#[case::duplicate_tag(
    "package: p\nsources:\n  - tag: t\n  - tag: t\n",
    "declares source 't' more than once"
)]
#[case::value_without_sink(
    "package: p\nsources:\n  - tag: t\n    policy:\n      - allow: { value: x }\n",
    "filter value without a sink"
)]
#[case::value_on_basic_sink(
    "package: p\nsources:\n  - tag: t\n    policy:\n      - allow: { sink: TOAST, value: x }\n",
    "does not accept a filter value"
)]
#[case::message_on_drop(
    "package: p\nsources:\n  - tag: t\n    policy:\n      - drop: { message: hi }\n",
    "'drop' rules take no message"
)]
#[case::two_kinds_in_one_rule(
    "package: p\nsources:\n  - tag: t\n    policy:\n      - { allow: {}, drop: {} }\n",
    "not a single"
)]
fn malformed_manifests_abort_loading(
    sinks: SinkRegistry,
    #[case] text: &str,
    #[case] expected: &str,
) {
    let error = PackageManifest::from_yaml(text, &sinks).expect_err("must fail");
    assert!(
        error.to_string().contains(expected),
        "unexpected error: {error}"
    );
}

#[rstest]
fn unknown_fields_are_rejected(sinks: SinkRegistry) {
    let result = PackageManifest::from_yaml("package: p\nversion: 2\n", &sinks);
    assert!(matches!(result, Err(PolicyParseError::Yaml { .. })));
}

#[rstest]
fn builder_refuses_foreign_sources() {
    let foreign = Source::new(
        "other/tag".parse().expect("name"),
        "Other",
        Policy::default(),
    );
    let result = PackageManifest::new("mine").with_source(foreign);
    assert!(matches!(result, Err(PolicyParseError::ForeignEntry { .. })));
}
