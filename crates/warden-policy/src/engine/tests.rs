//! Unit tests for the policy engine.

use std::sync::Arc;

use rstest::{fixture, rstest};
use warden_core::{ComponentName, TaintSet, TaintSetBuilder};

use super::*;
use crate::manifest::{PackageManifest, Source};
use crate::rule::{Filter, Policy, Rule};
use crate::sink::names;

fn label(text: &str) -> ComponentName {
    text.parse().expect("valid label")
}

fn source(name: &str, rules: Vec<Rule>) -> Source {
    Source::new(label(name), name, Policy::new(rules))
}

#[fixture]
fn engine() -> PolicyEngine {
    let hr = PackageManifest::new("hr")
        .with_source(source("hr/pulse", vec![Rule::deny(Filter::Always, "pulse denied")]))
        .and_then(|manifest| manifest.with_source(source("hr/steps", vec![])))
        .and_then(|manifest| {
            manifest.with_source(source("hr/quiet", vec![Rule::drop(Filter::Always)]))
        })
        .expect("hr manifest");
    let cam = PackageManifest::new("cam")
        .with_source(source(
            "cam/frames",
            vec![Rule::deny(Filter::sink(names::TOAST), "frames denied")],
        ))
        .expect("cam manifest");
    let mut registry = ManifestRegistry::new();
    registry.register(hr).expect("register hr");
    registry.register(cam).expect("register cam");
    PolicyEngine::new(Arc::new(registry))
}

fn taint(labels: &[&str]) -> TaintSet {
    labels
        .iter()
        .fold(TaintSetBuilder::new(), |builder, name| {
            builder.add_label(label(name))
        })
        .build()
}

#[rstest]
fn absent_or_empty_taint_always_accepts(engine: PolicyEngine) {
    let mut request = SinkRequest::new(names::TOAST);
    assert_eq!(engine.check_sink(None, &mut request), Ok(true));
    assert_eq!(
        engine.check_sink(Some(&TaintSet::empty()), &mut request),
        Ok(true)
    );
}

#[rstest]
fn sources_without_rules_allow(engine: PolicyEngine) {
    let mut request = SinkRequest::new(names::TOAST);
    assert_eq!(
        engine.check_sink(Some(&taint(&["hr/steps"])), &mut request),
        Ok(true)
    );
}

#[rstest]
fn silent_drop_returns_false(engine: PolicyEngine) {
    let mut request = SinkRequest::new(names::TOAST);
    assert_eq!(
        engine.check_sink(Some(&taint(&["hr/quiet"])), &mut request),
        Ok(false)
    );
}

#[rstest]
#[case::unknown_package("nobody/tag")]
#[case::unknown_source("hr/unknown")]
fn unknown_labels_fail_closed(engine: PolicyEngine, #[case] name: &str) {
    let mut request = SinkRequest::new(names::TOAST);
    assert_eq!(
        engine.check_sink(Some(&taint(&[name, "hr/steps"])), &mut request),
        Ok(false)
    );
}

#[rstest]
fn messages_aggregate_with_suppressed_entries(engine: PolicyEngine) {
    let mut request = SinkRequest::new(names::TOAST);
    let failure = engine
        .check_sink(Some(&taint(&["hr/pulse", "cam/frames"])), &mut request)
        .expect_err("rejected");
    // Labels are evaluated in label order, so "cam" reports first.
    assert_eq!(failure.message(), "frames denied");
    assert_eq!(failure.origin(), &label("cam/frames"));
    assert_eq!(
        failure.suppressed(),
        [(label("hr/pulse"), String::from("pulse denied"))]
    );

    let remote = failure.to_remote();
    assert_eq!(remote.message(), "frames denied");
    assert_eq!(remote.suppressed().len(), 1);
}

#[rstest]
fn caller_variant_reads_the_ambient_taint(engine: PolicyEngine) {
    let mut context = MockTaintContext::new();
    context
        .expect_current_taint()
        .times(1)
        .returning(|| Some(taint(&["hr/pulse"])));
    let mut request = SinkRequest::new(names::PUSH);
    let failure = engine
        .check_caller_sink(&context, &mut request)
        .expect_err("rejected");
    assert_eq!(failure.message(), "pulse denied");
}
