//! Crate-level integration and BDD tests.

use std::sync::Arc;

use warden_core::TaintSet;

use crate::{ManifestRegistry, PackageManifest, PolicyEngine, SinkRegistry, SinkRequest, sinks};


#[test]
fn yaml_manifests_drive_the_engine() {
    let sink_registry = SinkRegistry::with_defaults();
    let manifest = PackageManifest::from_yaml(
        concat!(
            "package: com.example.hr\n",
            "sources:\n",
            "  - tag: pulse\n",
            "    policy:\n",
            "      - log: { sink: NETWORK }\n",
            "      - allow: { sink: NETWORK, value: \"https://a.example/\" }\n",
            "      - deny: {}\n",
        ),
        &sink_registry,
    )
    .expect("manifest");
    let mut registry = ManifestRegistry::new();
    registry.register(manifest).expect("register");
    let engine = PolicyEngine::new(Arc::new(registry));
    let taint = TaintSet::singleton("com.example.hr/pulse".parse().expect("label"));

    let mut network = SinkRequest::network(sinks::NETWORK, "https://a.example/");
    assert_eq!(engine.check_sink(Some(&taint), &mut network), Ok(true));
    assert_eq!(network.audit_notes().len(), 1);

    let mut toast = SinkRequest::new(sinks::TOAST);
    let failure = engine
        .check_sink(Some(&taint), &mut toast)
        .expect_err("toast denied");
    assert_eq!(
        failure.message(),
        "Data from com.example.hr/pulse may not be sent to TOAST."
    );
}
