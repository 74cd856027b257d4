//! Unit tests for the manifest registry.

use std::fs;

use rstest::rstest;
use tempfile::TempDir;

use super::*;

fn write(dir: &TempDir, name: &str, text: &str) {
    fs::write(dir.path().join(name), text).expect("write manifest");
}

#[rstest]
fn loads_yaml_files_and_ignores_others() {
    let dir = TempDir::new().expect("temp dir");
    write(&dir, "hr.yaml", "package: com.example.hr\nsources:\n  - tag: pulse\n");
    write(&dir, "cam.yml", "package: com.example.cam\nchannels:\n  - name: frames\n");
    write(&dir, "notes.txt", "not a manifest");

    let registry =
        ManifestRegistry::load_dir(dir.path(), &SinkRegistry::with_defaults()).expect("load");
    assert_eq!(registry.len(), 2);

    let pulse: ComponentName = "com.example.hr/pulse".parse().expect("name");
    assert!(registry.source(&pulse).is_some());
    let frames: ComponentName = "com.example.cam/frames".parse().expect("name");
    assert!(registry.channel(&frames).is_some());
    let missing: ComponentName = "com.example.hr/steps".parse().expect("name");
    assert!(registry.source(&missing).is_none());
}

#[rstest]
fn one_bad_manifest_fails_the_load() {
    let dir = TempDir::new().expect("temp dir");
    write(&dir, "good.yaml", "package: good\n");
    write(&dir, "bad.yaml", "package: bad\nsources:\n  - tag: t\n    policy:\n      - nope: {}\n");

    let error = ManifestRegistry::load_dir(dir.path(), &SinkRegistry::with_defaults())
        .expect_err("must fail");
    let PolicyParseError::File { path, source } = &error else {
        panic!("expected a file error, got {error}");
    };
    assert!(path.ends_with("bad.yaml"));
    assert!(matches!(**source, PolicyParseError::UnknownRule { .. }));
}

#[rstest]
fn duplicate_packages_are_rejected() {
    let mut registry = ManifestRegistry::new();
    registry
        .register(PackageManifest::new("p"))
        .expect("first registration");
    let result = registry.register(PackageManifest::new("p"));
    assert!(matches!(
        result,
        Err(PolicyParseError::DuplicatePackage { .. })
    ));
}

#[rstest]
fn missing_directory_is_an_io_error() {
    let dir = TempDir::new().expect("temp dir");
    let result = ManifestRegistry::load_dir(
        &dir.path().join("absent"),
        &SinkRegistry::with_defaults(),
    );
    assert!(matches!(result, Err(PolicyParseError::Io { .. })));
}
