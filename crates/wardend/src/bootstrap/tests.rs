//! Unit tests for the bootstrap sequence.

use std::fs;
use std::sync::Arc;

use camino::Utf8PathBuf;
use rstest::{fixture, rstest};
use tempfile::TempDir;
use warden_config::{Config, LaunchMode};
use warden_core::protocol::WorkerState;
use warden_worker::ModuleRegistry;

use super::{BootstrapError, ConfigLoader, StaticConfigLoader, bootstrap_with};
use crate::health::MockHealthReporter;

const MANIFEST: &str = r#"
package: com.example.hr
sources:
  - tag: pulse
    label: Heart rate
    policy:
      - deny: { sink: TOAST }
"#;

#[fixture]
fn modules() -> Arc<ModuleRegistry> {
    Arc::new(ModuleRegistry::with_builtins().expect("builtins"))
}

fn in_process() -> Config {
    Config::default().with_launch_mode(LaunchMode::InProcess)
}

fn succeeding_reporter() -> MockHealthReporter {
    let mut reporter = MockHealthReporter::new();
    reporter.expect_bootstrap_starting().times(1).return_const(());
    reporter.expect_bootstrap_succeeded().times(1).return_const(());
    reporter.expect_bootstrap_failed().never();
    reporter.expect_sandbox_event().return_const(());
    reporter
}

fn failing_reporter() -> MockHealthReporter {
    let mut reporter = MockHealthReporter::new();
    reporter.expect_bootstrap_starting().times(1).return_const(());
    reporter.expect_bootstrap_succeeded().never();
    reporter.expect_bootstrap_failed().times(1).return_const(());
    reporter
}

fn manifest_dir(contents: &str) -> (TempDir, Utf8PathBuf) {
    let dir = TempDir::new().expect("temp dir");
    fs::write(dir.path().join("hr.yaml"), contents).expect("write manifest");
    let path = Utf8PathBuf::from_path_buf(dir.path().to_path_buf()).expect("utf-8 path");
    (dir, path)
}

struct BrokenLoader;

impl ConfigLoader for BrokenLoader {
    fn load(&self) -> Result<Config, Arc<warden_config::ConfigError>> {
        Config::resolve_from_iter(["wardend", "--pool-size", "0"]).map_err(Arc::new)
    }
}

#[rstest]
fn bootstrap_wires_a_lazy_pool(modules: Arc<ModuleRegistry>) {
    let loader = StaticConfigLoader::new(in_process().with_pool_size(3));

    let daemon = bootstrap_with(&loader, Arc::new(succeeding_reporter()), modules)
        .expect("bootstrap");

    assert_eq!(daemon.config().pool_size(), 3);
    assert_eq!(daemon.manager().pool_size(), 3);
    assert_eq!(daemon.manager().status(0).expect("status"), WorkerState::Unbound);
    daemon.shutdown();
}

#[rstest]
fn configuration_failures_are_reported(modules: Arc<ModuleRegistry>) {
    let error = bootstrap_with(&BrokenLoader, Arc::new(failing_reporter()), modules)
        .expect_err("invalid pool size");

    assert!(matches!(error, BootstrapError::Configuration { .. }));
    assert!(!error.is_informational());
}

#[rstest]
fn manifests_are_loaded_from_the_configured_directory(modules: Arc<ModuleRegistry>) {
    let (_dir, path) = manifest_dir(MANIFEST);
    let loader = StaticConfigLoader::new(in_process().with_manifest_dir(path));

    let daemon = bootstrap_with(&loader, Arc::new(succeeding_reporter()), modules)
        .expect("bootstrap");

    let manifests = daemon.manager().services().engine().manifests();
    assert!(manifests.manifest("com.example.hr").is_some());
}

#[rstest]
fn broken_manifests_abort_bootstrap(modules: Arc<ModuleRegistry>) {
    let (_dir, path) = manifest_dir("package: [not, a, name]\n");
    let loader = StaticConfigLoader::new(in_process().with_manifest_dir(path));

    let error = bootstrap_with(&loader, Arc::new(failing_reporter()), modules)
        .expect_err("broken manifest");

    assert!(matches!(error, BootstrapError::Manifests { .. }));
}

#[rstest]
fn help_requests_are_informational() {
    let source = Config::resolve_from_iter(["wardend", "--help"]).expect_err("help");

    let error = BootstrapError::Configuration {
        source: Arc::new(source),
    };

    assert!(error.is_informational());
}
