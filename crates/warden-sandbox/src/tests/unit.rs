//! Unit tests for sandbox profile construction.

use std::path::{Path, PathBuf};

use rstest::rstest;

use crate::profile::{EnvironmentPolicy, NetworkPolicy, SandboxProfile, WORKER_ENVIRONMENT};

#[test]
fn profile_whitelists_linux_runtime_roots() {
    let profile = SandboxProfile::new();
    if cfg!(target_os = "linux") {
        assert!(
            !profile.read_only_paths().is_empty(),
            "linux runtime roots should be whitelisted by default"
        );
    } else {
        assert!(profile.read_only_paths().is_empty());
    }
}

#[test]
fn environment_allowlist_deduplicates_entries() {
    let profile = SandboxProfile::new()
        .allow_environment_variable("KEEP_ME")
        .allow_environment_variable("KEEP_ME");

    let EnvironmentPolicy::AllowList(keys) = profile.environment_policy() else {
        panic!("unexpected environment policy: {:?}", profile.environment_policy());
    };
    assert_eq!(keys.len(), 1);
    assert!(keys.contains("KEEP_ME"));
}

#[test]
fn full_environment_absorbs_later_allowances() {
    let profile = SandboxProfile::new()
        .allow_full_environment()
        .allow_environment_variable("IGNORED");
    assert_eq!(profile.environment_policy(), &EnvironmentPolicy::InheritAll);
    assert_eq!(profile.environment_policy().to_exceptions().len(), 1);
}

#[rstest]
#[case::default(SandboxProfile::new(), NetworkPolicy::Deny)]
#[case::opened(SandboxProfile::new().allow_networking(), NetworkPolicy::Allow)]
fn network_policy_follows_the_builder(
    #[case] profile: SandboxProfile,
    #[case] expected: NetworkPolicy,
) {
    assert_eq!(profile.network_policy(), expected);
}

#[test]
fn read_write_paths_are_recorded() {
    let profile = SandboxProfile::new()
        .allow_read_path(PathBuf::from("/srv/data"))
        .allow_read_write_path(PathBuf::from("/var/tmp"));

    assert!(profile
        .read_only_paths()
        .iter()
        .any(|path| path.ends_with("data")));
    assert_eq!(profile.read_write_paths(), [PathBuf::from("/var/tmp")]);
}

#[test]
fn worker_profile_keeps_only_logging_variables_and_no_network() {
    let profile = SandboxProfile::for_worker("/opt/warden/warden-worker");

    assert!(profile.allows_executable(Path::new("/opt/warden/warden-worker")));
    assert!(!profile.allows_executable(Path::new("/bin/sh")));
    assert!(profile.network_policy().is_denied());

    let EnvironmentPolicy::AllowList(keys) = profile.environment_policy() else {
        panic!("worker profile must use an allow list");
    };
    assert_eq!(keys.len(), WORKER_ENVIRONMENT.len());
    assert!(WORKER_ENVIRONMENT.iter().all(|key| keys.contains(*key)));
}
