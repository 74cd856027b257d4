//! Unit tests for worker launchers and channels.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use rstest::{fixture, rstest};
use warden_config::{Config, LaunchMode};
use warden_core::protocol::{ControlRequest, ControlResponse, HostFrame, WorkerFrame};
use warden_worker::ModuleRegistry;

use super::{
    ChannelError, ControlChannel, InProcessChannel, ProcessLauncher, WorkerLauncher, launcher_for,
    resolve_executable,
};

#[fixture]
fn registry() -> Arc<ModuleRegistry> {
    Arc::new(ModuleRegistry::with_builtins().expect("builtins"))
}

fn round_trip(channel: &mut dyn ControlChannel, id: u64, request: ControlRequest) -> ControlResponse {
    channel
        .send(&HostFrame::request(id, request))
        .expect("send");
    match channel.receive().expect("receive") {
        WorkerFrame::Response { id: answered, response } => {
            assert_eq!(answered, id);
            response
        }
        WorkerFrame::Callout { .. } => panic!("unexpected callout"),
    }
}

#[rstest]
fn in_process_workers_answer_control_requests(registry: Arc<ModuleRegistry>) {
    let mut channel = InProcessChannel::spawn(0, registry).expect("spawn");

    let response = round_trip(&mut channel, 1, ControlRequest::Pid);
    assert_eq!(response, ControlResponse::Pid { pid: std::process::id() });

    let response = round_trip(&mut channel, 2, ControlRequest::Kill);
    assert_eq!(response, ControlResponse::Killed);

    channel.shutdown(Duration::ZERO).expect("shutdown");
}

#[rstest]
fn closed_channels_refuse_frames(registry: Arc<ModuleRegistry>) {
    let mut channel = InProcessChannel::spawn(3, registry).expect("spawn");
    channel.shutdown(Duration::ZERO).expect("shutdown");

    let error = channel
        .send(&HostFrame::request(1, ControlRequest::Status))
        .expect_err("closed");

    assert!(matches!(error, ChannelError::Closed));
}

#[rstest]
fn in_process_mode_launches_threads(registry: Arc<ModuleRegistry>) {
    let config = Config::default().with_launch_mode(LaunchMode::InProcess);
    let launcher = launcher_for(&config, registry);

    let mut channel = launcher.launch(1).expect("launch");
    let response = round_trip(channel.as_mut(), 1, ControlRequest::Status);

    assert!(matches!(response, ControlResponse::Status { .. }));
    channel.shutdown(Duration::ZERO).expect("shutdown");
}

#[rstest]
#[case(true)]
#[case(false)]
fn process_launchers_keep_their_settings(#[case] sandboxed: bool) {
    let launcher = ProcessLauncher::new("/opt/warden/warden-worker", sandboxed);

    assert_eq!(launcher.executable(), Path::new("/opt/warden/warden-worker"));
    assert_eq!(launcher.is_sandboxed(), sandboxed);
}

#[rstest]
fn missing_executables_fail_to_spawn() {
    let launcher = ProcessLauncher::new("/nonexistent/warden-worker", false);

    let outcome = launcher.launch(0);

    assert!(matches!(outcome, Err(ChannelError::Spawn { .. })));
}

#[rstest]
#[case("/usr/libexec/warden-worker")]
#[case("bin/warden-worker")]
fn paths_with_directories_are_kept(#[case] configured: &str) {
    assert_eq!(resolve_executable(Path::new(configured)), PathBuf::from(configured));
}

#[rstest]
fn bare_names_fall_back_to_path_search() {
    let resolved = resolve_executable(Path::new("warden-worker-that-does-not-exist"));

    assert_eq!(resolved, PathBuf::from("warden-worker-that-does-not-exist"));
}
