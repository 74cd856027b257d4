//! End-to-end tests driving the `warden-worker` binary over its stdio.

use assert_cmd::Command;
use predicates::prelude::*;
use warden_core::protocol::{
    BindExtras, ControlRequest, ControlResponse, HostFrame, PROTOCOL_VERSION, RootService,
    WorkerFrame, decode_frame, encode_frame,
};

fn script(requests: Vec<ControlRequest>) -> String {
    requests
        .into_iter()
        .zip(1_u64..)
        .map(|(request, id)| encode_frame(&HostFrame::request(id, request)).expect("encode"))
        .collect()
}

fn bind() -> ControlRequest {
    ControlRequest::Bind {
        extras: BindExtras {
            sandbox_id: 0,
            trusted_api: Vec::new(),
            root_service: RootService {
                host_pid: std::process::id(),
                protocol_version: PROTOCOL_VERSION,
            },
            preload_packages: Vec::new(),
        },
    }
}

fn worker() -> Command {
    let mut command = Command::cargo_bin("warden-worker").expect("worker binary");
    command
        .env("WARDEN_LOG_FILTER", "warn")
        .env("WARDEN_LOG_FORMAT", "compact");
    command
}

#[test]
fn serves_requests_until_killed() {
    let output = worker()
        .write_stdin(script(vec![
            bind(),
            ControlRequest::Pid,
            ControlRequest::Kill,
            ControlRequest::Status,
        ]))
        .assert()
        .success()
        .get_output()
        .stdout
        .clone();
    let frames: Vec<WorkerFrame> = String::from_utf8(output)
        .expect("utf-8")
        .lines()
        .map(|line| decode_frame(line).expect("frame"))
        .collect();
    assert_eq!(frames.len(), 3, "no response after kill: {frames:?}");
    assert!(matches!(
        frames.first(),
        Some(WorkerFrame::Response {
            id: 1,
            response: ControlResponse::Bound
        })
    ));
    assert!(matches!(
        frames.last(),
        Some(WorkerFrame::Response {
            id: 3,
            response: ControlResponse::Killed
        })
    ));
}

#[test]
fn answers_malformed_lines_and_exits_on_eof() {
    worker()
        .write_stdin("not json\n")
        .assert()
        .success()
        .stdout(predicate::str::contains("\"kind\":\"failed\""));
}

#[test]
fn rejects_unknown_flags() {
    worker()
        .arg("--bogus")
        .assert()
        .failure()
        .stderr(predicate::str::contains("--bogus"));
}
