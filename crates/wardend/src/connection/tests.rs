//! Unit tests for request correlation.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex};

use mockall::Sequence;
use rstest::rstest;
use serde_json::json;
use warden_core::protocol::{
    Callout, CalloutReply, ControlRequest, ControlResponse, HostFrame, WorkerFrame,
};
use warden_core::{RemoteException, kinds};

use super::{CalloutHandler, RefuseCallouts, WorkerConnection};
use crate::channel::{ChannelError, MockControlChannel};

fn scripted(frames: Vec<WorkerFrame>, sent: Arc<Mutex<Vec<HostFrame>>>) -> MockControlChannel {
    let mut channel = MockControlChannel::new();
    channel.expect_send().returning(move |frame| {
        sent.lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .push(frame.clone());
        Ok(())
    });
    let mut queue = VecDeque::from(frames);
    channel
        .expect_receive()
        .returning(move || queue.pop_front().ok_or(ChannelError::Closed));
    channel
}

struct Echo;

impl CalloutHandler for Echo {
    fn handle(&mut self, callout: Callout) -> Result<serde_json::Value, RemoteException> {
        Ok(callout.args)
    }
}

#[rstest]
fn matching_response_is_returned() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let channel = scripted(
        vec![WorkerFrame::Response {
            id: 1,
            response: ControlResponse::Pid { pid: 42 },
        }],
        Arc::clone(&sent),
    );
    let mut connection = WorkerConnection::new(0, Box::new(channel));

    let response = connection
        .request(ControlRequest::Pid, &mut RefuseCallouts)
        .expect("response");

    assert_eq!(response, ControlResponse::Pid { pid: 42 });
    let frames = sent.lock().expect("lock");
    assert_eq!(frames.as_slice(), [HostFrame::request(1, ControlRequest::Pid)]);
}

#[rstest]
fn stale_responses_are_skipped() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let channel = scripted(
        vec![
            WorkerFrame::Response {
                id: 7,
                response: ControlResponse::Destroyed,
            },
            WorkerFrame::Response {
                id: 1,
                response: ControlResponse::Uid { uid: 1000 },
            },
        ],
        sent,
    );
    let mut connection = WorkerConnection::new(3, Box::new(channel));

    let response = connection
        .request(ControlRequest::Uid, &mut RefuseCallouts)
        .expect("response");

    assert_eq!(response, ControlResponse::Uid { uid: 1000 });
}

#[rstest]
fn callouts_are_answered_before_the_response() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let channel = scripted(
        vec![
            WorkerFrame::Callout {
                id: 1,
                callout: Callout {
                    capability: "toast".into(),
                    method: "show".into(),
                    args: json!({"text": "hi"}),
                },
            },
            WorkerFrame::Response {
                id: 1,
                response: ControlResponse::Killed,
            },
        ],
        Arc::clone(&sent),
    );
    let mut connection = WorkerConnection::new(0, Box::new(channel));

    let response = connection
        .request(ControlRequest::Kill, &mut Echo)
        .expect("response");

    assert_eq!(response, ControlResponse::Killed);
    let frames = sent.lock().expect("lock");
    assert_eq!(
        frames.get(1),
        Some(&HostFrame::CalloutReply {
            id: 1,
            reply: CalloutReply::Returned {
                value: json!({"text": "hi"}),
            },
        })
    );
}

#[rstest]
fn refused_callouts_raise_unknown_capability() {
    let mut refuse = RefuseCallouts;
    let error = refuse
        .handle(Callout {
            capability: "push".into(),
            method: "send".into(),
            args: json!({}),
        })
        .expect_err("refused");
    assert!(error.is_kind(kinds::UNKNOWN_CAPABILITY));
}

#[rstest]
fn a_closed_channel_is_reported() {
    let channel = scripted(Vec::new(), Arc::new(Mutex::new(Vec::new())));
    let mut connection = WorkerConnection::new(0, Box::new(channel));

    let error = connection
        .request(ControlRequest::Status, &mut RefuseCallouts)
        .expect_err("closed");

    assert!(matches!(error, ChannelError::Closed));
}

#[rstest]
fn request_ids_increase() {
    let sent = Arc::new(Mutex::new(Vec::new()));
    let channel = scripted(
        vec![
            WorkerFrame::Response {
                id: 1,
                response: ControlResponse::Bound,
            },
            WorkerFrame::Response {
                id: 2,
                response: ControlResponse::Destroyed,
            },
        ],
        Arc::clone(&sent),
    );
    let mut connection = WorkerConnection::new(0, Box::new(channel));

    connection
        .request(ControlRequest::Status, &mut RefuseCallouts)
        .expect("first");
    connection
        .request(ControlRequest::ForceGc, &mut RefuseCallouts)
        .expect("second");

    let ids: Vec<u64> = sent
        .lock()
        .expect("lock")
        .iter()
        .filter_map(|frame| match frame {
            HostFrame::Request { id, .. } => Some(*id),
            HostFrame::CalloutReply { .. } => None,
        })
        .collect();
    assert_eq!(ids, [1, 2]);
}

#[rstest]
fn shutdown_forwards_the_grace_period() {
    let mut channel = MockControlChannel::new();
    let mut sequence = Sequence::new();
    channel
        .expect_shutdown()
        .withf(|grace| grace.as_secs() == 3)
        .times(1)
        .in_sequence(&mut sequence)
        .returning(|_| Ok(()));
    let connection = WorkerConnection::new(0, Box::new(channel));

    connection
        .shutdown(std::time::Duration::from_secs(3))
        .expect("shutdown");
}
