//! JSONL server over the worker's stdio.
//!
//! The host writes [`HostFrame`] lines to stdin; the worker answers each
//! request with one [`WorkerFrame::Response`] on stdout. While a call runs,
//! the worker may interleave [`WorkerFrame::Callout`] frames and waits for
//! the matching [`HostFrame::CalloutReply`] before continuing.
//!
//! Lines that fail to parse are answered with a protocol failure carrying
//! the request id when one can be recovered; the loop keeps serving.

use std::io::{BufRead, Write};

use serde_json::Value;
use tracing::{debug, info, warn};
use warden_core::{RemoteException, kinds};
use warden_core::protocol::{
    Callout, ControlResponse, FrameError, HostFrame, WorkerFrame, read_line, write_frame,
};

use crate::capability::CalloutPort;
use crate::dispatch::Worker;

const SERVER_TARGET: &str = "warden_worker::server";

/// Serves requests until the input closes or the worker is killed.
///
/// # Errors
///
/// Returns [`FrameError`] when reading or writing the channel fails.
pub fn serve<R: BufRead, W: Write>(
    worker: &Worker,
    mut reader: R,
    mut writer: W,
) -> Result<(), FrameError> {
    info!(target: SERVER_TARGET, "serving control channel");
    let mut callout_ids = 0_u64;
    while let Some(line) = read_line(&mut reader)? {
        match parse_frame(&line) {
            Ok(HostFrame::Request { id, request }) => {
                let response = {
                    let mut port = StdioPort {
                        reader: &mut reader,
                        writer: &mut writer,
                        next_id: &mut callout_ids,
                    };
                    worker.handle(request, &mut port)
                };
                write_frame(&mut writer, &WorkerFrame::Response { id, response })?;
                if worker.is_terminated() {
                    info!(target: SERVER_TARGET, "worker killed; closing channel");
                    return Ok(());
                }
            }
            Ok(HostFrame::CalloutReply { id, .. }) => {
                warn!(target: SERVER_TARGET, callout = id, "unexpected callout reply ignored");
            }
            Err((id, exception)) => {
                warn!(target: SERVER_TARGET, error = %exception, "malformed frame");
                let response = ControlResponse::Failed { exception };
                write_frame(&mut writer, &WorkerFrame::Response { id, response })?;
            }
        }
    }
    info!(target: SERVER_TARGET, "control channel closed");
    Ok(())
}

/// Parses a host frame, recovering the request id on failure.
fn parse_frame(line: &str) -> Result<HostFrame, (u64, RemoteException)> {
    let value: Value = serde_json::from_str(line.trim_end())
        .map_err(|error| (0, RemoteException::protocol(error.to_string())))?;
    let id = value.get("id").and_then(Value::as_u64).unwrap_or_default();
    serde_json::from_value(value).map_err(|error| (id, RemoteException::protocol(error.to_string())))
}

/// Callout port multiplexed over the server's own stdio.
struct StdioPort<'a, R, W> {
    reader: &'a mut R,
    writer: &'a mut W,
    next_id: &'a mut u64,
}

impl<R: BufRead, W: Write> CalloutPort for StdioPort<'_, R, W> {
    fn callout(&mut self, callout: Callout) -> Result<Value, RemoteException> {
        *self.next_id = self.next_id.saturating_add(1);
        let id = *self.next_id;
        let channel_error = |error: FrameError| {
            RemoteException::new(kinds::DEAD_OBJECT, format!("control channel failed: {error}"))
        };
        write_frame(self.writer, &WorkerFrame::Callout { id, callout }).map_err(channel_error)?;
        loop {
            let Some(line) = read_line(self.reader).map_err(channel_error)? else {
                return Err(RemoteException::new(
                    kinds::DEAD_OBJECT,
                    "control channel closed during a callout",
                ));
            };
            match parse_frame(&line) {
                Ok(HostFrame::CalloutReply { id: reply_id, reply }) if reply_id == id => {
                    debug!(target: SERVER_TARGET, callout = id, "callout answered");
                    return reply.into_result();
                }
                Ok(HostFrame::CalloutReply { id: reply_id, .. }) => {
                    warn!(target: SERVER_TARGET, callout = reply_id, "stale callout reply ignored");
                }
                Ok(HostFrame::Request { id: request_id, request }) => {
                    warn!(
                        target: SERVER_TARGET,
                        request = request.name(),
                        "request received during a callout"
                    );
                    let response = ControlResponse::Failed {
                        exception: RemoteException::protocol("worker is busy with a call"),
                    };
                    write_frame(
                        self.writer,
                        &WorkerFrame::Response {
                            id: request_id,
                            response,
                        },
                    )
                    .map_err(channel_error)?;
                }
                Err((_, exception)) => {
                    warn!(target: SERVER_TARGET, error = %exception, "malformed frame during a callout");
                }
            }
        }
    }
}
