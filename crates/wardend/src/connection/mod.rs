//! Request/response correlation over a [`ControlChannel`].
//!
//! A worker may interleave callout frames with the response to a call. Each
//! callout is answered through a [`CalloutHandler`] before the host keeps
//! waiting, so trusted capabilities run while the call is still in flight.

use std::time::Duration;

use serde_json::Value;
use tracing::{debug, warn};
use warden_core::protocol::{
    Callout, CalloutReply, ControlRequest, ControlResponse, HostFrame, WorkerFrame,
};
use warden_core::{RemoteException, kinds};

use crate::channel::{ChannelError, ControlChannel};

const CONNECTION_TARGET: &str = "wardend::connection";

/// Answers callouts raised while a request is being served.
pub trait CalloutHandler {
    /// Runs one capability invocation.
    ///
    /// # Errors
    ///
    /// Returns the exception handed back to sandboxed code.
    fn handle(&mut self, callout: Callout) -> Result<Value, RemoteException>;
}

/// Handler for requests that must never call out.
#[derive(Debug, Default, Clone, Copy)]
pub struct RefuseCallouts;

impl CalloutHandler for RefuseCallouts {
    fn handle(&mut self, callout: Callout) -> Result<Value, RemoteException> {
        Err(RemoteException::new(
            kinds::UNKNOWN_CAPABILITY,
            format!(
                "capability '{}' is not available outside a call",
                callout.capability
            ),
        ))
    }
}

/// One worker's control channel with request numbering.
pub struct WorkerConnection {
    index: usize,
    channel: Box<dyn ControlChannel>,
    next_id: u64,
}

impl WorkerConnection {
    /// Wraps a freshly launched channel for slot `index`.
    #[must_use]
    pub fn new(index: usize, channel: Box<dyn ControlChannel>) -> Self {
        Self {
            index,
            channel,
            next_id: 1,
        }
    }

    /// Slot the worker serves.
    #[must_use]
    pub const fn index(&self) -> usize {
        self.index
    }

    /// Sends `request` and waits for its response, answering callouts on the
    /// way.
    ///
    /// Responses carrying another id belong to requests the host no longer
    /// waits for and are skipped.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] when the channel breaks.
    pub fn request(
        &mut self,
        request: ControlRequest,
        callouts: &mut dyn CalloutHandler,
    ) -> Result<ControlResponse, ChannelError> {
        let id = self.next_id;
        self.next_id = self.next_id.wrapping_add(1);
        debug!(
            target: CONNECTION_TARGET,
            sandbox = self.index,
            id,
            request = request.name(),
            "sending request"
        );
        self.channel.send(&HostFrame::request(id, request))?;
        loop {
            match self.channel.receive()? {
                WorkerFrame::Response {
                    id: answered,
                    response,
                } if answered == id => return Ok(response),
                WorkerFrame::Response { id: answered, .. } => {
                    warn!(
                        target: CONNECTION_TARGET,
                        sandbox = self.index,
                        expected = id,
                        answered,
                        "skipping response to another request"
                    );
                }
                WorkerFrame::Callout {
                    id: callout_id,
                    callout,
                } => {
                    debug!(
                        target: CONNECTION_TARGET,
                        sandbox = self.index,
                        callout = callout_id,
                        capability = %callout.capability,
                        method = %callout.method,
                        "serving callout"
                    );
                    let reply = CalloutReply::from(callouts.handle(callout));
                    self.channel.send(&HostFrame::CalloutReply {
                        id: callout_id,
                        reply,
                    })?;
                }
            }
        }
    }

    /// Stops the worker, waiting up to `grace` before forcing it down.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Stop`] when the worker cannot be reaped.
    pub fn shutdown(mut self, grace: Duration) -> Result<(), ChannelError> {
        self.channel.shutdown(grace)
    }
}

impl std::fmt::Debug for WorkerConnection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerConnection")
            .field("index", &self.index)
            .field("next_id", &self.next_id)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests;
