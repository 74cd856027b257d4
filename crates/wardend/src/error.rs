use std::time::Duration;

use thiserror::Error;
use warden_core::{CodecError, HandleId, RemoteException, kinds};

use crate::channel::ChannelError;

/// Errors raised by the host while driving sandboxes.
///
/// Failures raised by sandboxed code do not appear here: they travel inside
/// a [`crate::HostResult`].
#[derive(Debug, Error)]
pub enum HostError {
    /// A worker process could not be started.
    #[error("sandbox {index} failed to launch: {source}")]
    Launch {
        /// Sandbox slot.
        index: usize,
        /// Underlying channel error.
        #[source]
        source: ChannelError,
    },

    /// A worker did not report ready in time.
    #[error("sandbox {index} was not ready within {}ms", timeout.as_millis())]
    NotReady {
        /// Sandbox slot.
        index: usize,
        /// Configured ready timeout.
        timeout: Duration,
    },

    /// The control channel broke mid-request.
    #[error("sandbox {index} control channel failed: {source}")]
    Channel {
        /// Sandbox slot.
        index: usize,
        /// Underlying channel error.
        #[source]
        source: ChannelError,
    },

    /// The worker refused a control request.
    #[error("sandbox {index} rejected {request}: {exception}")]
    Rejected {
        /// Sandbox slot.
        index: usize,
        /// Request name.
        request: &'static str,
        /// Worker-side failure.
        exception: RemoteException,
    },

    /// The worker answered with a response of the wrong kind.
    #[error("sandbox {index} sent an unexpected response to {request}")]
    UnexpectedResponse {
        /// Sandbox slot.
        index: usize,
        /// Request name.
        request: &'static str,
    },

    /// A sandbox index outside the pool.
    #[error("sandbox {index} does not exist in a pool of {pool_size}")]
    NoSuchSandbox {
        /// Requested index.
        index: usize,
        /// Pool size.
        pool_size: usize,
    },

    /// A handle outlived the worker that produced it.
    #[error("handle {handle} belongs to a sandbox that has since restarted")]
    StaleHandle {
        /// Remote handle id.
        handle: HandleId,
    },

    /// An argument could not be encoded.
    #[error("failed to encode an argument: {0}")]
    Encode(#[from] CodecError),

    /// An asynchronous call's worker thread went away without a result.
    #[error("the call was abandoned before it completed")]
    Abandoned,
}

impl HostError {
    /// Converts into an exception that can be handed to sandboxed code.
    #[must_use]
    pub fn to_remote(&self) -> RemoteException {
        match self {
            Self::Rejected { exception, .. } => exception.clone(),
            Self::StaleHandle { .. } => RemoteException::handle_destroyed(),
            Self::Encode(error) => RemoteException::illegal_argument(error.to_string()),
            Self::NoSuchSandbox { .. } => RemoteException::illegal_argument(self.to_string()),
            Self::Launch { .. }
            | Self::NotReady { .. }
            | Self::Channel { .. }
            | Self::UnexpectedResponse { .. }
            | Self::Abandoned => RemoteException::new(kinds::DEAD_OBJECT, self.to_string()),
        }
    }
}
