//! Control channel frames exchanged between host and worker.
//!
//! The channel is JSONL over the worker's stdio. The host writes
//! [`HostFrame`] lines to the worker's stdin; the worker writes
//! [`WorkerFrame`] lines to stdout. Every request carries an id echoed by its
//! response. While serving a call the worker may send [`Callout`] frames to
//! reach the trusted API; the host answers each with a [`CalloutReply`]
//! before the call's response arrives. Worker stderr carries logs only.
//!
//! ```
//! use warden_core::protocol::{ControlRequest, HostFrame, decode_frame, encode_frame};
//!
//! let frame = HostFrame::request(7, ControlRequest::Pid);
//! let line = encode_frame(&frame).expect("encode");
//! assert_eq!(line, "{\"frame\":\"request\",\"id\":7,\"request\":{\"op\":\"pid\"}}\n");
//! let back: HostFrame = decode_frame(&line).expect("decode");
//! assert_eq!(back, frame);
//! ```

use std::fmt;
use std::io::{self, BufRead, Write};
use std::sync::Arc;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::ParceledPayload;
use crate::descriptor::CallDescriptor;
use crate::exception::RemoteException;
use crate::flags::CallFlags;
use crate::param::{CallParam, Direction, HandleId};
use crate::result::CallResult;
use crate::taint::TaintSet;

/// Version of the frame layout, checked at bind time.
pub const PROTOCOL_VERSION: u32 = 1;

/// Errors raised while reading or writing frames.
#[derive(Debug, Error)]
pub enum FrameError {
    /// The underlying stream failed.
    #[error("control channel I/O failed: {source}")]
    Io {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A frame could not be encoded or decoded.
    #[error("malformed control frame: {source}")]
    Malformed {
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },
}

impl From<io::Error> for FrameError {
    fn from(source: io::Error) -> Self {
        Self::Io {
            source: Arc::new(source),
        }
    }
}

/// Serialises a frame as one newline-terminated line.
///
/// # Errors
///
/// Returns [`FrameError::Malformed`] when serialisation fails.
pub fn encode_frame<T: Serialize>(frame: &T) -> Result<String, FrameError> {
    let mut line =
        serde_json::to_string(frame).map_err(|source| FrameError::Malformed { source })?;
    line.push('\n');
    Ok(line)
}

/// Parses one line into a frame.
///
/// # Errors
///
/// Returns [`FrameError::Malformed`] when the line is not a valid frame.
pub fn decode_frame<T: DeserializeOwned>(line: &str) -> Result<T, FrameError> {
    serde_json::from_str(line.trim_end()).map_err(|source| FrameError::Malformed { source })
}

/// Writes a frame and flushes the stream.
///
/// # Errors
///
/// Returns [`FrameError`] when encoding or writing fails.
pub fn write_frame<W: Write, T: Serialize>(writer: &mut W, frame: &T) -> Result<(), FrameError> {
    let line = encode_frame(frame)?;
    writer.write_all(line.as_bytes())?;
    writer.flush()?;
    Ok(())
}

/// Reads the next non-blank line, or `None` at end of stream.
///
/// # Errors
///
/// Returns [`FrameError::Io`] when reading fails.
pub fn read_line<R: BufRead>(reader: &mut R) -> Result<Option<String>, FrameError> {
    loop {
        let mut line = String::new();
        if reader.read_line(&mut line)? == 0 {
            return Ok(None);
        }
        if !line.trim().is_empty() {
            return Ok(Some(line));
        }
    }
}

/// Identifier of a resolved call inside one worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ResolvedId(u64);

impl ResolvedId {
    /// Wraps a raw identifier.
    #[must_use]
    pub const fn new(raw: u64) -> Self {
        Self(raw)
    }

    /// Returns the raw identifier.
    #[must_use]
    pub const fn get(self) -> u64 {
        self.0
    }
}

impl fmt::Display for ResolvedId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "r{}", self.0)
    }
}

/// Frames written by the host.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum HostFrame {
    /// A control request.
    Request {
        /// Correlation id echoed by the response.
        id: u64,
        /// The request.
        request: ControlRequest,
    },
    /// The answer to a worker callout.
    CalloutReply {
        /// Id of the callout being answered.
        id: u64,
        /// The answer.
        reply: CalloutReply,
    },
}

impl HostFrame {
    /// Wraps a request.
    #[must_use]
    pub const fn request(id: u64, request: ControlRequest) -> Self {
        Self::Request { id, request }
    }
}

/// Frames written by the worker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "frame", rename_all = "snake_case")]
pub enum WorkerFrame {
    /// The response to a request.
    Response {
        /// Id of the request being answered.
        id: u64,
        /// The response.
        response: ControlResponse,
    },
    /// A request for a trusted capability, made while serving a call.
    Callout {
        /// Correlation id echoed by the reply.
        id: u64,
        /// The capability invocation.
        callout: Callout,
    },
}

/// Operations on the control channel.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum ControlRequest {
    /// Binds the worker to a host and starts preloading.
    Bind {
        /// Capabilities and identity handed to the worker.
        extras: BindExtras,
    },
    /// Reports the lifecycle state.
    Status,
    /// Resolves a descriptor to a callable binding.
    Resolve {
        /// Call target.
        descriptor: CallDescriptor,
        /// Accept a unique method name when parameter types differ.
        #[serde(default)]
        best_match: bool,
        /// Include result and parameter details in the response.
        #[serde(default)]
        want_details: bool,
    },
    /// Invokes a resolved call.
    Call {
        /// Binding returned by a previous resolution.
        resolved: ResolvedId,
        /// Dispatch flags.
        flags: CallFlags,
        /// Arguments in declaration order, receiver first.
        params: Vec<CallParam>,
        /// Taint of the calling context.
        #[serde(default)]
        taint: TaintSet,
    },
    /// Encodes the value behind a handle.
    MarshalOut {
        /// Handle to read.
        handle: HandleId,
        /// Destroy the handle after reading.
        #[serde(default)]
        release: bool,
    },
    /// Destroys a handle.
    Destroy {
        /// Handle to destroy.
        handle: HandleId,
    },
    /// Returns the worker's process id.
    Pid,
    /// Returns the worker's user id.
    Uid,
    /// Reports process memory usage.
    DumpMemoryInfo,
    /// Sweeps destroyed handles and unreferenced resolutions.
    ForceGc,
    /// Stops serving requests.
    Kill,
}

impl ControlRequest {
    /// Short operation name for logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::Bind { .. } => "bind",
            Self::Status => "status",
            Self::Resolve { .. } => "resolve",
            Self::Call { .. } => "call",
            Self::MarshalOut { .. } => "marshal_out",
            Self::Destroy { .. } => "destroy",
            Self::Pid => "pid",
            Self::Uid => "uid",
            Self::DumpMemoryInfo => "dump_memory_info",
            Self::ForceGc => "force_gc",
            Self::Kill => "kill",
        }
    }
}

/// Answers to control requests.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ControlResponse {
    /// The worker accepted the binding.
    Bound,
    /// Current lifecycle state.
    Status {
        /// Lifecycle state.
        state: WorkerState,
        /// Packages with a materialised execution context.
        preloaded: Vec<String>,
    },
    /// A descriptor resolved.
    Resolved {
        /// Binding for later calls.
        resolved: ResolvedId,
        /// Optional result and parameter details.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        details: Option<CallDetails>,
    },
    /// A descriptor did not resolve.
    ResolveFailed {
        /// Why resolution failed.
        exception: RemoteException,
    },
    /// A call finished, successfully or not.
    CallCompleted {
        /// The call outcome.
        result: CallResult,
    },
    /// The value behind a handle, or `None` for a null handle.
    Marshaled {
        /// Encoded value.
        payload: Option<ParceledPayload>,
    },
    /// The handle is gone.
    Destroyed,
    /// Worker process id.
    Pid {
        /// Process id.
        pid: u32,
    },
    /// Worker user id.
    Uid {
        /// User id.
        uid: u32,
    },
    /// Memory report.
    MemoryInfo {
        /// Figures read from the process status.
        info: MemoryInfo,
    },
    /// Result of a sweep.
    Collected {
        /// What was swept.
        report: GcReport,
    },
    /// The worker stopped serving requests.
    Killed,
    /// The request failed without breaking the channel.
    Failed {
        /// Why the request failed.
        exception: RemoteException,
    },
}

/// Capabilities and identity handed to a worker at bind time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BindExtras {
    /// Index of the sandbox slot in the host pool.
    pub sandbox_id: usize,
    /// Names of trusted API capabilities the worker may call out to.
    pub trusted_api: Vec<String>,
    /// Identity of the host service.
    pub root_service: RootService,
    /// Packages whose execution contexts are warmed in the background.
    #[serde(default)]
    pub preload_packages: Vec<String>,
}

/// Identity of the host service that owns the worker.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RootService {
    /// Host process id.
    pub host_pid: u32,
    /// Frame layout version the host speaks.
    pub protocol_version: u32,
}

/// Worker lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerState {
    /// Started, no host yet.
    Unbound,
    /// Host identity accepted.
    Bound,
    /// Warming execution contexts.
    Preloading,
    /// Warm and serving.
    Ready,
    /// Stopped.
    Terminated,
}

impl fmt::Display for WorkerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Unbound => "unbound",
            Self::Bound => "bound",
            Self::Preloading => "preloading",
            Self::Ready => "ready",
            Self::Terminated => "terminated",
        })
    }
}

/// Result and parameter details of a resolved call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallDetails {
    /// Declared result type, absent for calls with no return value.
    pub result_type: Option<String>,
    /// Declared parameters, receiver first.
    pub params: Vec<ParamInfo>,
}

/// One declared parameter of a resolved call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParamInfo {
    /// Declared type.
    pub type_name: String,
    /// How the argument flows.
    pub direction: Direction,
}

/// Memory figures from the worker's process status, in kilobytes.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MemoryInfo {
    /// Resident set size.
    pub vm_rss_kb: u64,
    /// Peak resident set size.
    pub vm_hwm_kb: u64,
    /// Virtual memory size.
    pub vm_size_kb: u64,
    /// Data segment size.
    pub vm_data_kb: u64,
    /// Thread count.
    pub threads: u64,
}

/// What a forced sweep released.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GcReport {
    /// Destroyed handles removed from the table.
    pub handles_swept: usize,
    /// Resolutions dropped because nothing referenced them.
    pub resolutions_dropped: usize,
}

/// A trusted capability invocation made by sandboxed code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Callout {
    /// Capability name, such as `toast`.
    pub capability: String,
    /// Method on the capability.
    pub method: String,
    /// Method arguments.
    #[serde(default)]
    pub args: serde_json::Value,
}

/// The host's answer to a [`Callout`].
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum CalloutReply {
    /// The capability returned a value.
    Returned {
        /// Returned value.
        #[serde(default)]
        value: serde_json::Value,
    },
    /// The capability failed.
    Raised {
        /// Why it failed.
        exception: RemoteException,
    },
}

impl CalloutReply {
    /// Converts into a standard result.
    ///
    /// # Errors
    ///
    /// Returns the capability's exception when it failed.
    pub fn into_result(self) -> Result<serde_json::Value, RemoteException> {
        match self {
            Self::Returned { value } => Ok(value),
            Self::Raised { exception } => Err(exception),
        }
    }
}

impl From<Result<serde_json::Value, RemoteException>> for CalloutReply {
    fn from(value: Result<serde_json::Value, RemoteException>) -> Self {
        match value {
            Ok(returned) => Self::Returned { value: returned },
            Err(exception) => Self::Raised { exception },
        }
    }
}
