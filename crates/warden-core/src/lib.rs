//! Shared value types for the warden sandbox runtime.
//!
//! `warden-core` holds everything the trusted host and the sandboxed worker
//! must agree on byte for byte:
//!
//! - [`ComponentName`]: two-part `package/name` identifiers used for taint
//!   labels, call targets, and event channels.
//! - [`TaintSet`]: immutable provenance labels with additive merge.
//! - [`ParceledPayload`] and [`ParceledThrowable`]: the wire value codec. Values
//!   travel as opaque encoded text that the host never decodes unless asked to.
//! - [`CallDescriptor`], [`CallParam`], [`CallFlags`] and [`CallResult`]: the
//!   call-marshaling protocol.
//! - [`protocol`]: the JSONL frames exchanged over the worker's stdio.
//!
//! ```
//! use warden_core::{ComponentName, TaintSet};
//!
//! let label: ComponentName = "com.example.camera/frames".parse().expect("valid name");
//! let taint = TaintSet::singleton(label.clone());
//! assert!(taint.is_tainted_with(&label));
//! ```

mod codec;
mod component;
mod descriptor;
mod exception;
mod flags;
mod param;
pub mod protocol;
mod result;
mod taint;

pub use codec::{CodecError, ParceledPayload, ParceledThrowable, WIRE_TYPE_NAMES, WireValue};
pub use component::{ComponentName, NameError};
pub use descriptor::{CallDescriptor, CallKind, DescriptorBuilder, DescriptorError, is_value_type};
pub use exception::{RemoteException, kinds};
pub use flags::{CallFlags, NUM_SANDBOXES, SANDBOX_NUM_MASK};
pub use param::{
    CallParam, Direction, HandleId, ObjectId, ParamFlags, ParamValue, ProtocolError, TYPE_DATA,
    TYPE_HANDLE, TYPE_NULL,
};
pub use result::{CallResult, OutputSlot, RETURN_VALUE};
pub use taint::{NOT_TAINTED, TaintSet, TaintSetBuilder, UNKNOWN_TAINT};
