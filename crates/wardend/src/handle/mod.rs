//! Host-side references to values living in a sandbox.
//!
//! A [`HostHandle`] names an output slot of a completed call: the producing
//! sandbox and its generation, the worker's handle id, the object identity,
//! both type names, and the taint the sandbox carried when the call
//! finished. Handles are plain data; passing one to another call either
//! routes that call to the same sandbox or marshals the value across.

use std::fmt;

use warden_core::{
    CallParam, CodecError, HandleId, ObjectId, OutputSlot, ParamFlags, ParceledPayload, TaintSet,
    WireValue,
};

/// A value left inside a sandbox by a completed call.
#[derive(Debug, Clone, PartialEq)]
pub struct HostHandle {
    sandbox: usize,
    generation: u64,
    handle: HandleId,
    object: ObjectId,
    declared_type: String,
    actual_type: String,
    taint: TaintSet,
}

impl HostHandle {
    pub(crate) fn from_slot(
        sandbox: usize,
        generation: u64,
        slot: OutputSlot,
        taint: TaintSet,
    ) -> Self {
        Self {
            sandbox,
            generation,
            handle: slot.handle,
            object: slot.object,
            declared_type: slot.declared_type,
            actual_type: slot.actual_type,
            taint,
        }
    }

    /// Slot of the sandbox holding the value.
    #[must_use]
    pub const fn sandbox(&self) -> usize {
        self.sandbox
    }

    /// Worker restart count at the time the handle was produced.
    #[must_use]
    pub const fn generation(&self) -> u64 {
        self.generation
    }

    /// Worker-side handle id.
    #[must_use]
    pub const fn id(&self) -> HandleId {
        self.handle
    }

    /// Identity of the object behind the handle.
    #[must_use]
    pub const fn object(&self) -> ObjectId {
        self.object
    }

    /// Type declared by the producing call.
    #[must_use]
    pub fn declared_type(&self) -> &str {
        &self.declared_type
    }

    /// Runtime type of the produced object.
    #[must_use]
    pub fn actual_type(&self) -> &str {
        &self.actual_type
    }

    /// Taint of the sandbox when the value was produced.
    #[must_use]
    pub const fn taint(&self) -> &TaintSet {
        &self.taint
    }
}

impl fmt::Display for HostHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}@sandbox{}#{}",
            self.handle, self.sandbox, self.generation
        )
    }
}

/// What an argument carries.
#[derive(Debug, Clone, PartialEq)]
pub enum ArgValue {
    /// No value.
    Null,
    /// A value encoded on the host.
    Data(CallParam),
    /// A value already inside a sandbox.
    Handle(HostHandle),
}

/// One argument of a [`crate::HostCall`].
#[derive(Debug, Clone, PartialEq)]
pub struct HostArg {
    value: ArgValue,
    flags: ParamFlags,
}

impl HostArg {
    /// A null argument.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            value: ArgValue::Null,
            flags: ParamFlags::empty(),
        }
    }

    /// Encodes `value` on the host.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when serialisation fails.
    pub fn value<T: WireValue>(value: &T) -> Result<Self, CodecError> {
        Ok(Self {
            value: ArgValue::Data(CallParam::encode(value)?),
            flags: ParamFlags::empty(),
        })
    }

    /// Passes an already encoded value.
    #[must_use]
    pub const fn payload(payload: ParceledPayload) -> Self {
        Self {
            value: ArgValue::Data(CallParam::data(payload)),
            flags: ParamFlags::empty(),
        }
    }

    /// Passes a handle produced by an earlier call.
    #[must_use]
    pub const fn handle(handle: HostHandle) -> Self {
        Self {
            value: ArgValue::Handle(handle),
            flags: ParamFlags::empty(),
        }
    }

    /// Destroys the handle once the worker has read it.
    #[must_use]
    pub fn released(mut self) -> Self {
        self.flags |= ParamFlags::HANDLE_RELEASE;
        self
    }

    /// Skips the handle when it would have to cross sandboxes.
    #[must_use]
    pub fn sync_only(mut self) -> Self {
        self.flags |= ParamFlags::HANDLE_SYNC_ONLY;
        self
    }

    /// Lets the callee replace the object behind the handle.
    #[must_use]
    pub fn by_ref(mut self) -> Self {
        self.flags |= ParamFlags::BY_REF;
        self
    }

    /// Requests the argument back as an output.
    #[must_use]
    pub fn returned(mut self) -> Self {
        self.flags |= ParamFlags::RETURN;
        self
    }

    /// Argument payload.
    #[must_use]
    pub const fn arg_value(&self) -> &ArgValue {
        &self.value
    }

    /// Argument flags.
    #[must_use]
    pub const fn flags(&self) -> ParamFlags {
        self.flags
    }

    /// The handle carried, if any.
    #[must_use]
    pub const fn as_handle(&self) -> Option<&HostHandle> {
        match &self.value {
            ArgValue::Handle(handle) => Some(handle),
            ArgValue::Null | ArgValue::Data(_) => None,
        }
    }

    pub(crate) fn into_parts(self) -> (ArgValue, ParamFlags) {
        (self.value, self.flags)
    }
}

#[cfg(test)]
mod tests;
