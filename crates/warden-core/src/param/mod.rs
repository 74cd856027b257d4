//! Call parameters as they travel between host and worker.
//!
//! Every parameter carries a 32-bit header: the low byte is a type tag
//! ([`TYPE_NULL`], [`TYPE_DATA`] or [`TYPE_HANDLE`]) and the upper bits hold
//! [`ParamFlags`]. Exactly one of the data or handle fields is populated,
//! matching the tag. Flags on a null parameter are dropped.

use std::fmt;

use bitflags::bitflags;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codec::{CodecError, ParceledPayload, WireValue};

/// Type tag for an absent value.
pub const TYPE_NULL: u32 = 0;
/// Type tag for an inline encoded value.
pub const TYPE_DATA: u32 = 1;
/// Type tag for a reference to a sandbox-resident object.
pub const TYPE_HANDLE: u32 = 2;

const MASK_TYPE: u32 = 0xFF;

bitflags! {
    /// Per-parameter flags carried in the header.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct ParamFlags: u32 {
        /// The parameter position produces an output.
        const RETURN = 0x0100;
        /// The callee may replace the object.
        const BY_REF = 0x0200;
        /// Reading the handle consumes the sandbox-side reference.
        const HANDLE_RELEASE = 0x0001_0000;
        /// The handle is valid only for this call and must not escape.
        const HANDLE_SYNC_ONLY = 0x0002_0000;
    }
}

/// Wire data that could not be interpreted as a call parameter.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// The header carried an unknown type tag.
    #[error("unknown call parameter type {tag:#04x}")]
    UnknownParamType {
        /// Type tag found in the header.
        tag: u32,
    },

    /// The populated fields did not match the type tag.
    #[error("inconsistent call parameter with type {tag:#04x}: {reason}")]
    Inconsistent {
        /// Type tag found in the header.
        tag: u32,
        /// What did not match.
        reason: &'static str,
    },
}

/// Identifier of a handle in a worker's object table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct HandleId(u64);

impl HandleId {
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

impl fmt::Display for HandleId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "h{}", self.0)
    }
}

/// Identity of an object living inside a worker.
///
/// Two handles with equal object ids refer to the same object, which is how
/// callers observe whether a by-reference argument was replaced.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ObjectId(u64);

impl ObjectId {
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

impl fmt::Display for ObjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "o{}", self.0)
    }
}

/// Value carried by a parameter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ParamValue {
    /// No value.
    Null,
    /// Inline encoded value.
    Data(ParceledPayload),
    /// Reference to a sandbox-resident object.
    Handle(HandleId),
}

/// One argument of a call.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawCallParam", into = "RawCallParam")]
pub struct CallParam {
    value: ParamValue,
    flags: ParamFlags,
}

impl CallParam {
    /// An absent argument.
    #[must_use]
    pub const fn null() -> Self {
        Self {
            value: ParamValue::Null,
            flags: ParamFlags::empty(),
        }
    }

    /// An inline encoded argument.
    #[must_use]
    pub const fn data(payload: ParceledPayload) -> Self {
        Self {
            value: ParamValue::Data(payload),
            flags: ParamFlags::empty(),
        }
    }

    /// Encodes `value` as an inline argument.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError`] when encoding fails.
    pub fn encode<T: WireValue>(value: &T) -> Result<Self, CodecError> {
        ParceledPayload::encode(value).map(Self::data)
    }

    /// A reference to an object in the worker's handle table.
    #[must_use]
    pub const fn handle(id: HandleId) -> Self {
        Self {
            value: ParamValue::Handle(id),
            flags: ParamFlags::empty(),
        }
    }

    /// Adds flags; ignored for null parameters.
    #[must_use]
    pub fn with_flags(mut self, flags: ParamFlags) -> Self {
        if !matches!(self.value, ParamValue::Null) {
            self.flags |= flags;
        }
        self
    }

    /// Returns the carried value.
    #[must_use]
    pub const fn value(&self) -> &ParamValue {
        &self.value
    }

    /// Consumes the parameter, returning the carried value.
    #[must_use]
    pub fn into_value(self) -> ParamValue {
        self.value
    }

    /// Returns the flags.
    #[must_use]
    pub const fn flags(&self) -> ParamFlags {
        self.flags
    }

    /// True for absent arguments.
    #[must_use]
    pub const fn is_null(&self) -> bool {
        matches!(self.value, ParamValue::Null)
    }

    /// Returns the type tag written in the header.
    #[must_use]
    pub const fn type_tag(&self) -> u32 {
        match self.value {
            ParamValue::Null => TYPE_NULL,
            ParamValue::Data(_) => TYPE_DATA,
            ParamValue::Handle(_) => TYPE_HANDLE,
        }
    }

    /// Returns the full header word.
    #[must_use]
    pub const fn header(&self) -> u32 {
        self.type_tag() | self.flags.bits()
    }
}

#[derive(Serialize, Deserialize)]
struct RawCallParam {
    header: u32,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    data: Option<ParceledPayload>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    handle: Option<HandleId>,
}

impl TryFrom<RawCallParam> for CallParam {
    type Error = ProtocolError;

    fn try_from(raw: RawCallParam) -> Result<Self, Self::Error> {
        let tag = raw.header & MASK_TYPE;
        let flags = ParamFlags::from_bits_retain(raw.header & !MASK_TYPE);
        let value = match (tag, raw.data, raw.handle) {
            (TYPE_NULL, None, None) => return Ok(Self::null()),
            (TYPE_DATA, Some(payload), None) => ParamValue::Data(payload),
            (TYPE_HANDLE, None, Some(id)) => ParamValue::Handle(id),
            (TYPE_NULL | TYPE_DATA | TYPE_HANDLE, _, _) => {
                return Err(ProtocolError::Inconsistent {
                    tag,
                    reason: "populated fields do not match the type tag",
                });
            }
            _ => return Err(ProtocolError::UnknownParamType { tag }),
        };
        Ok(Self { value, flags })
    }
}

impl From<CallParam> for RawCallParam {
    fn from(param: CallParam) -> Self {
        let header = param.header();
        match param.value {
            ParamValue::Null => Self {
                header,
                data: None,
                handle: None,
            },
            ParamValue::Data(payload) => Self {
                header,
                data: Some(payload),
                handle: None,
            },
            ParamValue::Handle(id) => Self {
                header,
                data: None,
                handle: Some(id),
            },
        }
    }
}

/// How an argument flows between caller and callee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Direction {
    /// Copied in; nothing flows back.
    #[serde(rename = "in")]
    In,
    /// Produced by the callee into an output slot.
    #[serde(rename = "out")]
    Out,
    /// Mutated in place; the same object must come back.
    #[serde(rename = "inout")]
    InOut,
    /// The callee may hand back a different object.
    #[serde(rename = "ref-inout")]
    RefInOut,
}

impl Direction {
    /// Parameter flags implied by the direction.
    #[must_use]
    pub const fn flags(self) -> ParamFlags {
        match self {
            Self::In => ParamFlags::empty(),
            Self::Out | Self::InOut => ParamFlags::RETURN,
            Self::RefInOut => ParamFlags::RETURN.union(ParamFlags::BY_REF),
        }
    }

    /// True when the caller supplies a value.
    #[must_use]
    pub const fn carries_input(self) -> bool {
        !matches!(self, Self::Out)
    }

    /// True when the position produces an output slot.
    #[must_use]
    pub const fn produces_output(self) -> bool {
        !matches!(self, Self::In)
    }
}

impl fmt::Display for Direction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::In => "in",
            Self::Out => "out",
            Self::InOut => "inout",
            Self::RefInOut => "ref-inout",
        })
    }
}
