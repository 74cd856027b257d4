//! Wire value codec.
//!
//! Values cross the boundary as a [`ParceledPayload`]: a type name plus the
//! encoded body as opaque text. The trusted side forwards payloads without
//! decoding them, so it never materialises an object graph produced by
//! untrusted code. Only [`ParceledPayload::decode`] turns the text back into a
//! value, and only for types implementing [`WireValue`].
//!
//! Exceptions use [`ParceledThrowable`], which keeps the suppressed chain and
//! falls back to [`RemoteException::MarshalFailed`] when a body is unreadable.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::exception::RemoteException;
use crate::taint::TaintSet;

mod throwable;

pub use throwable::ParceledThrowable;

/// A type that may cross the sandbox boundary by value.
///
/// The type name is written next to every payload and is checked again on
/// decode, so a payload produced for one type never silently decodes as
/// another.
pub trait WireValue: Serialize + DeserializeOwned {
    /// Stable name recorded in payloads and call descriptors.
    const TYPE_NAME: &'static str;
}

macro_rules! wire_values {
    ($($ty:ty => $name:literal),* $(,)?) => {
        $(impl WireValue for $ty {
            const TYPE_NAME: &'static str = $name;
        })*

        /// Type names of the value types supported out of the box.
        pub const WIRE_TYPE_NAMES: &[&str] = &[$($name),*];
    };
}

wire_values! {
    bool => "boolean",
    i32 => "int",
    i64 => "long",
    f64 => "double",
    String => "string",
    Vec<u8> => "byte[]",
    Vec<i32> => "int[]",
    Vec<i64> => "long[]",
    Vec<f64> => "double[]",
    Vec<String> => "string[]",
    serde_json::Value => "json",
    TaintSet => "taint-set",
}

/// Errors raised while encoding or decoding payloads.
#[derive(Debug, Error)]
pub enum CodecError {
    /// The payload was produced for a different type.
    #[error("payload holds {found}, expected {expected}")]
    TypeMismatch {
        /// Type requested by the caller.
        expected: String,
        /// Type recorded in the payload.
        found: String,
    },

    /// The value could not be encoded.
    #[error("failed to encode {type_name}: {source}")]
    Encode {
        /// Type being encoded.
        type_name: String,
        /// Underlying serialiser error.
        #[source]
        source: serde_json::Error,
    },

    /// The payload body could not be decoded.
    #[error("failed to decode {type_name}: {source}")]
    Decode {
        /// Type recorded in the payload.
        type_name: String,
        /// Underlying deserialiser error.
        #[source]
        source: serde_json::Error,
    },
}

/// An encoded value with its type name.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParceledPayload {
    type_name: String,
    data: String,
}

impl ParceledPayload {
    /// Encodes a value.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Encode`] when the serialiser rejects the value,
    /// for example a map with non-string keys.
    pub fn encode<T: WireValue>(value: &T) -> Result<Self, CodecError> {
        let data = serde_json::to_string(value).map_err(|source| CodecError::Encode {
            type_name: T::TYPE_NAME.to_owned(),
            source,
        })?;
        Ok(Self {
            type_name: T::TYPE_NAME.to_owned(),
            data,
        })
    }

    /// Wraps an already structured value under an explicit type name.
    #[must_use]
    pub fn from_json(type_name: impl Into<String>, value: &serde_json::Value) -> Self {
        Self {
            type_name: type_name.into(),
            data: value.to_string(),
        }
    }

    /// Rebuilds a payload from raw parts without inspecting the body.
    #[must_use]
    pub fn from_raw(type_name: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            data: data.into(),
        }
    }

    /// Returns the recorded type name.
    #[must_use]
    pub const fn type_name(&self) -> &str {
        self.type_name.as_str()
    }

    /// Returns the opaque encoded body.
    #[must_use]
    pub const fn data(&self) -> &str {
        self.data.as_str()
    }

    /// Size of the encoded body in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.data.len()
    }

    /// True when the encoded body is empty.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Decodes the payload as `T`.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::TypeMismatch`] when the recorded type differs
    /// from `T::TYPE_NAME`, or [`CodecError::Decode`] when the body does not
    /// parse.
    pub fn decode<T: WireValue>(&self) -> Result<T, CodecError> {
        if self.type_name != T::TYPE_NAME {
            return Err(CodecError::TypeMismatch {
                expected: T::TYPE_NAME.to_owned(),
                found: self.type_name.clone(),
            });
        }
        serde_json::from_str(&self.data).map_err(|source| CodecError::Decode {
            type_name: self.type_name.clone(),
            source,
        })
    }

    /// Decodes the body into a structured value regardless of type name.
    ///
    /// # Errors
    ///
    /// Returns [`CodecError::Decode`] when the body does not parse.
    pub fn decode_json(&self) -> Result<serde_json::Value, CodecError> {
        serde_json::from_str(&self.data).map_err(|source| CodecError::Decode {
            type_name: self.type_name.clone(),
            source,
        })
    }
}
