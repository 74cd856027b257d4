//! Exception chains on the wire.

use serde::{Deserialize, Serialize};

use crate::exception::RemoteException;

#[derive(Deserialize)]
#[serde(deny_unknown_fields)]
struct ExceptionBody {
    message: String,
}

/// Encoded form of a [`RemoteException`] and its suppressed chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParceledThrowable {
    type_name: String,
    data: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    suppressed: Vec<ParceledThrowable>,
}

impl ParceledThrowable {
    /// Encodes an exception and, recursively, its suppressed entries.
    ///
    /// Exceptions that previously failed to decode are written back with
    /// their original type name and body.
    #[must_use]
    pub fn encode(exception: &RemoteException) -> Self {
        let (type_name, data) = match exception {
            RemoteException::Raised {
                type_name, message, ..
            } => (
                type_name.clone(),
                serde_json::json!({ "message": message }).to_string(),
            ),
            RemoteException::MarshalFailed { type_name, raw, .. } => {
                (type_name.clone(), raw.clone())
            }
        };
        Self {
            type_name,
            data,
            suppressed: exception.suppressed().iter().map(Self::encode).collect(),
        }
    }

    /// Builds an encoded exception from raw parts.
    #[must_use]
    pub fn from_raw(
        type_name: impl Into<String>,
        data: impl Into<String>,
        suppressed: Vec<Self>,
    ) -> Self {
        Self {
            type_name: type_name.into(),
            data: data.into(),
            suppressed,
        }
    }

    /// Returns the recorded type name.
    #[must_use]
    pub const fn type_name(&self) -> &str {
        self.type_name.as_str()
    }

    /// Decodes the exception, never failing.
    ///
    /// A body that does not parse becomes [`RemoteException::MarshalFailed`]
    /// carrying the original type name and raw text.
    #[must_use]
    pub fn decode(&self) -> RemoteException {
        let suppressed = self.suppressed.iter().map(Self::decode).collect();
        match serde_json::from_str::<ExceptionBody>(&self.data) {
            Ok(body) => RemoteException::Raised {
                type_name: self.type_name.clone(),
                message: body.message,
                suppressed,
            },
            Err(_) => RemoteException::MarshalFailed {
                type_name: self.type_name.clone(),
                raw: self.data.clone(),
                suppressed,
            },
        }
    }
}

impl From<RemoteException> for ParceledThrowable {
    fn from(value: RemoteException) -> Self {
        Self::encode(&value)
    }
}

impl From<ParceledThrowable> for RemoteException {
    fn from(value: ParceledThrowable) -> Self {
        value.decode()
    }
}
