//! Failures that cross the sandbox boundary as values.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::codec::ParceledThrowable;

/// Well-known exception type names raised by the runtime itself.
pub mod kinds {
    /// A capability handle was used after it was destroyed.
    pub const HANDLE_DESTROYED: &str = "warden.HandleDestroyed";
    /// Arguments did not match the resolved call.
    pub const ILLEGAL_ARGUMENT: &str = "warden.IllegalArgument";
    /// No registered call matched a descriptor.
    pub const NO_SUCH_METHOD: &str = "warden.NoSuchMethod";
    /// A package has no registered code in the worker.
    pub const NO_SUCH_PACKAGE: &str = "warden.NoSuchPackage";
    /// The policy engine rejected a sink request.
    pub const SECURITY: &str = "warden.Security";
    /// A callee broke the argument direction contract.
    pub const CONTRACT_VIOLATION: &str = "warden.ContractViolation";
    /// Wire data for a single request was malformed.
    pub const PROTOCOL: &str = "warden.Protocol";
    /// The worker holding a value went away.
    pub const DEAD_OBJECT: &str = "warden.DeadObject";
    /// A capability is not available to the caller.
    pub const UNKNOWN_CAPABILITY: &str = "warden.UnknownCapability";
    /// An operating system resource could not be read.
    pub const IO: &str = "warden.Io";
}

/// An exception raised on one side of the boundary and observed on the other.
///
/// Serialisation always goes through [`ParceledThrowable`], so a value that
/// cannot be decoded degrades to [`RemoteException::MarshalFailed`] instead of
/// failing the surrounding frame.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "ParceledThrowable", into = "ParceledThrowable")]
pub enum RemoteException {
    /// A decoded exception.
    Raised {
        /// Exception type name.
        type_name: String,
        /// Human-readable message.
        message: String,
        /// Suppressed exceptions in the order they were attached.
        suppressed: Vec<RemoteException>,
    },
    /// An exception whose body could not be decoded.
    MarshalFailed {
        /// Type name recorded by the sender.
        type_name: String,
        /// Raw encoded body, kept for diagnostics and re-encoding.
        raw: String,
        /// Suppressed exceptions in the order they were attached.
        suppressed: Vec<RemoteException>,
    },
}

impl RemoteException {
    /// Creates an exception with no suppressed entries.
    #[must_use]
    pub fn new(type_name: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Raised {
            type_name: type_name.into(),
            message: message.into(),
            suppressed: Vec::new(),
        }
    }

    /// Exception for reads through a destroyed handle.
    #[must_use]
    pub fn handle_destroyed() -> Self {
        Self::new(kinds::HANDLE_DESTROYED, "handle destroyed")
    }

    /// Exception for mismatched call arguments.
    #[must_use]
    pub fn illegal_argument(message: impl Into<String>) -> Self {
        Self::new(kinds::ILLEGAL_ARGUMENT, message)
    }

    /// Exception for descriptors with no registered target.
    #[must_use]
    pub fn no_such_method(descriptor: impl fmt::Display) -> Self {
        Self::new(
            kinds::NO_SUCH_METHOD,
            format!("no registered call matches {descriptor}"),
        )
    }

    /// Exception for policy rejections.
    #[must_use]
    pub fn security(message: impl Into<String>) -> Self {
        Self::new(kinds::SECURITY, message)
    }

    /// Exception for malformed request data.
    #[must_use]
    pub fn protocol(message: impl Into<String>) -> Self {
        Self::new(kinds::PROTOCOL, message)
    }

    /// Returns the exception type name.
    #[must_use]
    pub fn type_name(&self) -> &str {
        match self {
            Self::Raised { type_name, .. } | Self::MarshalFailed { type_name, .. } => type_name,
        }
    }

    /// Returns the message, synthesised for undecodable exceptions.
    #[must_use]
    pub fn message(&self) -> String {
        match self {
            Self::Raised { message, .. } => message.clone(),
            Self::MarshalFailed { type_name, .. } => format!("could not deserialize {type_name}"),
        }
    }

    /// Returns the suppressed exceptions.
    #[must_use]
    pub fn suppressed(&self) -> &[Self] {
        match self {
            Self::Raised { suppressed, .. } | Self::MarshalFailed { suppressed, .. } => suppressed,
        }
    }

    /// Appends a suppressed exception.
    pub fn add_suppressed(&mut self, exception: Self) {
        match self {
            Self::Raised { suppressed, .. } | Self::MarshalFailed { suppressed, .. } => {
                suppressed.push(exception);
            }
        }
    }

    /// Builder form of [`RemoteException::add_suppressed`].
    #[must_use]
    pub fn with_suppressed(mut self, exception: Self) -> Self {
        self.add_suppressed(exception);
        self
    }

    /// True when the type name matches `kind`.
    #[must_use]
    pub fn is_kind(&self, kind: &str) -> bool {
        self.type_name() == kind
    }

    /// True for exceptions that degraded during decoding.
    #[must_use]
    pub const fn is_marshal_failure(&self) -> bool {
        matches!(self, Self::MarshalFailed { .. })
    }
}

impl fmt::Display for RemoteException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Raised {
                type_name, message, ..
            } => write!(f, "{type_name}: {message}"),
            Self::MarshalFailed { type_name, .. } => write!(f, "could not deserialize {type_name}"),
        }
    }
}

impl std::error::Error for RemoteException {}
