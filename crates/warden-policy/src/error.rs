//! Errors raised while loading policy and evaluating sink requests.

use std::path::PathBuf;
use std::sync::Arc;

use thiserror::Error;
use warden_core::{ComponentName, NameError, RemoteException};

/// A manifest could not be loaded.
///
/// Any of these aborts the whole manifest.
#[derive(Debug, Clone, Error)]
pub enum PolicyParseError {
    /// The document is not valid YAML for a manifest.
    #[error("invalid manifest: {message}")]
    Yaml {
        /// Parser message.
        message: String,
    },

    /// A package, tag or channel name is not a valid component name part.
    #[error(transparent)]
    InvalidName(#[from] NameError),

    /// Two sources share a tag.
    #[error("package '{package}' declares source '{tag}' more than once")]
    DuplicateSource {
        /// Package being loaded.
        package: String,
        /// Repeated tag.
        tag: String,
    },

    /// Two channels share a name.
    #[error("package '{package}' declares channel '{name}' more than once")]
    DuplicateChannel {
        /// Package being loaded.
        package: String,
        /// Repeated channel name.
        name: String,
    },

    /// A source or channel names a different package.
    #[error("package '{package}' cannot declare '{entry}'")]
    ForeignEntry {
        /// Package being loaded.
        package: String,
        /// Offending entry.
        entry: String,
    },

    /// A policy entry is not a single-key map.
    #[error("source '{source_name}' has a rule that is not a single `kind: body` entry")]
    MalformedRule {
        /// Source being loaded.
        source_name: String,
    },

    /// A rule kind is not one of allow, deny, log or drop.
    #[error("source '{source_name}' uses unknown rule '{rule}'")]
    UnknownRule {
        /// Source being loaded.
        source_name: String,
        /// Offending rule kind.
        rule: String,
    },

    /// A filter names a sink that is not registered.
    #[error("source '{source_name}' refers to unknown sink '{sink}'")]
    UnknownSink {
        /// Source being loaded.
        source_name: String,
        /// Offending sink name.
        sink: String,
    },

    /// A filter value was given without a sink.
    #[error("source '{source_name}' has a filter value without a sink")]
    MissingSink {
        /// Source being loaded.
        source_name: String,
    },

    /// A filter value was given for a sink that does not take one.
    #[error("source '{source_name}': sink '{sink}' does not accept a filter value")]
    UnexpectedValue {
        /// Source being loaded.
        source_name: String,
        /// Sink that rejects values.
        sink: String,
    },

    /// A message was given to a rule that never reports one.
    #[error("source '{source_name}': '{rule}' rules take no message")]
    UnexpectedMessage {
        /// Source being loaded.
        source_name: String,
        /// Rule kind.
        rule: String,
    },

    /// Two manifests claim the same package.
    #[error("package '{package}' is already registered")]
    DuplicatePackage {
        /// Package name.
        package: String,
    },

    /// A manifest file could not be read.
    #[error("failed to read manifest '{}': {source}", path.display())]
    Io {
        /// File or directory being read.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<std::io::Error>,
    },

    /// A manifest file failed to load.
    #[error("manifest '{}': {source}", path.display())]
    File {
        /// File being loaded.
        path: PathBuf,
        /// What went wrong.
        #[source]
        source: Box<PolicyParseError>,
    },
}

/// A sink request rejected with one or more messages.
///
/// The primary message comes from the first source that reported; messages
/// from other sources are kept as suppressed entries in report order.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct SecurityError {
    origin: ComponentName,
    message: String,
    suppressed: Vec<(ComponentName, String)>,
}

impl SecurityError {
    /// Builds an error from ordered `(source, message)` pairs.
    ///
    /// Returns `None` when there are no messages.
    #[must_use]
    pub fn from_messages(messages: &[(ComponentName, String)]) -> Option<Self> {
        let ((origin, message), rest) = messages.split_first()?;
        Some(Self {
            origin: origin.clone(),
            message: message.clone(),
            suppressed: rest.to_vec(),
        })
    }

    /// Source that produced the primary message.
    #[must_use]
    pub const fn origin(&self) -> &ComponentName {
        &self.origin
    }

    /// The primary message.
    #[must_use]
    pub const fn message(&self) -> &str {
        self.message.as_str()
    }

    /// Messages from the remaining sources.
    #[must_use]
    pub fn suppressed(&self) -> &[(ComponentName, String)] {
        &self.suppressed
    }

    /// Converts into an exception that can cross the sandbox boundary.
    #[must_use]
    pub fn to_remote(&self) -> RemoteException {
        self.suppressed.iter().fold(
            RemoteException::security(self.message.clone()),
            |exception, (_, message)| {
                exception.with_suppressed(RemoteException::security(message.clone()))
            },
        )
    }
}

impl From<SecurityError> for RemoteException {
    fn from(value: SecurityError) -> Self {
        value.to_remote()
    }
}
