//! Sinks and sink requests.
//!
//! A sink is a named, policy-checked operation. The set of known sinks is
//! fixed when the host starts: manifests naming any other sink fail to load.

use std::collections::BTreeMap;
use std::fmt;

use warden_core::ComponentName;

/// Sinks registered by default.
pub mod names {
    /// On-screen notifications.
    pub const TOAST: &str = "TOAST";
    /// Push notifications.
    pub const PUSH: &str = "PUSH";
    /// Outbound network requests.
    pub const NETWORK: &str = "NETWORK";
    /// Smart switch control.
    pub const SMARTSWITCH: &str = "SMARTSWITCH";
    /// Smart lock control.
    pub const SMARTLOCK: &str = "SMARTLOCK";
}

/// What kind of request a sink receives, which decides whether filters may
/// carry a literal match value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SinkKind {
    /// Requests carry only the sink name.
    Basic,
    /// Requests carry a destination URL that filters may match verbatim.
    Network,
}

impl SinkKind {
    /// True when filters for this sink may carry a match value.
    #[must_use]
    pub const fn accepts_filter_value(self) -> bool {
        matches!(self, Self::Network)
    }
}

/// Immutable table of known sinks.
///
/// # Example
///
/// ```
/// use warden_policy::{SinkKind, SinkRegistry};
///
/// let sinks = SinkRegistry::with_defaults();
/// assert_eq!(sinks.kind("NETWORK"), Some(SinkKind::Network));
/// assert_eq!(sinks.kind("FAX"), None);
/// ```
#[derive(Debug, Clone, Default)]
pub struct SinkRegistry {
    sinks: BTreeMap<String, SinkKind>,
}

impl SinkRegistry {
    /// Returns a registry with the built-in sinks.
    #[must_use]
    pub fn with_defaults() -> Self {
        Self::builder()
            .register(names::TOAST, SinkKind::Basic)
            .register(names::PUSH, SinkKind::Basic)
            .register(names::NETWORK, SinkKind::Network)
            .register(names::SMARTSWITCH, SinkKind::Basic)
            .register(names::SMARTLOCK, SinkKind::Basic)
            .build()
    }

    /// Starts an empty registry.
    #[must_use]
    pub fn builder() -> SinkRegistryBuilder {
        SinkRegistryBuilder::default()
    }

    /// Returns the kind of a registered sink.
    #[must_use]
    pub fn kind(&self, name: &str) -> Option<SinkKind> {
        self.sinks.get(name).copied()
    }

    /// Iterates over registered sink names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.sinks.keys().map(String::as_str)
    }
}

/// Startup-time registration of sinks.
#[derive(Debug, Default)]
pub struct SinkRegistryBuilder {
    sinks: BTreeMap<String, SinkKind>,
}

impl SinkRegistryBuilder {
    /// Registers a sink; the first registration of a name wins.
    #[must_use]
    pub fn register(mut self, name: impl Into<String>, kind: SinkKind) -> Self {
        self.sinks.entry(name.into()).or_insert(kind);
        self
    }

    /// Freezes the table.
    #[must_use]
    pub fn build(self) -> SinkRegistry {
        SinkRegistry { sinks: self.sinks }
    }
}

/// One attempt to push data into a sink.
///
/// Rules mutate the request while it is evaluated: they may reject it, attach
/// one error message per source, or append audit notes. Error messages keep
/// the order in which sources first reported.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SinkRequest {
    sink: String,
    url: Option<String>,
    rejected: bool,
    messages: Vec<(ComponentName, String)>,
    audit: Vec<(ComponentName, String)>,
}

impl SinkRequest {
    /// A request for a basic sink.
    #[must_use]
    pub fn new(sink: impl Into<String>) -> Self {
        Self {
            sink: sink.into(),
            url: None,
            rejected: false,
            messages: Vec::new(),
            audit: Vec::new(),
        }
    }

    /// A request for a network sink bound for `url`.
    #[must_use]
    pub fn network(sink: impl Into<String>, url: impl Into<String>) -> Self {
        let mut request = Self::new(sink);
        request.url = Some(url.into());
        request
    }

    /// Returns the sink name.
    #[must_use]
    pub const fn sink(&self) -> &str {
        self.sink.as_str()
    }

    /// Returns the destination URL of a network request.
    #[must_use]
    pub fn url(&self) -> Option<&str> {
        self.url.as_deref()
    }

    /// Marks the request rejected without a message.
    pub const fn reject(&mut self) {
        self.rejected = true;
    }

    /// True once any source rejected the request.
    #[must_use]
    pub const fn is_rejected(&self) -> bool {
        self.rejected
    }

    /// Rejects the request with a message attributed to `source`.
    ///
    /// A later message from the same source replaces the earlier one in
    /// place.
    pub fn add_error_message(&mut self, source: &ComponentName, message: impl Into<String>) {
        self.reject();
        let text = message.into();
        if let Some(entry) = self.messages.iter_mut().find(|(name, _)| name == source) {
            entry.1 = text;
        } else {
            self.messages.push((source.clone(), text));
        }
    }

    /// Error messages in the order sources first reported them.
    #[must_use]
    pub fn error_messages(&self) -> &[(ComponentName, String)] {
        &self.messages
    }

    /// Records an audit note without affecting the outcome.
    pub fn add_audit_note(&mut self, source: &ComponentName, note: impl Into<String>) {
        self.audit.push((source.clone(), note.into()));
    }

    /// Audit notes written by `log` rules.
    #[must_use]
    pub fn audit_notes(&self) -> &[(ComponentName, String)] {
        &self.audit
    }
}

impl fmt::Display for SinkRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.url {
            Some(url) => write!(f, "SinkRequest<{}>({url})", self.sink),
            None => write!(f, "SinkRequest<{}>()", self.sink),
        }
    }
}
