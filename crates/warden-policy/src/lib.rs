//! Information-flow policy for the warden sandbox runtime.
//!
//! Packages declare taint [`Source`]s in a [`PackageManifest`]. Each source
//! carries an ordered [`Policy`] of [`Rule`]s. Before sandboxed data reaches a
//! sink such as a toast or a network request, the [`PolicyEngine`] runs the
//! chain of every source whose label appears in the data's taint, then either
//! accepts, rejects silently, or raises a [`SecurityError`] that aggregates
//! one message per rejecting source.
//!
//! Requests whose taint matches no stopping rule are allowed. This permissive
//! default is deliberate and is logged at debug level on every evaluation.

mod engine;
mod error;
mod manifest;
mod registry;
mod rule;
mod sink;

pub use engine::{PolicyEngine, TaintContext};
pub use error::{PolicyParseError, SecurityError};
pub use manifest::{ChannelDecl, ChannelExport, PackageManifest, Source};
pub use registry::ManifestRegistry;
pub use rule::{DEFAULT_AUDIT_MESSAGE, DEFAULT_DENY_MESSAGE, Filter, Flow, Policy, Rule, RuleAction};
pub use sink::{SinkKind, SinkRegistry, SinkRegistryBuilder, SinkRequest, names as sinks};

#[cfg(test)]
mod tests;
