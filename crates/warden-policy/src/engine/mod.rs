//! Sink checks against the rule chains of every contributing source.

use std::sync::Arc;

use tracing::{debug, error};
use warden_core::TaintSet;

use crate::error::SecurityError;
use crate::registry::ManifestRegistry;
use crate::sink::SinkRequest;

const ENGINE_TARGET: &str = "warden_policy::engine";

/// Supplies the ambient taint of the call currently being served.
#[cfg_attr(test, mockall::automock)]
pub trait TaintContext {
    /// Taint of the calling sandbox, or `None` outside any sandboxed call.
    fn current_taint(&self) -> Option<TaintSet>;
}

/// Evaluates sink requests.
///
/// # Example
///
/// ```
/// use std::sync::Arc;
/// use warden_core::TaintSet;
/// use warden_policy::{ManifestRegistry, PolicyEngine, SinkRequest};
///
/// let engine = PolicyEngine::new(Arc::new(ManifestRegistry::new()));
/// let mut request = SinkRequest::new("TOAST");
/// assert_eq!(engine.check_sink(Some(&TaintSet::empty()), &mut request), Ok(true));
/// ```
#[derive(Debug, Clone)]
pub struct PolicyEngine {
    manifests: Arc<ManifestRegistry>,
}

impl PolicyEngine {
    /// Creates an engine over a loaded registry.
    #[must_use]
    pub const fn new(manifests: Arc<ManifestRegistry>) -> Self {
        Self { manifests }
    }

    /// Returns the registry the engine consults.
    #[must_use]
    pub fn manifests(&self) -> &ManifestRegistry {
        &self.manifests
    }

    /// Checks whether data carrying `taint` may reach the requested sink.
    ///
    /// Every label in the set runs its source's rule chain. Labels whose
    /// package or source is unknown reject the request and evaluation moves on
    /// to the next label. A chain that finishes without a decision allows.
    ///
    /// Returns `Ok(true)` when accepted and `Ok(false)` when a source dropped
    /// the request silently.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError`] when any source recorded a message.
    pub fn check_sink(
        &self,
        taint: Option<&TaintSet>,
        request: &mut SinkRequest,
    ) -> Result<bool, SecurityError> {
        let Some(active) = taint.filter(|set| !set.is_empty()) else {
            return Ok(true);
        };
        debug!(target: ENGINE_TARGET, %request, taint = %active, "evaluating sink request");

        for label in active.labels() {
            let Some(manifest) = self.manifests.manifest(label.package()) else {
                error!(target: ENGINE_TARGET, package = label.package(), "no manifest for taint package");
                request.reject();
                continue;
            };
            let Some(source) = manifest.source(label.name()) else {
                error!(target: ENGINE_TARGET, %label, "no source declared for taint label");
                request.reject();
                continue;
            };
            debug!(target: ENGINE_TARGET, %label, "evaluating rules");
            source.policy().evaluate(source.name(), request);
        }

        if let Some(failure) = SecurityError::from_messages(request.error_messages()) {
            return Err(failure);
        }
        Ok(!request.is_rejected())
    }

    /// Checks the request against the taint of the current sandboxed call.
    ///
    /// # Errors
    ///
    /// Returns [`SecurityError`] when any source recorded a message.
    pub fn check_caller_sink<C>(
        &self,
        context: &C,
        request: &mut SinkRequest,
    ) -> Result<bool, SecurityError>
    where
        C: TaintContext + ?Sized,
    {
        let taint = context.current_taint();
        self.check_sink(taint.as_ref(), request)
    }
}

#[cfg(test)]
mod tests;
