//! Structured health reporting for daemon and sandbox lifecycle events.

use std::sync::Arc;

use strum::{AsRefStr, Display};
use warden_config::Config;

use crate::bootstrap::BootstrapError;
use crate::error::HostError;

/// Lifecycle transitions of one sandbox slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, AsRefStr)]
#[strum(serialize_all = "snake_case")]
pub enum SandboxEvent {
    /// A worker process is being started.
    Launching,
    /// The worker accepted the binding.
    Bound,
    /// The worker finished preloading.
    Ready,
    /// The worker was restarted to shed accumulated taint.
    Recycled,
    /// The worker was stopped.
    Killed,
}

/// Observer trait used to surface lifecycle events to telemetry sinks.
#[cfg_attr(test, mockall::automock)]
pub trait HealthReporter: Send + Sync {
    /// Invoked before configuration loading begins.
    fn bootstrap_starting(&self);

    /// Invoked after bootstrap completes successfully.
    fn bootstrap_succeeded(&self, config: &Config);

    /// Invoked when bootstrap fails.
    fn bootstrap_failed(&self, error: &BootstrapError);

    /// Invoked on every sandbox transition.
    fn sandbox_event(&self, index: usize, event: SandboxEvent);

    /// Invoked when a sandbox fails to start or its channel breaks.
    fn sandbox_failed(&self, index: usize, error: &HostError);
}

impl<T> HealthReporter for Arc<T>
where
    T: HealthReporter + ?Sized,
{
    fn bootstrap_starting(&self) {
        (**self).bootstrap_starting();
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        (**self).bootstrap_succeeded(config);
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        (**self).bootstrap_failed(error);
    }

    fn sandbox_event(&self, index: usize, event: SandboxEvent) {
        (**self).sandbox_event(index, event);
    }

    fn sandbox_failed(&self, index: usize, error: &HostError) {
        (**self).sandbox_failed(index, error);
    }
}

/// Default reporter that records lifecycle events using `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct StructuredHealthReporter;

impl StructuredHealthReporter {
    /// Builds a new reporter.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

impl HealthReporter for StructuredHealthReporter {
    fn bootstrap_starting(&self) {
        tracing::info!(
            target: "wardend::health",
            event = "bootstrap_starting",
            "starting daemon bootstrap"
        );
    }

    fn bootstrap_succeeded(&self, config: &Config) {
        tracing::info!(
            target: "wardend::health",
            event = "bootstrap_succeeded",
            pool_size = config.pool_size(),
            launch_mode = %config.launch_mode(),
            log_filter = %config.log_filter(),
            log_format = %config.log_format(),
            "daemon bootstrap completed"
        );
    }

    fn bootstrap_failed(&self, error: &BootstrapError) {
        tracing::error!(
            target: "wardend::health",
            event = "bootstrap_failed",
            error = %error,
            "daemon bootstrap failed"
        );
    }

    fn sandbox_event(&self, index: usize, event: SandboxEvent) {
        tracing::info!(
            target: "wardend::health",
            event = event.as_ref(),
            sandbox = index,
            "sandbox {event}"
        );
    }

    fn sandbox_failed(&self, index: usize, error: &HostError) {
        tracing::error!(
            target: "wardend::health",
            event = "sandbox_failed",
            sandbox = index,
            error = %error,
            "sandbox failed"
        );
    }
}
