use std::io;
use std::sync::Arc;

use thiserror::Error;
use warden_core::protocol::FrameError;
use warden_sandbox::SandboxError;

use crate::registry::RegistryError;
use crate::telemetry::TelemetryError;

/// Errors that stop the worker process.
#[derive(Debug, Error)]
pub enum WorkerError {
    /// The built-in package failed to register.
    #[error("failed to register built-in calls: {0}")]
    Registry(#[from] RegistryError),

    /// The control channel could not be read or written.
    #[error("control channel failed: {0}")]
    Channel(#[from] FrameError),

    /// Logging could not be configured.
    #[error(transparent)]
    Telemetry(#[from] TelemetryError),

    /// The worker could not locate its own executable.
    #[error("failed to locate the worker executable: {source}")]
    CurrentExe {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The confined worker could not be launched.
    #[error("failed to enter the sandbox: {0}")]
    Sandbox(#[from] SandboxError),
}
