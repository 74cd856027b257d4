//! Control channels between the host and its workers.
//!
//! A [`ControlChannel`] carries JSONL frames to one worker. Workers run either
//! as child processes ([`ProcessChannel`]), optionally re-entering themselves
//! inside a sandbox, or on a thread of the host ([`InProcessChannel`]) for
//! tests and platforms without namespaces. A [`WorkerLauncher`] picks one
//! per the configured [`LaunchMode`].

mod in_process;
mod process;

use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use thiserror::Error;
use warden_config::{Config, LaunchMode};
use warden_core::protocol::{FrameError, HostFrame, WorkerFrame};
use warden_worker::ModuleRegistry;

pub use in_process::InProcessChannel;
pub use process::ProcessChannel;

pub(crate) const CHANNEL_TARGET: &str = "wardend::channel";

/// Errors raised while talking to a worker.
#[derive(Debug, Error)]
pub enum ChannelError {
    /// The worker process could not be spawned.
    #[error("failed to spawn worker '{}': {source}", program.display())]
    Spawn {
        /// Program path.
        program: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A standard stream of the worker was not captured.
    #[error("worker {stream} was not captured")]
    MissingStream {
        /// Stream name.
        stream: &'static str,
    },

    /// An in-process pipe or thread could not be created.
    #[error("failed to start in-process worker: {source}")]
    InProcess {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// A frame could not be read, written, or parsed.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The worker closed its side of the channel.
    #[error("worker closed the control channel")]
    Closed,

    /// Waiting for or signalling the worker failed.
    #[error("failed to stop worker: {source}")]
    Stop {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },
}

/// A bidirectional frame channel to one worker.
#[cfg_attr(test, mockall::automock)]
pub trait ControlChannel: Send {
    /// Writes one frame.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] when the worker's input is gone.
    fn send(&mut self, frame: &HostFrame) -> Result<(), ChannelError>;

    /// Blocks for the next frame.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Closed`] at end of stream.
    fn receive(&mut self) -> Result<WorkerFrame, ChannelError>;

    /// Closes the worker's input and waits up to `grace` for it to exit
    /// before forcing it down.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Stop`] when the worker cannot be reaped.
    fn shutdown(&mut self, grace: Duration) -> Result<(), ChannelError>;
}

/// Starts workers for pool slots.
#[cfg_attr(test, mockall::automock)]
pub trait WorkerLauncher: Send + Sync {
    /// Starts the worker for slot `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError`] when the worker cannot be started.
    fn launch(&self, index: usize) -> Result<Box<dyn ControlChannel>, ChannelError>;
}

/// Launches the worker binary as a child process.
#[derive(Debug, Clone)]
pub struct ProcessLauncher {
    executable: PathBuf,
    sandboxed: bool,
}

impl ProcessLauncher {
    /// Creates a launcher for `executable`. Sandboxed launchers pass
    /// `--sandboxed` so the worker confines itself before serving.
    #[must_use]
    pub fn new(executable: impl Into<PathBuf>, sandboxed: bool) -> Self {
        Self {
            executable: executable.into(),
            sandboxed,
        }
    }

    /// Worker binary that will be run.
    #[must_use]
    pub fn executable(&self) -> &std::path::Path {
        &self.executable
    }

    /// Whether workers confine themselves.
    #[must_use]
    pub const fn is_sandboxed(&self) -> bool {
        self.sandboxed
    }
}

impl WorkerLauncher for ProcessLauncher {
    fn launch(&self, index: usize) -> Result<Box<dyn ControlChannel>, ChannelError> {
        let channel = ProcessChannel::spawn(index, &self.executable, self.sandboxed)?;
        Ok(Box::new(channel))
    }
}

/// Runs workers on threads of the host process.
#[derive(Debug, Clone)]
pub struct InProcessLauncher {
    registry: Arc<ModuleRegistry>,
}

impl InProcessLauncher {
    /// Creates a launcher serving calls from `registry`.
    #[must_use]
    pub const fn new(registry: Arc<ModuleRegistry>) -> Self {
        Self { registry }
    }
}

impl WorkerLauncher for InProcessLauncher {
    fn launch(&self, index: usize) -> Result<Box<dyn ControlChannel>, ChannelError> {
        let channel = InProcessChannel::spawn(index, Arc::clone(&self.registry))?;
        Ok(Box::new(channel))
    }
}

/// Picks the launcher for the configured launch mode.
///
/// A bare worker executable name is looked up next to the running binary
/// first, then left to the `PATH` search.
#[must_use]
pub fn launcher_for(config: &Config, registry: Arc<ModuleRegistry>) -> Arc<dyn WorkerLauncher> {
    match config.launch_mode() {
        LaunchMode::InProcess => Arc::new(InProcessLauncher::new(registry)),
        LaunchMode::Process => Arc::new(ProcessLauncher::new(
            resolve_executable(config.worker_executable().as_std_path()),
            false,
        )),
        LaunchMode::Sandboxed => Arc::new(ProcessLauncher::new(
            resolve_executable(config.worker_executable().as_std_path()),
            true,
        )),
    }
}

pub(crate) fn resolve_executable(configured: &std::path::Path) -> PathBuf {
    if configured.components().count() != 1 {
        return configured.to_path_buf();
    }
    std::env::current_exe()
        .ok()
        .and_then(|current| current.parent().map(|dir| dir.join(configured)))
        .filter(|candidate| candidate.is_file())
        .unwrap_or_else(|| configured.to_path_buf())
}

#[cfg(test)]
mod tests;
