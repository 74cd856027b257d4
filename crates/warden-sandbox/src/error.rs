//! Errors raised while confining a worker.

use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use birdcage::error::Error as BirdcageError;
use thiserror::Error;

/// Errors raised while preparing, launching, or awaiting a sandboxed process.
#[derive(Debug, Error)]
pub enum SandboxError {
    /// The supplied program path was not absolute.
    #[error("sandboxed commands require absolute program paths, got '{}'", .0.display())]
    ProgramNotAbsolute(PathBuf),

    /// The program was not whitelisted in the profile.
    #[error("executable '{}' is not authorised by the sandbox profile", program.display())]
    ExecutableNotAuthorised {
        /// Canonical program path.
        program: PathBuf,
    },

    /// The supplied path does not exist and therefore cannot be whitelisted.
    #[error("path '{}' does not exist on the host filesystem", path.display())]
    MissingPath {
        /// Path as configured.
        path: PathBuf,
    },

    /// Canonicalisation of a path failed.
    #[error("failed to canonicalise '{}': {source}", path.display())]
    CanonicalisationFailed {
        /// Path as configured.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The current process hosts more than one thread.
    #[error("sandboxing must occur in a single-threaded context (observed {thread_count} threads)")]
    MultiThreaded {
        /// Threads observed in `/proc/self/status`.
        thread_count: usize,
    },

    /// Thread count could not be determined from `/proc`.
    #[error("failed to determine thread count: {source}")]
    ThreadCountUnavailable {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// Waiting on the confined child failed.
    #[error("failed to wait for sandboxed process: {source}")]
    Wait {
        /// Underlying I/O error.
        #[source]
        source: Arc<io::Error>,
    },

    /// The underlying sandbox library rejected activation.
    #[error("birdcage activation failed: {0}")]
    Activation(#[from] BirdcageError),
}
