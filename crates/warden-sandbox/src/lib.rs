//! Process confinement for warden workers.
//!
//! The `warden-sandbox` crate wraps the [`birdcage`] library with defaults
//! suited to sandbox workers. Callers describe what a worker may touch with a
//! [`SandboxProfile`], then launch it through a [`Sandbox`]. Linux namespaces
//! and `seccomp-bpf` filters are applied by `birdcage`.
//!
//! Profiles start closed:
//! - Networking is disabled unless explicitly enabled.
//! - Environment variables are stripped unless whitelisted.
//! - Executables must be whitelisted and provided as absolute paths.
//! - Standard library locations on Linux are readable so dynamically linked
//!   binaries keep working.
//!
//! ```rust,no_run
//! use warden_sandbox::{Sandbox, SandboxCommand, SandboxProfile, process::Stdio};
//!
//! # fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let profile = SandboxProfile::for_worker("/usr/libexec/warden-worker");
//!
//! let mut command = SandboxCommand::new("/usr/libexec/warden-worker");
//! command.stdin(Stdio::piped()).stdout(Stdio::piped());
//!
//! let sandbox = Sandbox::new(profile);
//! let child = sandbox.spawn(command)?;
//! # drop(child);
//! # Ok(()) }
//! ```
//!
//! [`Sandbox::spawn`] must run on a single-threaded process. When more threads
//! are active the sandbox returns [`SandboxError::MultiThreaded`] rather than
//! tripping the assertion inside `birdcage`. Multi-threaded hosts launch a
//! short-lived single-threaded trampoline that calls [`Sandbox::run`].

pub(crate) mod env_guard;
mod error;
mod profile;
mod runtime;
mod sandbox;

pub use birdcage::process;
pub use error::SandboxError;
pub use profile::{EnvironmentPolicy, NetworkPolicy, SandboxProfile, WORKER_ENVIRONMENT};
pub use runtime::thread_count;
pub use sandbox::{Sandbox, SandboxChild, SandboxCommand, SandboxOutput};

#[cfg(test)]
mod tests;
