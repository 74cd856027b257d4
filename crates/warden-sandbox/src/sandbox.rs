//! Sandbox orchestration built on top of `birdcage`.

use std::collections::BTreeSet;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitStatus;
use std::sync::Arc;

use birdcage::process::{Child, Command, Output};
use birdcage::{Birdcage, Exception, Sandbox as BirdcageTrait};
use tracing::debug;

use crate::env_guard::EnvGuard;
use crate::error::SandboxError;
use crate::profile::SandboxProfile;
use crate::runtime::thread_count;

const SANDBOX_TARGET: &str = "warden_sandbox::sandbox";

/// Builder for sandboxed commands.
pub type SandboxCommand = Command;
/// Handle to a running sandboxed process.
pub type SandboxChild = Child;
/// Captured output from a sandboxed process.
pub type SandboxOutput = Output;

/// Launches commands inside a restrictive sandbox.
#[derive(Debug)]
pub struct Sandbox {
    profile: SandboxProfile,
}

impl Sandbox {
    /// Creates a sandbox with the supplied profile.
    #[must_use]
    pub const fn new(profile: SandboxProfile) -> Self {
        Self { profile }
    }

    /// Returns the profile applied to spawned commands.
    #[must_use]
    pub const fn profile(&self) -> &SandboxProfile {
        &self.profile
    }

    /// Spawns the provided command inside the configured sandbox.
    ///
    /// The command's program path must be absolute and whitelisted on the
    /// profile. Path checks run before the thread check, so a misconfigured
    /// profile is reported even from a threaded caller.
    ///
    /// # Errors
    ///
    /// Returns a path error when the program or a whitelisted path cannot be
    /// canonicalised, [`SandboxError::MultiThreaded`] when more than one
    /// thread exists in the current process, or [`SandboxError::Activation`]
    /// when `birdcage` refuses an exception or the spawn itself.
    pub fn spawn(&self, command: SandboxCommand) -> Result<SandboxChild, SandboxError> {
        let program = canonical_program(Path::new(command.get_program()))?;
        self.ensure_program_whitelisted(&program)?;
        let exceptions = self.collect_exceptions(&program)?;
        ensure_single_threaded()?;

        let env_guard = EnvGuard::capture();
        debug!(
            target: SANDBOX_TARGET,
            program = %program.display(),
            exceptions = exceptions.len(),
            network_denied = self.profile.network_policy().is_denied(),
            "activating sandbox"
        );

        let mut sandbox = Birdcage::new();
        for exception in exceptions {
            sandbox.add_exception(exception)?;
        }

        let child = sandbox.spawn(command)?;
        drop(env_guard);
        Ok(child)
    }

    /// Spawns the command and waits for it to exit.
    ///
    /// Used by single-threaded trampolines that hand their own stdio to the
    /// confined child.
    ///
    /// # Errors
    ///
    /// Returns any [`Sandbox::spawn`] error, or [`SandboxError::Wait`] when
    /// the child cannot be awaited.
    pub fn run(&self, command: SandboxCommand) -> Result<ExitStatus, SandboxError> {
        let mut child = self.spawn(command)?;
        let status = child.wait().map_err(|source| SandboxError::Wait {
            source: Arc::new(source),
        })?;
        debug!(target: SANDBOX_TARGET, ?status, "sandboxed process exited");
        Ok(status)
    }

    fn ensure_program_whitelisted(&self, program: &Path) -> Result<(), SandboxError> {
        let authorised = canonicalised_set(self.profile.executable_paths())?;
        if authorised.contains(program) {
            return Ok(());
        }
        Err(SandboxError::ExecutableNotAuthorised {
            program: program.to_path_buf(),
        })
    }

    fn collect_exceptions(&self, program: &Path) -> Result<Vec<Exception>, SandboxError> {
        let read_only = canonicalised_set(self.profile.read_only_paths())?;
        let read_write = canonicalised_set(self.profile.read_write_paths())?;
        let executables = canonicalised_set(self.profile.executable_paths())?;

        let mut exceptions: Vec<Exception> = read_only
            .into_iter()
            .map(Exception::Read)
            .chain(read_write.into_iter().map(Exception::WriteAndRead))
            .chain(executables.into_iter().map(Exception::ExecuteAndRead))
            .collect();
        exceptions.push(Exception::ExecuteAndRead(program.to_path_buf()));
        exceptions.extend(self.profile.environment_policy().to_exceptions());

        if !self.profile.network_policy().is_denied() {
            exceptions.push(Exception::Networking);
        }

        Ok(exceptions)
    }
}

fn ensure_single_threaded() -> Result<(), SandboxError> {
    let threads = thread_count().map_err(|source| SandboxError::ThreadCountUnavailable {
        source: Arc::new(source),
    })?;
    if threads > 1 {
        return Err(SandboxError::MultiThreaded {
            thread_count: threads,
        });
    }
    Ok(())
}

fn canonical_program(program: &Path) -> Result<PathBuf, SandboxError> {
    if !program.is_absolute() {
        return Err(SandboxError::ProgramNotAbsolute(program.to_path_buf()));
    }
    canonicalise(program)
}

fn canonicalised_set(paths: &[PathBuf]) -> Result<BTreeSet<PathBuf>, SandboxError> {
    paths.iter().map(|path| canonicalise(path)).collect()
}

fn canonicalise(path: &Path) -> Result<PathBuf, SandboxError> {
    if !path.exists() {
        return Err(SandboxError::MissingPath {
            path: path.to_path_buf(),
        });
    }

    fs::canonicalize(path).map_err(|source| SandboxError::CanonicalisationFailed {
        path: path.to_path_buf(),
        source: Arc::new(source),
    })
}
