//! Process entry points: serving stdio directly, or re-entering the binary
//! inside the sandbox first.

use std::env;
use std::io;
use std::process::ExitStatus;
use std::sync::Arc;

use tracing::info;
use warden_sandbox::process::Stdio;
use warden_sandbox::{Sandbox, SandboxCommand, SandboxProfile};

use crate::dispatch::Worker;
use crate::error::WorkerError;
use crate::server::serve;

const LAUNCH_TARGET: &str = "warden_worker::launch";

/// Serves the control channel on this process's stdin and stdout.
///
/// # Errors
///
/// Returns [`WorkerError`] when the built-in package fails to register or the
/// channel breaks.
pub fn serve_stdio() -> Result<(), WorkerError> {
    let worker = Worker::with_builtins()?;
    let stdin = io::stdin().lock();
    let stdout = io::stdout().lock();
    serve(&worker, stdin, stdout)?;
    Ok(())
}

/// Re-launches this executable inside a worker sandbox, handing it the
/// inherited stdio, and waits for it to exit.
///
/// Must run before any other thread starts.
///
/// # Errors
///
/// Returns [`WorkerError::CurrentExe`] when the executable path is unknown
/// and [`WorkerError::Sandbox`] when confinement fails.
pub fn run_sandboxed() -> Result<ExitStatus, WorkerError> {
    let executable = env::current_exe().map_err(|source| WorkerError::CurrentExe {
        source: Arc::new(source),
    })?;
    info!(target: LAUNCH_TARGET, executable = %executable.display(), "entering sandbox");
    let mut command = SandboxCommand::new(&executable);
    command
        .stdin(Stdio::inherit())
        .stdout(Stdio::inherit())
        .stderr(Stdio::inherit());
    let sandbox = Sandbox::new(SandboxProfile::for_worker(executable));
    Ok(sandbox.run(command)?)
}
