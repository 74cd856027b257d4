//! Workers running as child processes.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use nix::sys::signal::{Signal, kill};
use nix::unistd::Pid;
use tracing::{debug, warn};
use warden_core::protocol::{HostFrame, WorkerFrame, decode_frame, read_line, write_frame};

use super::{CHANNEL_TARGET, ChannelError, ControlChannel};

const POLL_INTERVAL: Duration = Duration::from_millis(20);
const TERM_GRACE: Duration = Duration::from_millis(500);

/// JSONL channel over a worker's stdin and stdout.
///
/// The worker's stderr carries its logs; a drain thread forwards each line
/// to the host's subscriber so the pipe never fills.
#[derive(Debug)]
pub struct ProcessChannel {
    index: usize,
    child: Child,
    stdin: Option<ChildStdin>,
    stdout: BufReader<ChildStdout>,
    stderr_drain: Option<JoinHandle<()>>,
}

impl ProcessChannel {
    /// Spawns `executable` for slot `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::Spawn`] when the process cannot start and
    /// [`ChannelError::MissingStream`] when a pipe was not captured.
    pub fn spawn(index: usize, executable: &Path, sandboxed: bool) -> Result<Self, ChannelError> {
        let mut command = Command::new(executable);
        if sandboxed {
            command.arg("--sandboxed");
        }
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(
            target: CHANNEL_TARGET,
            sandbox = index,
            executable = %executable.display(),
            sandboxed,
            "spawning worker process"
        );

        let mut child = command.spawn().map_err(|source| ChannelError::Spawn {
            program: executable.to_path_buf(),
            source: Arc::new(source),
        })?;
        let stdin = child
            .stdin
            .take()
            .ok_or(ChannelError::MissingStream { stream: "stdin" })?;
        let stdout = child
            .stdout
            .take()
            .ok_or(ChannelError::MissingStream { stream: "stdout" })?;
        let stderr_drain = child.stderr.take().and_then(|stderr| {
            thread::Builder::new()
                .name(format!("warden-stderr-{index}"))
                .spawn(move || {
                    for line in BufReader::new(stderr).lines().map_while(Result::ok) {
                        debug!(target: CHANNEL_TARGET, sandbox = index, worker = %line, "worker log");
                    }
                })
                .ok()
        });

        Ok(Self {
            index,
            child,
            stdin: Some(stdin),
            stdout: BufReader::new(stdout),
            stderr_drain,
        })
    }

    /// Operating system process id of the child.
    #[must_use]
    pub fn pid(&self) -> u32 {
        self.child.id()
    }

    fn wait_until(&mut self, deadline: Instant) -> Result<bool, ChannelError> {
        loop {
            let exited = self
                .child
                .try_wait()
                .map_err(|source| ChannelError::Stop {
                    source: Arc::new(source),
                })?;
            if let Some(status) = exited {
                debug!(target: CHANNEL_TARGET, sandbox = self.index, ?status, "worker exited");
                return Ok(true);
            }
            if Instant::now() >= deadline {
                return Ok(false);
            }
            thread::sleep(POLL_INTERVAL);
        }
    }

    fn terminate(&mut self) {
        let Ok(raw) = i32::try_from(self.child.id()) else {
            return;
        };
        if let Err(errno) = kill(Pid::from_raw(raw), Signal::SIGTERM) {
            debug!(target: CHANNEL_TARGET, sandbox = self.index, %errno, "SIGTERM failed");
        }
    }
}

impl ControlChannel for ProcessChannel {
    fn send(&mut self, frame: &HostFrame) -> Result<(), ChannelError> {
        let stdin = self.stdin.as_mut().ok_or(ChannelError::Closed)?;
        write_frame(stdin, frame)?;
        Ok(())
    }

    fn receive(&mut self) -> Result<WorkerFrame, ChannelError> {
        let line = read_line(&mut self.stdout)?.ok_or(ChannelError::Closed)?;
        Ok(decode_frame(&line)?)
    }

    fn shutdown(&mut self, grace: Duration) -> Result<(), ChannelError> {
        drop(self.stdin.take());
        if !self.wait_until(Instant::now() + grace)? {
            warn!(
                target: CHANNEL_TARGET,
                sandbox = self.index,
                grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
                "worker ignored shutdown; sending SIGTERM"
            );
            self.terminate();
            if !self.wait_until(Instant::now() + TERM_GRACE)? {
                warn!(target: CHANNEL_TARGET, sandbox = self.index, "killing worker");
                self.child.kill().map_err(|source| ChannelError::Stop {
                    source: Arc::new(source),
                })?;
                self.child.wait().map_err(|source| ChannelError::Stop {
                    source: Arc::new(source),
                })?;
            }
        }
        if let Some(drain) = self.stderr_drain.take()
            && drain.join().is_err()
        {
            warn!(target: CHANNEL_TARGET, sandbox = self.index, "stderr drain panicked");
        }
        Ok(())
    }
}

impl Drop for ProcessChannel {
    fn drop(&mut self) {
        if matches!(self.child.try_wait(), Ok(None)) {
            drop(self.child.kill());
            drop(self.child.wait());
        }
    }
}
