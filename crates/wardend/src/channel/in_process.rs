//! Workers served on threads of the host.

use std::io::{self, BufReader, PipeReader, PipeWriter};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, warn};
use warden_core::protocol::{HostFrame, WorkerFrame, decode_frame, read_line, write_frame};
use warden_worker::{ModuleRegistry, Worker, serve};

use super::{CHANNEL_TARGET, ChannelError, ControlChannel};

/// JSONL channel to a worker running on a host thread over anonymous pipes.
///
/// Frames take the same path as with a child process, so protocol behaviour
/// is identical; only confinement is missing.
#[derive(Debug)]
pub struct InProcessChannel {
    index: usize,
    writer: Option<PipeWriter>,
    reader: BufReader<PipeReader>,
    server: Option<JoinHandle<()>>,
}

impl InProcessChannel {
    /// Starts a worker thread for slot `index`.
    ///
    /// # Errors
    ///
    /// Returns [`ChannelError::InProcess`] when the pipes or the thread
    /// cannot be created.
    pub fn spawn(index: usize, registry: Arc<ModuleRegistry>) -> Result<Self, ChannelError> {
        let failed = |source: io::Error| ChannelError::InProcess {
            source: Arc::new(source),
        };
        let (host_reader, worker_writer) = io::pipe().map_err(failed)?;
        let (worker_reader, host_writer) = io::pipe().map_err(failed)?;
        let server = thread::Builder::new()
            .name(format!("warden-worker-{index}"))
            .spawn(move || {
                let worker = Worker::new(registry);
                if let Err(error) = serve(&worker, BufReader::new(worker_reader), worker_writer) {
                    warn!(target: CHANNEL_TARGET, sandbox = index, %error, "in-process worker failed");
                }
            })
            .map_err(failed)?;
        debug!(target: CHANNEL_TARGET, sandbox = index, "started in-process worker");
        Ok(Self {
            index,
            writer: Some(host_writer),
            reader: BufReader::new(host_reader),
            server: Some(server),
        })
    }
}

impl ControlChannel for InProcessChannel {
    fn send(&mut self, frame: &HostFrame) -> Result<(), ChannelError> {
        let writer = self.writer.as_mut().ok_or(ChannelError::Closed)?;
        write_frame(writer, frame)?;
        Ok(())
    }

    fn receive(&mut self) -> Result<WorkerFrame, ChannelError> {
        let line = read_line(&mut self.reader)?.ok_or(ChannelError::Closed)?;
        Ok(decode_frame(&line)?)
    }

    fn shutdown(&mut self, _grace: Duration) -> Result<(), ChannelError> {
        drop(self.writer.take());
        if let Some(server) = self.server.take()
            && server.join().is_err()
        {
            warn!(target: CHANNEL_TARGET, sandbox = self.index, "in-process worker panicked");
        }
        Ok(())
    }
}
