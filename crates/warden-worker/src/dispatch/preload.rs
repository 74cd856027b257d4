//! Background task queue for warming execution contexts.

use std::io;
use std::sync::mpsc::{self, Sender};
use std::thread::{self, JoinHandle};

type Task = Box<dyn FnOnce() + Send>;

/// A dedicated thread running queued tasks in order.
#[derive(Debug)]
pub(crate) struct Preloader {
    tasks: Sender<Task>,
    thread: JoinHandle<()>,
}

impl Preloader {
    pub(crate) fn spawn() -> io::Result<Self> {
        let (tasks, queue) = mpsc::channel::<Task>();
        let thread = thread::Builder::new()
            .name(String::from("warden-preload"))
            .spawn(move || {
                for task in queue {
                    task();
                }
            })?;
        Ok(Self { tasks, thread })
    }

    /// Queues a task, handing it back if the thread is gone.
    pub(crate) fn submit(&self, task: Task) -> Result<(), Task> {
        self.tasks.send(task).map_err(|error| error.0)
    }

    /// Closes the queue and waits for queued tasks to finish.
    pub(crate) fn shutdown(self) {
        let Self { tasks, thread } = self;
        drop(tasks);
        if thread.join().is_err() {
            tracing::warn!(target: "warden_worker::dispatch", "preload thread panicked");
        }
    }
}
