//! Executor Module
//!
//! Fixed pool of worker threads for background work (preload, snapshots).
//!
//! ## Architecture
//! - Jobs travel over an unbounded crossbeam channel
//! - Each submitted job reports its result over a one-shot channel
//! - `shutdown()` closes the queue; queued and in-flight jobs still finish

use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::Mutex;

use crate::error::{Result, UpsertError};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Worker pool decoupled from ingestion and query threads
pub struct TaskExecutor {
    name: String,

    /// Job queue sender; `None` once shut down
    sender: Mutex<Option<Sender<Job>>>,

    /// Worker thread handles
    workers: Mutex<Vec<JoinHandle<()>>>,
}

/// Handle to the result of a submitted job
pub struct TaskHandle<T> {
    receiver: Receiver<T>,
}

impl<T> TaskHandle<T> {
    /// Block until the job finishes
    ///
    /// Fails if the job panicked or was dropped before running.
    pub fn join(self) -> Result<T> {
        self.receiver
            .recv()
            .map_err(|_| UpsertError::Executor("Task did not complete".to_string()))
    }
}

impl TaskExecutor {
    /// Start `threads` workers named `{name}-{i}`
    pub fn new(name: impl Into<String>, threads: usize) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = channel::unbounded::<Job>();

        let mut workers = Vec::with_capacity(threads);
        for i in 0..threads.max(1) {
            let receiver = receiver.clone();
            let handle = thread::Builder::new()
                .name(format!("{}-{}", name, i))
                .spawn(move || Self::worker_loop(receiver))?;
            workers.push(handle);
        }

        tracing::debug!(executor = %name, threads = workers.len(), "Executor started");

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            workers: Mutex::new(workers),
        })
    }

    fn worker_loop(receiver: Receiver<Job>) {
        // Exits once the sender is dropped and the queue is drained
        for job in receiver.iter() {
            if panic::catch_unwind(AssertUnwindSafe(job)).is_err() {
                tracing::error!(
                    thread = thread::current().name().unwrap_or("worker"),
                    "Background task panicked"
                );
            }
        }
    }

    /// Queue a job
    pub fn submit<F, T>(&self, f: F) -> Result<TaskHandle<T>>
    where
        F: FnOnce() -> T + Send + 'static,
        T: Send + 'static,
    {
        let (result_tx, result_rx) = channel::bounded(1);
        let job: Job = Box::new(move || {
            let _ = result_tx.send(f());
        });

        let sender = self.sender.lock();
        match sender.as_ref() {
            Some(sender) => sender.send(job).map_err(|_| {
                UpsertError::Executor(format!("Executor {} is not accepting work", self.name))
            })?,
            None => {
                return Err(UpsertError::Executor(format!(
                    "Executor {} is shut down",
                    self.name
                )))
            }
        }

        Ok(TaskHandle {
            receiver: result_rx,
        })
    }

    pub fn is_shutdown(&self) -> bool {
        self.sender.lock().is_none()
    }

    /// Stop accepting work and wait for workers to drain the queue
    pub fn shutdown(&self) {
        // Dropping the sender disconnects the channel
        if self.sender.lock().take().is_none() {
            return;
        }

        let current = thread::current().id();
        let workers: Vec<_> = self.workers.lock().drain(..).collect();
        for worker in workers {
            if worker.thread().id() == current {
                continue;
            }
            if worker.join().is_err() {
                tracing::warn!(executor = %self.name, "Worker thread terminated abnormally");
            }
        }

        tracing::debug!(executor = %self.name, "Executor shut down");
    }
}

impl Drop for TaskExecutor {
    fn drop(&mut self) {
        self.shutdown();
    }
}
