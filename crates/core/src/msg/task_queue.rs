//! Bounded functor-command task queue (spec §4.9/§9): moves the heavy
//! per-connection work (`OnCheckUser`, adding base/sub users) off the
//! reactor's I/O threads, capped at `MAX_PENDING_COUNT` so a flood of
//! accepts/logins can't grow memory without bound.

use std::thread::JoinHandle;

use crossbeam_channel::{bounded, Receiver, Sender};

use crate::error::{NetError, Result};

/// Shared by the accept path and the `client_logout` path per the Open
/// Question decision in spec §9: no separate unbounded queue for logout.
pub const MAX_PENDING_COUNT: usize = 5000;

type Task = Box<dyn FnOnce() + Send + 'static>;

/// One worker thread draining a bounded channel of boxed closures.
pub struct TaskQueue {
    sender: Option<Sender<Task>>,
    worker: Option<JoinHandle<()>>,
}

impl TaskQueue {
    pub fn start() -> Self {
        let (sender, receiver): (Sender<Task>, Receiver<Task>) = bounded(MAX_PENDING_COUNT);
        let worker = std::thread::Builder::new()
            .name("rtpnet-msg-task".into())
            .spawn(move || {
                while let Ok(task) = receiver.recv() {
                    task();
                }
            })
            .expect("failed to spawn task queue worker");

        Self {
            sender: Some(sender),
            worker: Some(worker),
        }
    }

    /// Current queued (not yet run) task count — used for the
    /// `MAX_PENDING_COUNT` backpressure check on the accept path.
    pub fn len(&self) -> usize {
        self.sender.as_ref().map(Sender::len).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Enqueue a task. Rejects with [`NetError::Backpressure`] rather
    /// than blocking when the queue is at capacity.
    pub fn put<F>(&self, task: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let Some(sender) = self.sender.as_ref() else {
            return Err(NetError::InvalidState("task queue stopped"));
        };
        sender
            .try_send(Box::new(task))
            .map_err(|_| NetError::Backpressure)
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.sender.take();
        if let Some(worker) = self.worker.take() {
            worker.join().ok();
        }
    }
}
