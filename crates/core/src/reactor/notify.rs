//! Cross-thread wakeup coalescing, ported from `pro_notify_pipe.cpp`.
//!
//! [`mio::Waker`] already collapses multiple pending wakeups into a
//! single readable event at the OS level, but every call still costs a
//! syscall. `NotifyPipe` adds the original's armed/disarmed bookkeeping
//! on top so that a burst of `notify()` calls between two poll
//! iterations costs exactly one `wake()`.

use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use mio::Waker;

pub struct NotifyPipe {
    waker: Arc<Waker>,
    armed: AtomicBool,
}

impl NotifyPipe {
    pub fn new(waker: Arc<Waker>) -> Self {
        Self {
            waker,
            armed: AtomicBool::new(true),
        }
    }

    /// Re-arm after the poll loop has observed the wakeup. Call once
    /// per iteration, whether or not the wakeup token actually fired.
    pub fn enable_notify(&self) {
        self.armed.store(true, Ordering::Release);
    }

    /// Request a wakeup. A no-op if one is already in flight.
    pub fn notify(&self) -> io::Result<()> {
        if self.armed.swap(false, Ordering::AcqRel) {
            self.waker.wake()?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mio::{Poll, Token};

    #[test]
    fn repeated_notify_before_drain_is_cheap() {
        let poll = Poll::new().unwrap();
        let waker = Arc::new(Waker::new(poll.registry(), Token(0)).unwrap());
        let pipe = NotifyPipe::new(waker);

        pipe.notify().unwrap();
        // second call before enable_notify() is a no-op, not a second wake,
        // but we can only observe that it doesn't error.
        pipe.notify().unwrap();
        pipe.enable_notify();
        pipe.notify().unwrap();
    }
}
