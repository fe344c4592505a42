//! Reactor: a small pool of non-blocking event-dispatch threads, each
//! wrapping its own [`mio::Poll`]. Grounded on `CProReactorTask` /
//! `CProTpReactorTask` (the I/O and timer reactor tasks driving
//! `pro_net`'s handshakers, sessions, and message server) — "tp" here
//! stands for the fixed-size thread pool those tasks are dispatched
//! across.
//!
//! A caller picks a shard with [`ReactorPool::handle_for`] (keyed by
//! session/user id so a given session's I/O always lands on the same
//! thread, never needing its own lock against concurrent reactor
//! callbacks) and registers its `mio` source through the returned
//! [`ReactorHandle`]. Handlers are held as `Weak` so a dropped session
//! is simply skipped on its next event rather than requiring an
//! explicit deregistration handshake.

pub mod notify;
pub mod timer;

use std::collections::HashMap;
use std::io;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use mio::event::Source;
use mio::{Events, Interest, Poll, Registry, Token, Waker};
use parking_lot::Mutex;

pub use notify::NotifyPipe;
pub use timer::{Fired, TimerId, TimerWheel};

/// Callback surface for anything registered with a [`ReactorHandle`].
/// All three are invoked from the shard's own thread — implementations
/// must not block.
pub trait EventHandler: Send + Sync {
    fn on_readable(&self, reactor: &ReactorHandle);

    fn on_writable(&self, _reactor: &ReactorHandle) {}

    fn on_timer(&self, _reactor: &ReactorHandle, _data: u64) {}
}

const TOKEN_SHARD_SHIFT: usize = 48;
const WAKE_LOCAL_TOKEN: usize = 0;

fn shard_of(token: Token) -> usize {
    token.0 >> TOKEN_SHARD_SHIFT
}

/// The public, cloneable face of one reactor shard. Cheap to clone and
/// safe to hand to any thread — registration goes through `mio`'s
/// thread-safe [`Registry`], while the shard's own thread owns the
/// `Poll`/`Events` pair and runs the dispatch loop.
#[derive(Clone)]
pub struct ReactorHandle {
    shard_index: usize,
    registry: Arc<Registry>,
    handlers: Arc<Mutex<HashMap<Token, Weak<dyn EventHandler>>>>,
    timers: Arc<Mutex<TimerWheel>>,
    timer_handlers: Arc<Mutex<HashMap<TimerId, Weak<dyn EventHandler>>>>,
    next_token: Arc<AtomicUsize>,
    notify: Arc<NotifyPipe>,
}

impl ReactorHandle {
    fn alloc_token(&self) -> Token {
        let local = self.next_token.fetch_add(1, Ordering::Relaxed);
        Token((self.shard_index << TOKEN_SHARD_SHIFT) | local)
    }

    /// Register a source for the given interest set, binding it to
    /// `handler`. The caller keeps ownership of `source` (and of the
    /// strong `Arc` the `handler` weak pointer was derived from).
    pub fn register(
        &self,
        source: &mut dyn Source,
        interest: Interest,
        handler: Weak<dyn EventHandler>,
    ) -> io::Result<Token> {
        let token = self.alloc_token();
        self.registry.register(source, token, interest)?;
        self.handlers.lock().insert(token, handler);
        Ok(token)
    }

    pub fn reregister(
        &self,
        source: &mut dyn Source,
        token: Token,
        interest: Interest,
    ) -> io::Result<()> {
        self.registry.reregister(source, token, interest)
    }

    pub fn deregister(&self, source: &mut dyn Source, token: Token) -> io::Result<()> {
        self.registry.deregister(source)?;
        self.handlers.lock().remove(&token);
        Ok(())
    }

    /// Fire `handler` once after `delay`, carrying `data` back through
    /// [`EventHandler::on_timer`].
    pub fn schedule_timer(
        &self,
        delay: Duration,
        handler: Weak<dyn EventHandler>,
        data: u64,
    ) -> TimerId {
        let id = self.timers.lock().schedule_once(delay, data);
        self.timer_handlers.lock().insert(id, handler);
        self.notify.notify().ok();
        id
    }

    pub fn schedule_periodic(
        &self,
        period: Duration,
        handler: Weak<dyn EventHandler>,
        data: u64,
    ) -> TimerId {
        let id = self.timers.lock().schedule_periodic(period, data);
        self.timer_handlers.lock().insert(id, handler);
        self.notify.notify().ok();
        id
    }

    pub fn cancel_timer(&self, id: TimerId) {
        self.timers.lock().cancel(id);
        self.timer_handlers.lock().remove(&id);
    }

    /// Wake this shard's poll loop from another thread (e.g. after
    /// pushing work onto a bucket this shard owns).
    pub fn wake(&self) -> io::Result<()> {
        self.notify.notify()
    }

    pub fn shard_index(&self) -> usize {
        self.shard_index
    }
}

struct Shard {
    handle: ReactorHandle,
    join: JoinHandle<()>,
}

fn run_shard(
    mut poll: Poll,
    shard_index: usize,
    handle: ReactorHandle,
    running: Arc<AtomicBool>,
) {
    let mut events = Events::with_capacity(1024);
    let wake_token = Token((shard_index << TOKEN_SHARD_SHIFT) | WAKE_LOCAL_TOKEN);

    while running.load(Ordering::Acquire) {
        let timeout = handle
            .timers
            .lock()
            .next_deadline()
            .map(|d| d.min(Duration::from_secs(1)))
            .unwrap_or(Duration::from_secs(1));

        match poll.poll(&mut events, Some(timeout)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(shard = shard_index, error = %e, "reactor poll error");
                continue;
            }
        }

        for event in events.iter() {
            let token = event.token();
            if token == wake_token {
                handle.notify.enable_notify();
                continue;
            }
            if shard_of(token) != shard_index {
                continue;
            }

            let maybe_handler = handle.handlers.lock().get(&token).cloned();
            let Some(weak) = maybe_handler else {
                continue;
            };
            let Some(handler) = weak.upgrade() else {
                handle.handlers.lock().remove(&token);
                continue;
            };

            if event.is_readable() {
                handler.on_readable(&handle);
            }
            if event.is_writable() {
                handler.on_writable(&handle);
            }
        }

        let fired = handle.timers.lock().drain_expired(Instant::now());
        for f in fired {
            let maybe_handler = handle.timer_handlers.lock().get(&f.id).cloned();
            if let Some(weak) = maybe_handler {
                if let Some(handler) = weak.upgrade() {
                    handler.on_timer(&handle, f.data);
                } else {
                    handle.timer_handlers.lock().remove(&f.id);
                }
            }
        }
    }

    tracing::debug!(shard = shard_index, "reactor shard exited");
}

/// A fixed-size pool of reactor shards, each on its own OS thread.
pub struct ReactorPool {
    shards: Vec<Shard>,
    running: Arc<AtomicBool>,
}

impl ReactorPool {
    /// Spawn `thread_count` shards (minimum 1).
    pub fn spawn(thread_count: usize) -> io::Result<Self> {
        let thread_count = thread_count.max(1);
        let running = Arc::new(AtomicBool::new(true));
        let mut shards = Vec::with_capacity(thread_count);

        for shard_index in 0..thread_count {
            let poll = Poll::new()?;
            let registry = Arc::new(poll.registry().try_clone()?);
            let wake_token = Token((shard_index << TOKEN_SHARD_SHIFT) | WAKE_LOCAL_TOKEN);
            let waker = Arc::new(Waker::new(&registry, wake_token)?);

            let handle = ReactorHandle {
                shard_index,
                registry,
                handlers: Arc::new(Mutex::new(HashMap::new())),
                timers: Arc::new(Mutex::new(TimerWheel::new())),
                timer_handlers: Arc::new(Mutex::new(HashMap::new())),
                next_token: Arc::new(AtomicUsize::new(WAKE_LOCAL_TOKEN + 1)),
                notify: Arc::new(NotifyPipe::new(waker)),
            };

            let thread_handle = handle.clone();
            let thread_running = running.clone();
            let join = thread::Builder::new()
                .name(format!("rtpnet-reactor-{shard_index}"))
                .spawn(move || run_shard(poll, shard_index, thread_handle, thread_running))?;

            shards.push(Shard { handle, join });
        }

        Ok(Self { shards, running })
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Deterministically pick the shard owning `key` (e.g. a session or
    /// user id) so repeated lookups for the same key always land on the
    /// same thread.
    pub fn handle_for(&self, key: u64) -> &ReactorHandle {
        let idx = (key as usize) % self.shards.len();
        &self.shards[idx].handle
    }

    pub fn handle_at(&self, shard_index: usize) -> &ReactorHandle {
        &self.shards[shard_index % self.shards.len()].handle
    }

    pub fn shutdown(self) {
        self.running.store(false, Ordering::Release);
        for shard in &self.shards {
            shard.handle.wake().ok();
        }
        for shard in self.shards {
            shard.join.join().ok();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingHandler {
        timer_fired: Arc<AtomicU32>,
    }

    impl EventHandler for CountingHandler {
        fn on_readable(&self, _reactor: &ReactorHandle) {}

        fn on_timer(&self, _reactor: &ReactorHandle, _data: u64) {
            self.timer_fired.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn pool_routes_same_key_to_same_shard() {
        let pool = ReactorPool::spawn(4).unwrap();
        let a = pool.handle_for(42).shard_index();
        let b = pool.handle_for(42).shard_index();
        assert_eq!(a, b);
        pool.shutdown();
    }

    #[test]
    fn timer_fires_and_invokes_handler() {
        let pool = ReactorPool::spawn(1).unwrap();
        let counter = Arc::new(AtomicU32::new(0));
        let handler: Arc<dyn EventHandler> = Arc::new(CountingHandler {
            timer_fired: counter.clone(),
        });
        let handle = pool.handle_for(0);
        handle.schedule_timer(Duration::from_millis(5), Arc::downgrade(&handler), 99);

        thread::sleep(Duration::from_millis(150));
        assert!(counter.load(Ordering::SeqCst) >= 1);
        drop(handler);
        pool.shutdown();
    }
}
