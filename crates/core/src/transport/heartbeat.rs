//! Per-connection liveness tracking, feeding the `PEER_DEAD` error path
//! (spec §7). A periodic reactor timer calls [`HeartbeatMonitor::is_dead`]
//! rather than relying solely on TCP-level failure detection, since a
//! half-open connection can sit readable-never/writable-never for a
//! long time without the OS ever reporting an error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

const EPOCH_WINDOW: Duration = Duration::from_secs(1);

/// Monotonic "seconds since first touch" clock, since `Instant` can't
/// be stored in an atomic directly.
pub struct HeartbeatMonitor {
    started: Instant,
    last_activity_secs: AtomicU64,
    timeout: Duration,
}

impl HeartbeatMonitor {
    pub fn new(timeout: Duration) -> Self {
        Self {
            started: Instant::now(),
            last_activity_secs: AtomicU64::new(0),
            timeout,
        }
    }

    pub fn touch(&self) {
        let elapsed = self.started.elapsed().as_secs();
        self.last_activity_secs.store(elapsed, Ordering::Release);
    }

    pub fn is_dead(&self) -> bool {
        let last = self.last_activity_secs.load(Ordering::Acquire);
        let now = self.started.elapsed().as_secs();
        Duration::from_secs(now.saturating_sub(last)) > self.timeout
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }
}

/// Smallest sensible heartbeat poll interval, mirroring
/// `HEARTBEAT_INTERVAL` in the original.
pub const HEARTBEAT_POLL_INTERVAL: Duration = EPOCH_WINDOW;

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread::sleep;

    #[test]
    fn fresh_monitor_is_alive() {
        let m = HeartbeatMonitor::new(Duration::from_secs(5));
        m.touch();
        assert!(!m.is_dead());
    }

    #[test]
    fn monitor_reports_dead_after_timeout() {
        let m = HeartbeatMonitor::new(Duration::from_millis(20));
        m.touch();
        sleep(Duration::from_millis(60));
        assert!(m.is_dead());
    }
}
