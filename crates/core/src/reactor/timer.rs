//! Coarse timer wheel for handshake timeouts, heartbeat checks, and
//! reconnect backoff. Grounded on the `SetupTimer`/`OnTimer` callback
//! pattern used throughout `rtp_session_wrapper.cpp` and
//! `pro_connector.h`, reworked as a min-heap rather than a bucketed
//! wheel since reactor shards here run on the order of hundreds, not
//! millions, of timers.

use std::cmp::Ordering as CmpOrdering;
use std::collections::BinaryHeap;
use std::time::{Duration, Instant};

pub type TimerId = u64;

struct Entry {
    deadline: Instant,
    id: TimerId,
    period: Option<Duration>,
    data: u64,
}

impl PartialEq for Entry {
    fn eq(&self, other: &Self) -> bool {
        self.deadline == other.deadline && self.id == other.id
    }
}
impl Eq for Entry {}

impl Ord for Entry {
    fn cmp(&self, other: &Self) -> CmpOrdering {
        // reverse for a min-heap on `deadline`
        other.deadline.cmp(&self.deadline).then(other.id.cmp(&self.id))
    }
}
impl PartialOrd for Entry {
    fn partial_cmp(&self, other: &Self) -> Option<CmpOrdering> {
        Some(self.cmp(other))
    }
}

/// A fired timer, returned by [`TimerWheel::drain_expired`].
pub struct Fired {
    pub id: TimerId,
    pub data: u64,
}

/// Deadline-ordered timer set. Cancellation is lazy: a cancelled id is
/// remembered and skipped when it would otherwise fire.
pub struct TimerWheel {
    heap: BinaryHeap<Entry>,
    cancelled: std::collections::HashSet<TimerId>,
    next_id: TimerId,
}

impl TimerWheel {
    pub fn new() -> Self {
        Self {
            heap: BinaryHeap::new(),
            cancelled: std::collections::HashSet::new(),
            next_id: 1,
        }
    }

    /// Schedule a one-shot timer `delay` from now, carrying opaque `data`
    /// back to the caller when it fires.
    pub fn schedule_once(&mut self, delay: Duration, data: u64) -> TimerId {
        self.schedule(delay, None, data)
    }

    /// Schedule a recurring timer, re-armed with the same period each
    /// time it fires (caller must call [`Self::reschedule`] or it will
    /// not recur — recurrence here is explicit rather than automatic, to
    /// keep `drain_expired` side-effect free).
    pub fn schedule_periodic(&mut self, period: Duration, data: u64) -> TimerId {
        self.schedule(period, Some(period), data)
    }

    fn schedule(&mut self, delay: Duration, period: Option<Duration>, data: u64) -> TimerId {
        let id = self.next_id;
        self.next_id += 1;
        self.heap.push(Entry {
            deadline: Instant::now() + delay,
            id,
            period,
            data,
        });
        id
    }

    pub fn cancel(&mut self, id: TimerId) {
        self.cancelled.insert(id);
    }

    /// Duration until the next live timer fires, for use as a poll
    /// timeout. `None` if no timers are scheduled.
    pub fn next_deadline(&self) -> Option<Duration> {
        self.heap.peek().map(|e| {
            e.deadline
                .checked_duration_since(Instant::now())
                .unwrap_or(Duration::ZERO)
        })
    }

    /// Pop every timer whose deadline has passed. Periodic timers are
    /// automatically re-armed for their next occurrence.
    pub fn drain_expired(&mut self, now: Instant) -> Vec<Fired> {
        let mut fired = Vec::new();
        while let Some(top) = self.heap.peek() {
            if top.deadline > now {
                break;
            }
            let entry = self.heap.pop().unwrap();
            if self.cancelled.remove(&entry.id) {
                continue;
            }
            if let Some(period) = entry.period {
                self.heap.push(Entry {
                    deadline: now + period,
                    id: entry.id,
                    period: Some(period),
                    data: entry.data,
                });
            }
            fired.push(Fired {
                id: entry.id,
                data: entry.data,
            });
        }
        fired
    }

    pub fn is_empty(&self) -> bool {
        self.heap.is_empty()
    }
}

impl Default for TimerWheel {
    fn default() -> Self {
        Self::new()
    }
}
