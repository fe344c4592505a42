//! Best-effort packet reordering for UDP-sourced media (spec §4.5).
//!
//! `pro_reorder.h`/`.cpp` were not present in the retrieved reference
//! sources; this module is reconstructed from how
//! `rtp_session_wrapper.cpp` drives `PushBack`/`PopFront`/
//! `SetMaxPacketCount`/`Reset` — a small fixed-size window keyed by the
//! wrap-around RTP sequence number, with no retransmission request.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

use crate::packet::{seq_less, RtpPacket};

pub const DEFAULT_REORDER_PACKET_COUNT: usize = 1;
pub const AUDIO_REORDER_PACKET_COUNT: usize = 2;
pub const VIDEO_REORDER_PACKET_COUNT: usize = 5;

/// How long `pop_front` waits for a missing sequence before giving up
/// and releasing what it has anyway, independent of whether the window
/// has filled (spec §4.7).
pub const DEFAULT_REORDER_GAP_TIMEOUT: Duration = Duration::from_millis(200);

/// Sliding window that holds up to `max_packet_count` out-of-order
/// packets before giving up and releasing the oldest one anyway, or
/// releases early once `gap_timeout` has elapsed since a missing
/// sequence was first blocked on.
pub struct ReorderBuffer {
    max_packet_count: usize,
    gap_timeout: Duration,
    packets: VecDeque<RtpPacket>,
    expected_seq: Option<u16>,
    gap_since: Option<Instant>,
}

impl ReorderBuffer {
    pub fn new(max_packet_count: usize) -> Self {
        Self {
            max_packet_count: max_packet_count.max(1),
            gap_timeout: DEFAULT_REORDER_GAP_TIMEOUT,
            packets: VecDeque::new(),
            expected_seq: None,
            gap_since: None,
        }
    }

    pub fn set_gap_timeout(&mut self, gap_timeout: Duration) {
        self.gap_timeout = gap_timeout;
    }

    pub fn set_max_packet_count(&mut self, max_packet_count: usize) {
        self.max_packet_count = max_packet_count.max(1);
    }

    pub fn max_packet_count(&self) -> usize {
        self.max_packet_count
    }

    pub fn len(&self) -> usize {
        self.packets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    /// Insert a packet in sequence order. Duplicate sequence numbers are
    /// dropped silently (retransmitted or looped packet).
    pub fn push_back(&mut self, packet: RtpPacket) {
        let seq = packet.sequence();
        if self.packets.iter().any(|p| p.sequence() == seq) {
            return;
        }
        let pos = self.packets.iter().position(|p| seq_less(seq, p.sequence()));
        match pos {
            Some(i) => self.packets.insert(i, packet),
            None => self.packets.push_back(packet),
        }
    }

    /// Release the front packet if it's the expected next one in
    /// sequence, or if the window has filled up, or if `gap_timeout` has
    /// elapsed since this gap was first blocked on — in which case the
    /// gap is treated as loss and skipped over. Call in a loop until it
    /// returns `None`.
    pub fn pop_front(&mut self) -> Option<RtpPacket> {
        let front_seq = self.packets.front()?.sequence();

        let release = match self.expected_seq {
            None => true,
            Some(expected) if front_seq == expected => true,
            Some(_) => {
                let waiting_since = *self.gap_since.get_or_insert_with(Instant::now);
                self.packets.len() >= self.max_packet_count
                    || waiting_since.elapsed() >= self.gap_timeout
            }
        };

        if !release {
            return None;
        }

        let packet = self.packets.pop_front().unwrap();
        self.expected_seq = Some(packet.sequence().wrapping_add(1));
        self.gap_since = None;
        Some(packet)
    }

    pub fn reset(&mut self) {
        self.packets.clear();
        self.expected_seq = None;
        self.gap_since = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{MmType, RtpHeaderFields};

    fn pkt(seq: u16) -> RtpPacket {
        RtpPacket::new(
            1 as MmType,
            1,
            RtpHeaderFields {
                marker: false,
                payload_type: 8,
                sequence: seq,
                timestamp: 0,
                ssrc: 1,
            },
            vec![0u8; 4],
        )
    }

    #[test]
    fn in_order_releases_immediately() {
        let mut r = ReorderBuffer::new(VIDEO_REORDER_PACKET_COUNT);
        r.push_back(pkt(1));
        assert_eq!(r.pop_front().unwrap().sequence(), 1);
        r.push_back(pkt(2));
        assert_eq!(r.pop_front().unwrap().sequence(), 2);
    }

    #[test]
    fn reorders_within_window() {
        let mut r = ReorderBuffer::new(VIDEO_REORDER_PACKET_COUNT);
        r.push_back(pkt(2));
        assert_eq!(r.pop_front().unwrap().sequence(), 2); // nothing expected yet, released
        r.reset();

        // establish expectation of seq 1, then deliver 1 out of order after 2 and 3
        r.push_back(pkt(2));
        r.push_back(pkt(3));
        r.push_back(pkt(1));
        let mut out = Vec::new();
        while let Some(p) = r.pop_front() {
            out.push(p.sequence());
        }
        assert_eq!(out, vec![1, 2, 3]);
    }

    #[test]
    fn gap_forces_release_once_window_fills() {
        let mut r = ReorderBuffer::new(3);
        r.push_back(pkt(10));
        assert_eq!(r.pop_front().unwrap().sequence(), 10); // bootstrap
        // sequence 11 is lost; 12, 13, 14 arrive — window size 3 forces
        // the gap to be skipped rather than stalling forever.
        r.push_back(pkt(12));
        r.push_back(pkt(13));
        r.push_back(pkt(14));
        let mut out = Vec::new();
        while let Some(p) = r.pop_front() {
            out.push(p.sequence());
        }
        assert_eq!(out, vec![12, 13, 14]);
    }

    #[test]
    fn duplicate_sequence_is_dropped() {
        let mut r = ReorderBuffer::new(VIDEO_REORDER_PACKET_COUNT);
        r.push_back(pkt(5));
        r.push_back(pkt(5));
        assert_eq!(r.len(), 1);
    }

    #[test]
    fn gap_forces_release_once_timeout_elapses_even_with_a_large_window() {
        let mut r = ReorderBuffer::new(100);
        r.set_gap_timeout(std::time::Duration::from_millis(20));
        r.push_back(pkt(10));
        assert_eq!(r.pop_front().unwrap().sequence(), 10); // bootstrap
        // sequence 11 never arrives; window (100) is nowhere near full,
        // but the gap timeout should still force release of 12.
        r.push_back(pkt(12));
        assert!(r.pop_front().is_none());
        std::thread::sleep(std::time::Duration::from_millis(25));
        assert_eq!(r.pop_front().unwrap().sequence(), 12);
    }

    #[test]
    fn wraparound_ordering() {
        let mut r = ReorderBuffer::new(VIDEO_REORDER_PACKET_COUNT);
        r.push_back(pkt(0xFFFE));
        assert_eq!(r.pop_front().unwrap().sequence(), 0xFFFE);
        r.push_back(pkt(0xFFFF));
        r.push_back(pkt(0x0001));
        r.push_back(pkt(0x0000));
        let mut out = Vec::new();
        while let Some(p) = r.pop_front() {
            out.push(p.sequence());
        }
        assert_eq!(out, vec![0xFFFF, 0x0000, 0x0001]);
    }
}
