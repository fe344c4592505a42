use std::collections::VecDeque;

use super::{FlowctrlInfo, RtpBucket, AUDIO_REDLINE_BYTES, BASE_REDLINE_BYTES};
use crate::bucket::FlowStat;
use crate::packet::RtpPacket;

/// Generic send queue: rejects new packets once `total_bytes >=
/// redline_bytes` (ported from `CRtpBucket`).
#[derive(Debug)]
pub struct BaseBucket {
    packets: VecDeque<RtpPacket>,
    total_bytes: u32,
    redline_bytes: u32,
    flow_stat: FlowStat,
}

impl BaseBucket {
    pub fn new() -> Self {
        Self {
            packets: VecDeque::new(),
            total_bytes: 0,
            redline_bytes: BASE_REDLINE_BYTES,
            flow_stat: FlowStat::new(),
        }
    }
}

impl Default for BaseBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl RtpBucket for BaseBucket {
    fn push_back_add_ref(&mut self, packet: RtpPacket) -> bool {
        self.flow_stat.push_data(1, packet.payload_size() as u64);

        if self.total_bytes >= self.redline_bytes {
            return false;
        }

        self.total_bytes += packet.payload_size() as u32;
        self.packets.push_back(packet);
        true
    }

    fn get_front(&mut self) -> Option<RtpPacket> {
        self.packets.front().cloned()
    }

    fn pop_front_release(&mut self, packet: &RtpPacket) {
        let Some(front) = self.packets.front() else {
            return;
        };
        if !front.is_same_as(packet) {
            return;
        }
        let front = self.packets.pop_front().unwrap();
        self.flow_stat.pop_data(1, front.payload_size() as u64);
        self.total_bytes -= front.payload_size() as u32;
    }

    fn total_bytes(&self) -> u32 {
        self.total_bytes
    }

    fn set_redline(&mut self, redline_bytes: u32, _redline_frames: u32) {
        if redline_bytes > 0 {
            self.redline_bytes = redline_bytes;
        }
    }

    fn get_redline(&self) -> (u32, u32) {
        (self.redline_bytes, 0)
    }

    fn flowctrl_info(&mut self) -> FlowctrlInfo {
        let (in_f, in_b, out_f, out_b) = self.flow_stat.calc_info();
        FlowctrlInfo {
            in_frame_rate: in_f,
            in_bit_rate: in_b,
            out_frame_rate: out_f,
            out_bit_rate: out_b,
            cached_bytes: self.total_bytes,
            cached_frames: self.packets.len() as u32,
        }
    }

    fn reset_flowctrl_info(&mut self) {
        self.flow_stat.reset();
    }

    fn reset(&mut self) {
        self.packets.clear();
        self.total_bytes = 0;
        self.flow_stat.reset();
    }
}

/// Audio send queue: never rejects — evicts from the head (drop-oldest)
/// until the new packet fits under the redline (ported from
/// `CRtpAudioBucket`).
#[derive(Debug)]
pub struct AudioBucket {
    packets: VecDeque<RtpPacket>,
    total_bytes: u32,
    redline_bytes: u32,
    flow_stat: FlowStat,
}

impl AudioBucket {
    pub fn new() -> Self {
        Self {
            packets: VecDeque::new(),
            total_bytes: 0,
            redline_bytes: AUDIO_REDLINE_BYTES,
            flow_stat: FlowStat::new(),
        }
    }
}

impl Default for AudioBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl RtpBucket for AudioBucket {
    fn push_back_add_ref(&mut self, packet: RtpPacket) -> bool {
        self.flow_stat.push_data(1, packet.payload_size() as u64);

        while self.total_bytes >= self.redline_bytes {
            let Some(evicted) = self.packets.pop_front() else {
                break;
            };
            self.total_bytes -= evicted.payload_size() as u32;
        }

        self.total_bytes += packet.payload_size() as u32;
        self.packets.push_back(packet);
        true
    }

    fn get_front(&mut self) -> Option<RtpPacket> {
        self.packets.front().cloned()
    }

    fn pop_front_release(&mut self, packet: &RtpPacket) {
        let Some(front) = self.packets.front() else {
            return;
        };
        if !front.is_same_as(packet) {
            return;
        }
        let front = self.packets.pop_front().unwrap();
        self.flow_stat.pop_data(1, front.payload_size() as u64);
        self.total_bytes -= front.payload_size() as u32;
    }

    fn total_bytes(&self) -> u32 {
        self.total_bytes
    }

    fn set_redline(&mut self, redline_bytes: u32, _redline_frames: u32) {
        if redline_bytes > 0 {
            self.redline_bytes = redline_bytes;
        }
    }

    fn get_redline(&self) -> (u32, u32) {
        (self.redline_bytes, 0)
    }

    fn flowctrl_info(&mut self) -> FlowctrlInfo {
        let (in_f, in_b, out_f, out_b) = self.flow_stat.calc_info();
        FlowctrlInfo {
            in_frame_rate: in_f,
            in_bit_rate: in_b,
            out_frame_rate: out_f,
            out_bit_rate: out_b,
            cached_bytes: self.total_bytes,
            cached_frames: self.packets.len() as u32,
        }
    }

    fn reset_flowctrl_info(&mut self) {
        self.flow_stat.reset();
    }

    fn reset(&mut self) {
        self.packets.clear();
        self.total_bytes = 0;
        self.flow_stat.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{MmType, RtpHeaderFields};

    fn pkt(seq: u16, payload_len: usize) -> RtpPacket {
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
            vec![0u8; payload_len],
        )
    }

    #[test]
    fn base_bucket_rejects_over_redline() {
        let mut b = BaseBucket::new();
        b.set_redline(100, 0);
        assert!(b.push_back_add_ref(pkt(1, 60)));
        assert!(b.push_back_add_ref(pkt(2, 60)));
        assert!(!b.push_back_add_ref(pkt(3, 1)));
        assert_eq!(b.total_bytes(), 120);
    }

    #[test]
    fn base_bucket_fifo_pop() {
        let mut b = BaseBucket::new();
        let p1 = pkt(1, 10);
        b.push_back_add_ref(p1.clone());
        let front = b.get_front().unwrap();
        assert!(front.is_same_as(&p1));
        b.pop_front_release(&front);
        assert_eq!(b.total_bytes(), 0);
    }

    #[test]
    fn audio_bucket_drops_oldest_scenario_3() {
        let mut b = AudioBucket::new();
        b.set_redline(4096, 0);
        for i in 0..10u16 {
            b.push_back_add_ref(pkt(i, 1024));
        }
        assert!(b.total_bytes() <= 4096);
        // last 4 packets survive (seq 6..=9)
        let mut seqs = Vec::new();
        while let Some(front) = b.get_front() {
            seqs.push(front.sequence());
            b.pop_front_release(&front);
        }
        assert_eq!(seqs, vec![6, 7, 8, 9]);
    }

    #[test]
    fn audio_bucket_conservation_invariant() {
        let mut b = AudioBucket::new();
        b.set_redline(2048, 0);
        for i in 0..20u16 {
            b.push_back_add_ref(pkt(i, 100));
        }

        let before_drain = b.total_bytes();
        let mut sum = 0u32;
        while let Some(p) = b.get_front() {
            sum += p.payload_size() as u32;
            b.pop_front_release(&p);
        }
        assert_eq!(sum, before_drain);
        assert_eq!(b.total_bytes(), 0);
    }
}
