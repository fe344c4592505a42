use std::collections::VecDeque;

use super::{
    FlowctrlInfo, RtpBucket, MAX_FRAME_BYTES, VIDEO_REDLINE_BYTES, VIDEO_REDLINE_FRAMES,
};
use crate::bucket::base::BaseBucket;
use crate::bucket::FlowStat;
use crate::packet::RtpPacket;

/// One accumulated access unit: the packets of a single frame plus
/// whether it began with a key frame.
struct VideoFrame {
    key_frame: bool,
    bucket: BaseBucket,
}

impl VideoFrame {
    fn new(key_frame: bool) -> Self {
        Self {
            key_frame,
            bucket: BaseBucket::new(),
        }
    }
}

/// Key-frame-gated, frame-boundary-aware video send queue (ported from
/// `CRtpVideoBucket::PushBackAddRef`, step numbers kept in comments to
/// match the original).
///
/// `strict_stream` toggles the SSRC/sequence resynchronization checks
/// that are present but permanently disabled (`if (0)`) in the original
/// — spec §9 Open Question, default `false` to match observable upstream
/// behavior.
pub struct VideoBucket {
    frames: VecDeque<VideoFrame>,
    waiting_frame: Option<VideoFrame>,
    sending_frame: Option<VideoFrame>,
    total_bytes: u32,
    total_frames: u32,
    redline_bytes: u32,
    redline_frames: u32,
    need_key_frame: bool,
    next_seq: u16,
    ssrc: u32,
    strict_stream: bool,
    flow_stat: FlowStat,
}

impl VideoBucket {
    pub fn new() -> Self {
        Self {
            frames: VecDeque::new(),
            waiting_frame: None,
            sending_frame: None,
            total_bytes: 0,
            total_frames: 0,
            redline_bytes: VIDEO_REDLINE_BYTES,
            redline_frames: VIDEO_REDLINE_FRAMES,
            need_key_frame: true,
            next_seq: 0,
            ssrc: 0,
            strict_stream: false,
            flow_stat: FlowStat::new(),
        }
    }

    /// Opt in to the guarded-off SSRC/sequence resynchronization policy
    /// (spec §9 Open Question).
    pub fn set_strict_stream(&mut self, strict: bool) {
        self.strict_stream = strict;
    }

    fn discard_waiting(&mut self) {
        if let Some(waiting) = self.waiting_frame.take() {
            self.total_bytes -= waiting.bucket.total_bytes();
            self.total_frames -= 1;
        }
    }
}

impl Default for VideoBucket {
    fn default() -> Self {
        Self::new()
    }
}

impl RtpBucket for VideoBucket {
    fn push_back_add_ref(&mut self, packet: RtpPacket) -> bool {
        let marker = packet.marker();
        let seq = packet.sequence();
        let ssrc = packet.ssrc();
        let key_frame = packet.key_frame();
        let first_packet_of_frame = packet.first_packet_of_frame();

        self.flow_stat
            .push_data(if marker { 1 } else { 0 }, packet.payload_size() as u64);

        // 1. check synchronization point
        if self.need_key_frame {
            if !key_frame || !first_packet_of_frame {
                return false;
            }
            self.need_key_frame = false;
        }
        if key_frame && first_packet_of_frame {
            self.next_seq = seq;
            self.ssrc = ssrc;
        }

        // 2. check ssrc (guarded off upstream; opt-in via strict_stream)
        if self.strict_stream && ssrc != self.ssrc {
            self.need_key_frame = true;
            return false;
        }

        // 3. check sequence number (guarded off upstream; opt-in via strict_stream)
        if self.strict_stream {
            if seq != self.next_seq {
                self.need_key_frame = true;
                return false;
            }
            self.next_seq = self.next_seq.wrapping_add(1);
        }

        // 4. check the first packet
        if first_packet_of_frame {
            self.discard_waiting();
            self.waiting_frame = Some(VideoFrame::new(key_frame));
            self.total_frames += 1;
        } else if self.waiting_frame.is_none() {
            self.need_key_frame = true;
            return false;
        }

        let packet_bytes = packet.payload_size() as u32;
        self.waiting_frame
            .as_mut()
            .unwrap()
            .bucket
            .push_back_add_ref(packet);
        self.total_bytes += packet_bytes;

        // 5. check the last packet
        if !marker {
            let waiting_bytes = self.waiting_frame.as_ref().unwrap().bucket.total_bytes();
            if waiting_bytes >= MAX_FRAME_BYTES {
                self.discard_waiting();
                self.need_key_frame = true;
                return false;
            }
            return true;
        }

        // 6. check redline
        let waiting_is_key = self.waiting_frame.as_ref().unwrap().key_frame;
        if !waiting_is_key {
            if self.total_bytes <= self.redline_bytes && self.total_frames <= self.redline_frames {
                self.frames.push_back(self.waiting_frame.take().unwrap());
                return true;
            } else {
                self.discard_waiting();
                self.need_key_frame = true;
                return false;
            }
        }

        // 7. remove old frames — a fresh key frame invalidates the backlog
        while let Some(frame) = self.frames.pop_front() {
            self.total_bytes -= frame.bucket.total_bytes();
            self.total_frames -= 1;
        }

        // 8. add the new frame
        self.frames.push_back(self.waiting_frame.take().unwrap());
        true
    }

    fn get_front(&mut self) -> Option<RtpPacket> {
        if let Some(sending) = self.sending_frame.as_mut() {
            if let Some(packet) = sending.bucket.get_front() {
                return Some(packet);
            }
            self.sending_frame = None;
            self.total_frames -= 1;
        }

        let next = self.frames.pop_front()?;
        self.sending_frame = Some(next);
        self.sending_frame.as_mut().unwrap().bucket.get_front()
    }

    fn pop_front_release(&mut self, packet: &RtpPacket) {
        let Some(sending) = self.sending_frame.as_mut() else {
            return;
        };
        let Some(front) = sending.bucket.get_front() else {
            return;
        };
        if !front.is_same_as(packet) {
            return;
        }

        self.flow_stat.pop_data(
            if packet.marker() { 1 } else { 0 },
            packet.payload_size() as u64,
        );
        self.total_bytes -= packet.payload_size() as u32;
        sending.bucket.pop_front_release(packet);

        if sending.bucket.get_front().is_none() {
            self.sending_frame = None;
            self.total_frames -= 1;
        }
    }

    fn total_bytes(&self) -> u32 {
        self.total_bytes
    }

    fn set_redline(&mut self, redline_bytes: u32, redline_frames: u32) {
        if redline_bytes > 0 {
            self.redline_bytes = redline_bytes;
        }
        if redline_frames > 0 {
            self.redline_frames = redline_frames;
        }
    }

    fn get_redline(&self) -> (u32, u32) {
        (self.redline_bytes, self.redline_frames)
    }

    fn flowctrl_info(&mut self) -> FlowctrlInfo {
        let (in_f, in_b, out_f, out_b) = self.flow_stat.calc_info();
        FlowctrlInfo {
            in_frame_rate: in_f,
            in_bit_rate: in_b,
            out_frame_rate: out_f,
            out_bit_rate: out_b,
            cached_bytes: self.total_bytes,
            cached_frames: self.total_frames,
        }
    }

    fn reset_flowctrl_info(&mut self) {
        self.flow_stat.reset();
    }

    fn reset(&mut self) {
        self.frames.clear();
        self.waiting_frame = None;
        self.sending_frame = None;
        self.total_bytes = 0;
        self.total_frames = 0;
        self.need_key_frame = true;
        self.next_seq = 0;
        self.ssrc = 0;
        self.flow_stat.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::packet::{MmType, RtpHeaderFields};

    fn video_pkt(seq: u16, marker: bool, key_frame: bool, first: bool, len: usize) -> RtpPacket {
        RtpPacket::with_frame_flags(
            100 as MmType,
            1,
            RtpHeaderFields {
                marker,
                payload_type: 96,
                sequence: seq,
                timestamp: 0,
                ssrc: 0xCAFE,
            },
            vec![0u8; len],
            first,
            key_frame,
        )
    }

    /// Feeds one complete frame (single packet, marker set).
    fn push_frame(b: &mut VideoBucket, seq: u16, key_frame: bool, len: usize) -> bool {
        b.push_back_add_ref(video_pkt(seq, true, key_frame, true, len))
    }

    #[test]
    fn drops_non_key_frames_until_key_frame_scenario_2() {
        let mut b = VideoBucket::new();
        assert!(!push_frame(&mut b, 1, false, 100));
        assert!(!push_frame(&mut b, 2, false, 100));
        assert!(!push_frame(&mut b, 3, false, 100));
        assert!(push_frame(&mut b, 4, true, 100));

        let front = b.get_front().unwrap();
        assert!(front.key_frame());
        assert_eq!(front.sequence(), 4);
    }

    #[test]
    fn key_frame_flushes_backlog() {
        let mut b = VideoBucket::new();
        push_frame(&mut b, 1, true, 50); // first key frame, synchronizes
        push_frame(&mut b, 2, false, 50);
        push_frame(&mut b, 3, false, 50);
        push_frame(&mut b, 4, true, 50); // new key frame invalidates older frames

        // Only the new key frame (seq 4) and the very first stored key
        // frame packet are reachable through get_front/pop_front in order;
        // the two non-key frames in between are discarded.
        let mut seqs = Vec::new();
        while let Some(p) = b.get_front() {
            seqs.push(p.sequence());
            b.pop_front_release(&p);
        }
        assert_eq!(seqs, vec![4]);
    }

    #[test]
    fn oversized_waiting_frame_resyncs() {
        let mut b = VideoBucket::new();
        push_frame(&mut b, 1, true, 10); // synchronize
        // first packet of a huge frame, no marker yet
        assert!(b.push_back_add_ref(video_pkt(2, false, false, true, super::MAX_FRAME_BYTES as usize)));
        // second packet pushes the waiting frame over MAX_FRAME_BYTES
        assert!(!b.push_back_add_ref(video_pkt(3, false, false, false, 10)));
        // bucket needs a new key frame again
        assert!(!push_frame(&mut b, 4, false, 10));
        assert!(push_frame(&mut b, 5, true, 10));
    }

    #[test]
    fn conservation_invariant_after_mixed_pushes() {
        let mut b = VideoBucket::new();
        push_frame(&mut b, 1, true, 100);
        push_frame(&mut b, 2, false, 50);

        let mut total = 0u32;
        while let Some(p) = b.get_front() {
            total += p.payload_size() as u32;
            b.pop_front_release(&p);
        }
        assert_eq!(total, 150);
        assert_eq!(b.total_bytes(), 0);
        assert_eq!(b.total_frames, 0);
    }
}
