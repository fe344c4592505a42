//! RTP packet representation and wire framing (spec §3, §6).
//!
//! A [`RtpPacket`] is the unit carried between [`crate::transport`],
//! [`crate::session`] variants, and [`crate::bucket`]. It is immutable
//! after construction — sharing is via `Arc` clone rather than the
//! original's manual `AddRef`/`Release`.

use std::sync::Arc;

/// Media multiplex type. Audio and video occupy disjoint numeric ranges;
/// anything outside both (including the messaging fabric's own traffic)
/// is treated as non-media for bucket/reorder purposes.
pub type MmType = u8;

pub const MMT_AUDIO_MIN: MmType = 1;
pub const MMT_AUDIO_MAX: MmType = 99;
pub const MMT_VIDEO_MIN: MmType = 100;
pub const MMT_VIDEO_MAX: MmType = 199;
pub const MMT_MSG: MmType = 200;

pub fn is_audio(mm_type: MmType) -> bool {
    (MMT_AUDIO_MIN..=MMT_AUDIO_MAX).contains(&mm_type)
}

pub fn is_video(mm_type: MmType) -> bool {
    (MMT_VIDEO_MIN..=MMT_VIDEO_MAX).contains(&mm_type)
}

/// 12-byte fixed RTP header fields (RFC 3550 §5.1), as carried by
/// [`RtpPacket`]. `v=2, p=x=cc=0` always — the TCP session variant
/// re-stamps these on every accepted frame (spec §4.4).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RtpHeaderFields {
    pub marker: bool,
    pub payload_type: u8,
    pub sequence: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

/// The 8-byte extension that follows the RTP fixed header on the wire
/// (spec §6): `mmId:u32 be, mmType:u8, reserved:u8, hdrAndPayloadSize:u16 be`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct WireExt {
    mm_id: u32,
    mm_type: MmType,
    hdr_and_payload_size: u16,
}

const RTP_HEADER_LEN: usize = 12;
const EXT_LEN: usize = 8;
pub const WIRE_HEADER_LEN: usize = RTP_HEADER_LEN + EXT_LEN;

/// An immutable, reference-counted RTP-carried packet.
///
/// `first_packet_of_frame` and `key_frame` are video-bucket metadata; for
/// audio/generic traffic they're unused (`false`).
#[derive(Debug, Clone)]
pub struct RtpPacket {
    inner: Arc<Inner>,
}

#[derive(Debug)]
struct Inner {
    mm_type: MmType,
    mm_id: u32,
    header: RtpHeaderFields,
    first_packet_of_frame: bool,
    key_frame: bool,
    payload: Vec<u8>,
}

impl RtpPacket {
    pub fn new(mm_type: MmType, mm_id: u32, header: RtpHeaderFields, payload: Vec<u8>) -> Self {
        Self::with_frame_flags(mm_type, mm_id, header, payload, false, false)
    }

    pub fn with_frame_flags(
        mm_type: MmType,
        mm_id: u32,
        header: RtpHeaderFields,
        payload: Vec<u8>,
        first_packet_of_frame: bool,
        key_frame: bool,
    ) -> Self {
        RtpPacket {
            inner: Arc::new(Inner {
                mm_type,
                mm_id,
                header,
                first_packet_of_frame,
                key_frame,
                payload,
            }),
        }
    }

    pub fn mm_type(&self) -> MmType {
        self.inner.mm_type
    }

    pub fn mm_id(&self) -> u32 {
        self.inner.mm_id
    }

    pub fn marker(&self) -> bool {
        self.inner.header.marker
    }

    pub fn sequence(&self) -> u16 {
        self.inner.header.sequence
    }

    pub fn ssrc(&self) -> u32 {
        self.inner.header.ssrc
    }

    pub fn timestamp(&self) -> u32 {
        self.inner.header.timestamp
    }

    pub fn first_packet_of_frame(&self) -> bool {
        self.inner.first_packet_of_frame
    }

    pub fn key_frame(&self) -> bool {
        self.inner.key_frame
    }

    pub fn payload(&self) -> &[u8] {
        &self.inner.payload
    }

    pub fn payload_size(&self) -> usize {
        self.inner.payload.len()
    }

    /// Identity comparison — two clones of the same `Arc` are the same
    /// packet. Used by bucket `pop_front_release`, which must be handed
    /// back exactly the packet `get_front` returned.
    pub fn is_same_as(&self, other: &RtpPacket) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    /// Encode the RTP fixed header + extension + payload for the TCP/SSL
    /// framed session variants. Forces `v=2, p=x=cc=0` per spec §4.4/§6.
    pub fn to_wire(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(WIRE_HEADER_LEN + self.payload_size());

        let first_byte: u8 = 2 << 6;
        let second_byte: u8 = ((self.marker() as u8) << 7) | (self.inner.header.payload_type & 0x7f);
        buf.push(first_byte);
        buf.push(second_byte);
        buf.extend_from_slice(&self.sequence().to_be_bytes());
        buf.extend_from_slice(&self.timestamp().to_be_bytes());
        buf.extend_from_slice(&self.ssrc().to_be_bytes());

        let hdr_and_payload_size = (WIRE_HEADER_LEN + self.payload_size()).min(u16::MAX as usize) as u16;
        buf.extend_from_slice(&self.mm_id().to_be_bytes());
        buf.push(self.mm_type());
        buf.push(0); // reserved
        buf.extend_from_slice(&hdr_and_payload_size.to_be_bytes());

        buf.extend_from_slice(self.payload());
        buf
    }

    /// Decode a packet previously produced by [`to_wire`](Self::to_wire).
    /// Any malformed input is a `BadFrame` per spec §4.4/§7.
    pub fn from_wire(buf: &[u8]) -> crate::error::Result<Self> {
        if buf.len() < WIRE_HEADER_LEN {
            return Err(crate::error::NetError::BadFrame(
                "frame shorter than RTP header + extension".into(),
            ));
        }

        let marker = buf[1] & 0x80 != 0;
        let payload_type = buf[1] & 0x7f;
        let sequence = u16::from_be_bytes([buf[2], buf[3]]);
        let timestamp = u32::from_be_bytes([buf[4], buf[5], buf[6], buf[7]]);
        let ssrc = u32::from_be_bytes([buf[8], buf[9], buf[10], buf[11]]);

        let mm_id = u32::from_be_bytes([buf[12], buf[13], buf[14], buf[15]]);
        let mm_type = buf[16];
        let hdr_and_payload_size = u16::from_be_bytes([buf[18], buf[19]]) as usize;

        if hdr_and_payload_size != buf.len() {
            return Err(crate::error::NetError::BadFrame(format!(
                "hdrAndPayloadSize {hdr_and_payload_size} != frame length {}",
                buf.len()
            )));
        }

        let payload = buf[WIRE_HEADER_LEN..].to_vec();

        Ok(RtpPacket::new(
            mm_type,
            mm_id,
            RtpHeaderFields {
                marker,
                payload_type,
                sequence,
                timestamp,
                ssrc,
            },
            payload,
        ))
    }
}

/// Stateful RTP sequence/timestamp/SSRC generator, one per outbound media
/// channel. Mirrors `RtpHeader` from the teacher's `media::rtp`, extended
/// with frame-flag awareness for video packetization.
#[derive(Debug)]
pub struct RtpHeaderState {
    payload_type: u8,
    ssrc: u32,
    sequence: u16,
    timestamp: u64,
}

impl RtpHeaderState {
    pub fn new(payload_type: u8, ssrc: u32) -> Self {
        Self {
            payload_type,
            ssrc,
            sequence: 0,
            timestamp: 0,
        }
    }

    pub fn with_random_ssrc(payload_type: u8) -> Self {
        use rand::Rng;
        Self::new(payload_type, rand::rng().random::<u32>())
    }

    pub fn sequence(&self) -> u16 {
        self.sequence
    }

    pub fn timestamp(&self) -> u32 {
        self.timestamp as u32
    }

    /// Build the next header and advance the sequence number.
    pub fn next_header(&mut self, marker: bool) -> RtpHeaderFields {
        let fields = RtpHeaderFields {
            marker,
            payload_type: self.payload_type,
            sequence: self.sequence,
            timestamp: self.timestamp as u32,
            ssrc: self.ssrc,
        };
        self.sequence = self.sequence.wrapping_add(1);
        fields
    }

    pub fn advance_timestamp(&mut self, increment: u32) {
        self.timestamp = self.timestamp.wrapping_add(increment as u64);
    }
}

/// 16-bit RTP sequence wrap-around comparison: `true` if `a` is strictly
/// before `b` in sequence order (used by [`crate::reorder`]).
pub fn seq_less(a: u16, b: u16) -> bool {
    (a.wrapping_sub(b) as i16) < 0
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_packet(seq: u16, marker: bool) -> RtpPacket {
        RtpPacket::new(
            MMT_VIDEO_MIN,
            7,
            RtpHeaderFields {
                marker,
                payload_type: 96,
                sequence: seq,
                timestamp: 3000,
                ssrc: 0xAABBCCDD,
            },
            vec![1, 2, 3, 4],
        )
    }

    #[test]
    fn wire_round_trip() {
        let p = sample_packet(42, true);
        let wire = p.to_wire();
        let back = RtpPacket::from_wire(&wire).unwrap();
        assert_eq!(back.sequence(), 42);
        assert!(back.marker());
        assert_eq!(back.mm_id(), 7);
        assert_eq!(back.mm_type(), MMT_VIDEO_MIN);
        assert_eq!(back.payload(), &[1, 2, 3, 4]);
    }

    #[test]
    fn wire_round_trip_large_payload() {
        for len in [1usize, 255, 1024, 65000] {
            let payload = vec![0xAB; len];
            let p = RtpPacket::new(
                MMT_AUDIO_MIN,
                1,
                RtpHeaderFields {
                    marker: false,
                    payload_type: 8,
                    sequence: 1,
                    timestamp: 0,
                    ssrc: 1,
                },
                payload.clone(),
            );
            let back = RtpPacket::from_wire(&p.to_wire()).unwrap();
            assert_eq!(back.payload(), payload.as_slice());
        }
    }

    #[test]
    fn from_wire_rejects_short_buffer() {
        assert!(RtpPacket::from_wire(&[0u8; 4]).is_err());
    }

    #[test]
    fn from_wire_rejects_size_mismatch() {
        let p = sample_packet(1, false);
        let mut wire = p.to_wire();
        wire[19] = wire[19].wrapping_add(1);
        assert!(RtpPacket::from_wire(&wire).is_err());
    }

    #[test]
    fn header_state_sequence_wraps() {
        let mut st = RtpHeaderState::new(96, 1);
        for _ in 0..u16::MAX {
            st.next_header(false);
        }
        assert_eq!(st.sequence(), u16::MAX);
        st.next_header(false);
        assert_eq!(st.sequence(), 0);
    }

    #[test]
    fn seq_less_wraps_around() {
        assert!(seq_less(0xFFFE, 0x0001));
        assert!(seq_less(1, 2));
        assert!(!seq_less(2, 1));
    }

    #[test]
    fn is_same_as_identity() {
        let p = sample_packet(1, false);
        let clone = p.clone();
        assert!(p.is_same_as(&clone));
        let other = sample_packet(1, false);
        assert!(!p.is_same_as(&other));
    }
}
