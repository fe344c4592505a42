//! Non-blocking transports that carry RTP wire frames: UDP
//! (connectionless, one packet per datagram), TCP (self-describing
//! length-prefixed stream), TLS-wrapped TCP, and multicast UDP.
//! Grounded on `rtp_session_tcpserver.cpp`/`rtp_session_udpclient.cpp`/
//! `rtp_session_mcast_ex.h`'s `OnRecv`/`OnSend` reactor callbacks,
//! generalized from sockets the original addresses by raw fd/
//! `PRO_INT64` to `mio`'s typed sources.

pub mod heartbeat;
pub mod mcast;
pub mod ssl;
pub mod tcp;
pub mod udp;

use crate::error::{NetError, Result};
use crate::packet::{RtpPacket, WIRE_HEADER_LEN};

/// Accumulates bytes off a stream socket and slices out complete RTP
/// wire frames as they become available. The wire format is
/// self-describing (`hdrAndPayloadSize` at a fixed offset), so no extra
/// length prefix is needed beyond what [`crate::packet`] already
/// defines.
#[derive(Debug, Default)]
pub struct FrameReassembler {
    buf: Vec<u8>,
}

impl FrameReassembler {
    pub fn new() -> Self {
        Self { buf: Vec::new() }
    }

    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pull every complete frame currently buffered, leaving a trailing
    /// partial frame (if any) for the next `feed`.
    pub fn drain_frames(&mut self) -> Result<Vec<RtpPacket>> {
        let mut out = Vec::new();
        let mut offset = 0;

        loop {
            let remaining = &self.buf[offset..];
            if remaining.len() < WIRE_HEADER_LEN {
                break;
            }
            let frame_len = u16::from_be_bytes([remaining[18], remaining[19]]) as usize;
            if frame_len < WIRE_HEADER_LEN {
                return Err(NetError::BadFrame(format!(
                    "hdrAndPayloadSize {frame_len} shorter than fixed header"
                )));
            }
            if remaining.len() < frame_len {
                break;
            }

            out.push(RtpPacket::from_wire(&remaining[..frame_len])?);
            offset += frame_len;
        }

        self.buf.drain(..offset);
        Ok(out)
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
            vec![1, 2, 3],
        )
    }

    #[test]
    fn reassembles_frames_split_across_feeds() {
        let mut r = FrameReassembler::new();
        let wire1 = pkt(1).to_wire();
        let wire2 = pkt(2).to_wire();
        let mut combined = wire1.clone();
        combined.extend_from_slice(&wire2);

        r.feed(&combined[..combined.len() - 3]);
        let frames = r.drain_frames().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence(), 1);

        r.feed(&combined[combined.len() - 3..]);
        let frames = r.drain_frames().unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].sequence(), 2);
    }

    #[test]
    fn rejects_corrupt_size_field() {
        let mut r = FrameReassembler::new();
        let mut wire = pkt(1).to_wire();
        wire[18] = 0;
        wire[19] = 1; // hdrAndPayloadSize = 1, shorter than fixed header
        r.feed(&wire);
        assert!(r.drain_frames().is_err());
    }
}
