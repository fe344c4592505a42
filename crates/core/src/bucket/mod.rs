//! Flow-control buckets: per-session send queues with media-aware
//! eviction (spec §4.6). Ported from `rtp_bucket.cpp`'s three variants.

mod base;
mod flow_stat;
mod video;

pub use base::{AudioBucket, BaseBucket};
pub use flow_stat::FlowStat;
pub use video::VideoBucket;

use crate::packet::{MmType, RtpPacket};

pub const BASE_REDLINE_BYTES: u32 = 1024 * 1024;
pub const AUDIO_REDLINE_BYTES: u32 = 1024 * 8;
pub const VIDEO_REDLINE_BYTES: u32 = 1024 * 1024;
pub const VIDEO_REDLINE_FRAMES: u32 = 10;
/// `1920 * 1080 * 3 / 2` — max bytes of one accumulated (but not yet
/// flushed) video frame before it's discarded and the bucket resyncs.
pub const MAX_FRAME_BYTES: u32 = 1920 * 1080 * 3 / 2;

/// Session type, as relevant to bucket selection (spec §4.6: video gets a
/// key-frame-aware bucket only on the connection-oriented `_EX` variants).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionKind {
    TcpClientEx,
    TcpServerEx,
    SslClientEx,
    SslServerEx,
    Other,
}

/// Common interface implemented by every bucket variant.
///
/// Invariant (spec §8): `total_bytes() == sum(payload(p) for p in
/// ordered packets)`; `total_frames` (video only) `== frames.len() +
/// [waiting] + [sending]`.
pub trait RtpBucket: Send {
    /// Enqueue a packet. Returns `false` if rejected outright (base
    /// bucket over redline, or video bucket not yet synchronized).
    fn push_back_add_ref(&mut self, packet: RtpPacket) -> bool;

    /// Peek the next packet to send without removing it.
    fn get_front(&mut self) -> Option<RtpPacket>;

    /// Remove the packet previously returned by `get_front`. Must be
    /// passed the exact same packet (identity, not value, equality) or
    /// it's ignored.
    fn pop_front_release(&mut self, packet: &RtpPacket);

    fn total_bytes(&self) -> u32;

    fn set_redline(&mut self, redline_bytes: u32, redline_frames: u32);

    fn get_redline(&self) -> (u32, u32);

    fn flowctrl_info(&mut self) -> FlowctrlInfo;

    fn reset_flowctrl_info(&mut self);

    fn reset(&mut self);
}

#[derive(Debug, Clone, Copy, Default)]
pub struct FlowctrlInfo {
    pub in_frame_rate: f32,
    pub in_bit_rate: f32,
    pub out_frame_rate: f32,
    pub out_bit_rate: f32,
    pub cached_bytes: u32,
    pub cached_frames: u32,
}

/// Select the bucket variant for a media type / session type pair, per
/// the `CreateRtpBucket` factory in the original.
pub fn create_bucket(mm_type: MmType, session_kind: SessionKind) -> Box<dyn RtpBucket> {
    use crate::packet::{is_audio, is_video};

    if is_audio(mm_type) {
        Box::new(AudioBucket::new())
    } else if is_video(mm_type) {
        match session_kind {
            SessionKind::TcpClientEx
            | SessionKind::TcpServerEx
            | SessionKind::SslClientEx
            | SessionKind::SslServerEx => Box::new(VideoBucket::new()),
            SessionKind::Other => Box::new(BaseBucket::new()),
        }
    } else {
        Box::new(BaseBucket::new())
    }
}
