//! Sliding-window flow statistics (frame rate / bit rate) shared by every
//! bucket variant. Grounded on `rtp_flow_stat.h`'s push/pop accounting as
//! referenced from `rtp_bucket.cpp`.

use std::time::{Duration, Instant};

const DEFAULT_TIME_SPAN: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Copy)]
struct Sample {
    at: Instant,
    frames: u64,
    bytes: u64,
}

/// Tracks in/out frame rate and bit rate over a trailing time span, plus
/// loss accounting fed by [`crate::reorder`]. `push_data`/`pop_data` are
/// called once per packet accepted into / removed from a bucket.
#[derive(Debug)]
pub struct FlowStat {
    span: Duration,
    in_samples: Vec<Sample>,
    out_samples: Vec<Sample>,
    loss_count: u64,
    received_count: u64,
}

impl FlowStat {
    pub fn new() -> Self {
        Self {
            span: DEFAULT_TIME_SPAN,
            in_samples: Vec::new(),
            out_samples: Vec::new(),
            loss_count: 0,
            received_count: 0,
        }
    }

    pub fn set_time_span(&mut self, span: Duration) {
        self.span = span;
    }

    pub fn push_data(&mut self, frames: u64, bytes: u64) {
        self.received_count += 1;
        Self::record(&mut self.in_samples, frames, bytes);
    }

    pub fn pop_data(&mut self, frames: u64, bytes: u64) {
        Self::record(&mut self.out_samples, frames, bytes);
    }

    pub fn record_loss(&mut self, count: u64) {
        self.loss_count += count;
    }

    fn record(samples: &mut Vec<Sample>, frames: u64, bytes: u64) {
        samples.push(Sample {
            at: Instant::now(),
            frames,
            bytes,
        });
    }

    fn prune_and_sum(samples: &mut Vec<Sample>, span: Duration) -> (u64, u64) {
        let cutoff = Instant::now().checked_sub(span);
        if let Some(cutoff) = cutoff {
            samples.retain(|s| s.at >= cutoff);
        }
        samples
            .iter()
            .fold((0u64, 0u64), |(f, b), s| (f + s.frames, b + s.bytes))
    }

    /// Returns `(in_frame_rate, in_bit_rate, out_frame_rate, out_bit_rate)`
    /// in units per second, measured over the configured time span.
    pub fn calc_info(&mut self) -> (f32, f32, f32, f32) {
        let span_secs = self.span.as_secs_f32().max(f32::EPSILON);
        let (in_f, in_b) = Self::prune_and_sum(&mut self.in_samples, self.span);
        let (out_f, out_b) = Self::prune_and_sum(&mut self.out_samples, self.span);

        (
            in_f as f32 / span_secs,
            (in_b * 8) as f32 / span_secs,
            out_f as f32 / span_secs,
            (out_b * 8) as f32 / span_secs,
        )
    }

    /// Loss rate as a fraction of packets received since the last reset.
    pub fn loss_rate(&self) -> f32 {
        if self.received_count == 0 {
            0.0
        } else {
            self.loss_count as f32 / self.received_count as f32
        }
    }

    pub fn loss_count(&self) -> u64 {
        self.loss_count
    }

    pub fn reset(&mut self) {
        self.in_samples.clear();
        self.out_samples.clear();
        self.loss_count = 0;
        self.received_count = 0;
    }
}

impl Default for FlowStat {
    fn default() -> Self {
        Self::new()
    }
}
