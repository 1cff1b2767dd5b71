//! Pitch-preserving time stretch via signalsmith-stretch.
//!
//! Active only when the playback speed is meaningfully away from 1.0;
//! at unity the engine routes frames around the stretcher entirely.
//! Factor changes are serialized with frame processing by the engine's
//! processing lock, so a change never lands mid-chunk.

use signalsmith_stretch::Stretch;

/// Speeds closer to 1.0 than this are treated as normal playback.
pub const STRETCH_EPSILON: f64 = 1e-3;
/// Supported playback speed range.
pub const STRETCH_MIN: f64 = 0.5;
pub const STRETCH_MAX: f64 = 2.0;

pub struct TimeStretcher {
    stretch: Stretch,
    channels: u16,
    /// Playback speed; 2.0 halves the output frame count.
    factor: f64,
}

impl TimeStretcher {
    pub fn new(channels: u16, sample_rate: u32) -> Self {
        Self {
            stretch: Stretch::preset_default(channels as u32, sample_rate),
            channels,
            factor: 1.0,
        }
    }

    /// Set the playback speed, clamped to [0.5, 2.0].
    pub fn set_factor(&mut self, factor: f64) {
        let clamped = factor.clamp(STRETCH_MIN, STRETCH_MAX);
        if clamped != factor {
            log::debug!("stretch factor {factor} clamped to {clamped}");
        }
        self.factor = clamped;
    }

    pub fn factor(&self) -> f64 {
        self.factor
    }

    pub fn is_active(&self) -> bool {
        (self.factor - 1.0).abs() > STRETCH_EPSILON
    }

    /// Stretch interleaved input frames to `input_frames / factor`
    /// output frames at the same pitch.
    pub fn process(&mut self, input: &[f32]) -> Vec<f32> {
        let nch = self.channels as usize;
        let in_frames = input.len() / nch;
        if !self.is_active() || in_frames == 0 {
            return input.to_vec();
        }

        let out_frames = ((in_frames as f64 / self.factor).round() as usize).max(1);
        let mut output = vec![0.0f32; out_frames * nch];
        self.stretch
            .process(&input[..in_frames * nch], &mut output);
        output
    }

    /// Emit whatever the engine still holds (end-of-stream path).
    pub fn flush(&mut self, max_frames: usize) -> Vec<f32> {
        let mut output = vec![0.0f32; max_frames * self.channels as usize];
        self.stretch.flush(&mut output);
        output
    }

    pub fn reset(&mut self) {
        self.stretch.reset();
    }

    /// Engine latency in frames, start-to-finish.
    pub fn latency_frames(&self) -> usize {
        self.stretch.input_latency() + self.stretch.output_latency()
    }
}
