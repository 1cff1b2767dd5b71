//! Stateful stereo to 5.1 surround synthesizer.
//!
//! Passive matrix derivation: fronts pass through, center comes from
//! the correlated (sum) signal at -3 dB, the surrounds from the
//! ambience (difference) signal in anti-phase, and the LFE from a
//! low-passed sum. The low-pass filters make this stateful, which is
//! why the producer path pulls synthesized frames from here
//! (`copy_with_upmix`) instead of copying the decoder buffer directly.

const MINUS_3DB: f32 = std::f32::consts::FRAC_1_SQRT_2;
/// LFE crossover frequency in Hz.
const LFE_CUTOFF: f32 = 120.0;
/// High-frequency roll-off for the surround ambience in Hz.
const SURROUND_CUTOFF: f32 = 7_000.0;

#[derive(Debug)]
pub struct SurroundUpmixer {
    lfe_alpha: f32,
    surround_alpha: f32,
    lfe_state: f32,
    surround_state: f32,
    /// Synthesized 5.1 frames waiting to be pulled.
    pending: Vec<f32>,
}

fn one_pole_alpha(cutoff: f32, sample_rate: u32) -> f32 {
    1.0 - (-2.0 * std::f32::consts::PI * cutoff / sample_rate as f32).exp()
}

impl SurroundUpmixer {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            lfe_alpha: one_pole_alpha(LFE_CUTOFF, sample_rate),
            surround_alpha: one_pole_alpha(SURROUND_CUTOFF, sample_rate),
            lfe_state: 0.0,
            surround_state: 0.0,
            pending: Vec::new(),
        }
    }

    /// Feed interleaved stereo frames, synthesizing 5.1 frames into the
    /// internal queue (L R C LFE Ls Rs order).
    pub fn feed(&mut self, stereo: &[f32]) {
        let frames = stereo.len() / 2;
        self.pending.reserve(frames * 6);

        for frame in stereo.chunks_exact(2) {
            let (l, r) = (frame[0], frame[1]);
            let sum = (l + r) * 0.5;
            let diff = (l - r) * 0.5;

            self.lfe_state += self.lfe_alpha * (sum - self.lfe_state);
            self.surround_state += self.surround_alpha * (diff - self.surround_state);

            let center = sum * MINUS_3DB;
            let surround = self.surround_state * MINUS_3DB;

            self.pending
                .extend_from_slice(&[l, r, center, self.lfe_state, surround, -surround]);
        }
    }

    /// Number of synthesized frames ready to pull.
    pub fn frames_ready(&self) -> usize {
        self.pending.len() / 6
    }

    /// Move up to `dest.len() / 6` synthesized frames into `dest`.
    /// Returns the number of frames written.
    pub fn pull(&mut self, dest: &mut [f32]) -> usize {
        let frames = (dest.len() / 6).min(self.frames_ready());
        let samples = frames * 6;
        dest[..samples].copy_from_slice(&self.pending[..samples]);
        self.pending.drain(..samples);
        frames
    }

    /// Drop queued frames and filter state (seek/reset path).
    pub fn reset(&mut self) {
        self.lfe_state = 0.0;
        self.surround_state = 0.0;
        self.pending.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn fronts_pass_through_unchanged() {
        let mut up = SurroundUpmixer::new(48_000);
        up.feed(&[0.5, -0.25]);

        let mut out = [0.0f32; 6];
        assert_eq!(up.pull(&mut out), 1);
        assert_relative_eq!(out[0], 0.5);
        assert_relative_eq!(out[1], -0.25);
    }

    #[test]
    fn center_is_sum_at_minus_3db() {
        let mut up = SurroundUpmixer::new(48_000);
        up.feed(&[0.8, 0.8]);

        let mut out = [0.0f32; 6];
        up.pull(&mut out);
        assert_relative_eq!(out[2], 0.8 * MINUS_3DB, epsilon = 1e-6);
    }

    #[test]
    fn surrounds_are_anti_phase_ambience() {
        let mut up = SurroundUpmixer::new(48_000);
        // Pure difference signal, long enough for the smoother to settle.
        for _ in 0..200 {
            up.feed(&[0.5, -0.5]);
        }
        let mut out = [0.0f32; 6];
        // Drain to the most recent frame.
        while up.frames_ready() > 1 {
            up.pull(&mut out);
        }
        up.pull(&mut out);
        assert!(out[4] > 0.2);
        assert_relative_eq!(out[4], -out[5], epsilon = 1e-6);
        // Correlated content contributes nothing to the surrounds.
        assert_relative_eq!(out[2], 0.0, epsilon = 1e-6);
    }

    #[test]
    fn lfe_tracks_dc_rejects_nothing_instantly() {
        let mut up = SurroundUpmixer::new(48_000);
        for _ in 0..4_000 {
            up.feed(&[0.4, 0.4]);
        }
        let mut out = [0.0f32; 6];
        while up.frames_ready() > 0 {
            up.pull(&mut out);
        }
        // One-pole settles on the DC value of the sum signal.
        assert_relative_eq!(out[3], 0.4, epsilon = 1e-2);
    }

    #[test]
    fn pull_is_bounded_by_ready_frames() {
        let mut up = SurroundUpmixer::new(48_000);
        up.feed(&[0.1, 0.1, 0.2, 0.2]);
        assert_eq!(up.frames_ready(), 2);

        let mut out = [0.0f32; 18];
        assert_eq!(up.pull(&mut out), 2);
        assert_eq!(up.frames_ready(), 0);
    }

    #[test]
    fn reset_clears_queue_and_state() {
        let mut up = SurroundUpmixer::new(48_000);
        up.feed(&[1.0, 1.0]);
        up.reset();
        assert_eq!(up.frames_ready(), 0);

        let mut out = [0.0f32; 6];
        up.feed(&[0.0, 0.0]);
        up.pull(&mut out);
        assert_relative_eq!(out[3], 0.0);
    }
}
