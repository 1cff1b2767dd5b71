//! Sample-rate conversion adapter over [rubato].
//!
//! The converter is keyed to (source rate, output rate, channel count);
//! the engine rebuilds the adapter whenever any of those change. Input
//! arrives in arbitrarily sized interleaved chunks; the adapter stages
//! frames and feeds the converter in fixed-size chunks, so a single
//! oversized request never reaches rubato directly.
//!
//! A failed conversion chunk is passed through untouched (and logged)
//! rather than aborting the pipeline; a resampling hiccup is not fatal.

use rubato::{
    FastFixedIn, PolynomialDegree, Resampler, SincFixedIn, SincInterpolationParameters,
    SincInterpolationType, WindowFunction,
};

/// Frames fed to rubato per call.
const CHUNK_FRAMES: usize = 1024;
/// Hard cap on staged input frames.
pub const MAX_STAGING_FRAMES: usize = 16_384;

/// Conversion quality tier.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SrcQuality {
    /// Bypass: samples pass through at the source rate.
    Disabled,
    /// Linear interpolation.
    Low,
    /// Cubic interpolation.
    Medium,
    /// Windowed-sinc interpolation.
    High,
}

enum Converter {
    Fast(FastFixedIn<f32>),
    Sinc(SincFixedIn<f32>),
}

impl Converter {
    fn input_frames_next(&self) -> usize {
        match self {
            Self::Fast(r) => r.input_frames_next(),
            Self::Sinc(r) => r.input_frames_next(),
        }
    }

    fn process(
        &mut self,
        wave_in: &[Vec<f32>],
    ) -> Result<Vec<Vec<f32>>, rubato::ResampleError> {
        match self {
            Self::Fast(r) => r.process(wave_in, None),
            Self::Sinc(r) => r.process(wave_in, None),
        }
    }
}

pub struct SrcAdapter {
    source_rate: u32,
    output_rate: u32,
    channels: u16,
    quality: SrcQuality,
    converter: Option<Converter>,
    /// Per-channel staged input awaiting a full chunk.
    staging: Vec<Vec<f32>>,
}

impl SrcAdapter {
    pub fn new(source_rate: u32, output_rate: u32, channels: u16, quality: SrcQuality) -> Self {
        let ratio = output_rate as f64 / source_rate as f64;
        let nch = channels as usize;

        let converter = if quality == SrcQuality::Disabled || source_rate == output_rate {
            None
        } else {
            let built = match quality {
                SrcQuality::Low => {
                    FastFixedIn::<f32>::new(ratio, 2.0, PolynomialDegree::Linear, CHUNK_FRAMES, nch)
                        .map(Converter::Fast)
                }
                SrcQuality::Medium => {
                    FastFixedIn::<f32>::new(ratio, 2.0, PolynomialDegree::Cubic, CHUNK_FRAMES, nch)
                        .map(Converter::Fast)
                }
                _ => {
                    let params = SincInterpolationParameters {
                        sinc_len: 128,
                        f_cutoff: 0.95,
                        interpolation: SincInterpolationType::Linear,
                        oversampling_factor: 128,
                        window: WindowFunction::BlackmanHarris2,
                    };
                    SincFixedIn::<f32>::new(ratio, 2.0, params, CHUNK_FRAMES, nch)
                        .map(Converter::Sinc)
                }
            };
            match built {
                Ok(c) => Some(c),
                Err(e) => {
                    log::warn!(
                        "resampler construction failed ({source_rate} -> {output_rate} Hz): {e}; \
                         falling back to bypass"
                    );
                    None
                }
            }
        };

        Self {
            source_rate,
            output_rate,
            channels,
            quality,
            converter,
            staging: vec![Vec::new(); nch],
        }
    }

    pub fn source_rate(&self) -> u32 {
        self.source_rate
    }

    pub fn output_rate(&self) -> u32 {
        self.output_rate
    }

    pub fn channels(&self) -> u16 {
        self.channels
    }

    pub fn quality(&self) -> SrcQuality {
        self.quality
    }

    /// True when this adapter needs rebuilding for the given stream key.
    pub fn needs_rebuild(&self, source_rate: u32, output_rate: u32, channels: u16) -> bool {
        self.source_rate != source_rate
            || self.output_rate != output_rate
            || self.channels != channels
    }

    /// Frames staged but not yet converted.
    pub fn pending_frames(&self) -> usize {
        self.staging.first().map_or(0, Vec::len)
    }

    /// Convert interleaved input frames, returning interleaved output at
    /// the target rate. Output covers only whole converter chunks; up to
    /// one chunk of input stays staged for the next call.
    pub fn resample(&mut self, input: &[f32]) -> Vec<f32> {
        if self.converter.is_none() {
            return input.to_vec();
        }

        let nch = self.channels as usize;
        let in_frames = input.len() / nch;

        // Keep staging bounded even if the converter stalls on errors.
        if self.pending_frames() + in_frames > MAX_STAGING_FRAMES {
            log::warn!(
                "resampler staging overflow ({} + {in_frames} frames); dropping staged input",
                self.pending_frames()
            );
            for ch in &mut self.staging {
                ch.clear();
            }
        }

        for frame in 0..in_frames {
            for ch in 0..nch {
                self.staging[ch].push(input[frame * nch + ch]);
            }
        }

        let mut output = Vec::new();

        loop {
            let need = match self.converter.as_ref() {
                Some(c) => c.input_frames_next(),
                None => break,
            };
            if self.pending_frames() < need {
                break;
            }

            let chunk: Vec<Vec<f32>> = self
                .staging
                .iter_mut()
                .map(|ch| ch.drain(..need).collect())
                .collect();

            match self.converter.as_mut().unwrap().process(&chunk) {
                Ok(converted) => {
                    let out_frames = converted.first().map_or(0, Vec::len);
                    output.reserve(out_frames * nch);
                    for frame in 0..out_frames {
                        for ch in converted.iter() {
                            output.push(ch[frame]);
                        }
                    }
                }
                Err(e) => {
                    log::warn!("resampler chunk failed: {e}; passing chunk through");
                    output.reserve(need * nch);
                    for frame in 0..need {
                        for ch in chunk.iter() {
                            output.push(ch[frame]);
                        }
                    }
                }
            }
        }
        output
    }

    /// Drop staged input (seek/reset path).
    pub fn reset(&mut self) {
        for ch in &mut self.staging {
            ch.clear();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bypass_when_rates_match() {
        let mut src = SrcAdapter::new(48_000, 48_000, 2, SrcQuality::Medium);
        let input = [0.1f32, 0.2, 0.3, 0.4];
        assert_eq!(src.resample(&input), input.to_vec());
        assert_eq!(src.pending_frames(), 0);
    }

    #[test]
    fn disabled_tier_bypasses_even_with_rate_mismatch() {
        let mut src = SrcAdapter::new(44_100, 48_000, 2, SrcQuality::Disabled);
        let input = [0.5f32; 8];
        assert_eq!(src.resample(&input), input.to_vec());
    }

    #[test]
    fn partial_chunk_stays_staged() {
        let mut src = SrcAdapter::new(44_100, 48_000, 2, SrcQuality::Low);
        let input = vec![0.0f32; 200]; // 100 frames, below chunk size
        assert!(src.resample(&input).is_empty());
        assert_eq!(src.pending_frames(), 100);
    }

    #[test]
    fn downsample_halves_frame_count() {
        let mut src = SrcAdapter::new(48_000, 24_000, 2, SrcQuality::Low);
        // Four full chunks of a slow ramp.
        let frames = CHUNK_FRAMES * 4;
        let mut input = Vec::with_capacity(frames * 2);
        for i in 0..frames {
            let v = (i as f32 / frames as f32) - 0.5;
            input.push(v);
            input.push(-v);
        }

        let out = src.resample(&input);
        let out_frames = out.len() / 2;
        let expected = frames / 2;
        assert!(
            (out_frames as i64 - expected as i64).unsigned_abs() < CHUNK_FRAMES as u64,
            "got {out_frames} frames, expected about {expected}"
        );
    }

    #[test]
    fn rebuild_key_detects_changes() {
        let src = SrcAdapter::new(44_100, 48_000, 2, SrcQuality::Medium);
        assert!(!src.needs_rebuild(44_100, 48_000, 2));
        assert!(src.needs_rebuild(48_000, 48_000, 2));
        assert!(src.needs_rebuild(44_100, 48_000, 6));
    }

    #[test]
    fn reset_drops_staged_input() {
        let mut src = SrcAdapter::new(44_100, 48_000, 2, SrcQuality::Low);
        src.resample(&vec![0.0f32; 64]);
        assert!(src.pending_frames() > 0);
        src.reset();
        assert_eq!(src.pending_frames(), 0);
    }
}
