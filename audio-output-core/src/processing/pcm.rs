//! PCM sample conversion between wire formats and normalized f32,
//! plus software volume scaling and silence generation.
//!
//! The producer path works internally in f32; these helpers sit at the
//! boundaries: decoding incoming bytes before processing and packing
//! processed samples into the negotiated device format.

use crate::models::format::AudioFormat;

const S24_SCALE: f32 = 8_388_608.0; // 2^23
const S32_SCALE: f32 = 2_147_483_648.0; // 2^31

/// Decode interleaved PCM bytes into normalized f32 samples.
///
/// `data.len()` must be a multiple of the format's sample size; any
/// trailing partial sample is ignored.
pub fn to_float(format: AudioFormat, data: &[u8]) -> Vec<f32> {
    let size = format.sample_size();
    let count = data.len() / size;
    let mut out = Vec::with_capacity(count);

    match format {
        AudioFormat::U8 => {
            for &b in &data[..count] {
                out.push((b as f32 - 128.0) / 128.0);
            }
        }
        AudioFormat::S16 => {
            for chunk in data.chunks_exact(2).take(count) {
                let v = i16::from_le_bytes([chunk[0], chunk[1]]);
                out.push(v as f32 / 32_768.0);
            }
        }
        AudioFormat::S24 => {
            for chunk in data.chunks_exact(4).take(count) {
                let v = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                out.push((v >> 8) as f32 / S24_SCALE);
            }
        }
        AudioFormat::S32 => {
            for chunk in data.chunks_exact(4).take(count) {
                let v = i32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                out.push(v as f32 / S32_SCALE);
            }
        }
        AudioFormat::F32 => {
            for chunk in data.chunks_exact(4).take(count) {
                out.push(f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]));
            }
        }
    }
    out
}

/// Pack normalized f32 samples into interleaved PCM bytes.
///
/// Out-of-range samples are clamped, not wrapped.
pub fn from_float(format: AudioFormat, samples: &[f32]) -> Vec<u8> {
    let mut out = Vec::with_capacity(samples.len() * format.sample_size());

    for &sample in samples {
        let s = sample.clamp(-1.0, 1.0);
        match format {
            AudioFormat::U8 => {
                out.push((s * 127.0 + 128.0) as u8);
            }
            AudioFormat::S16 => {
                let v = (s * i16::MAX as f32) as i16;
                out.extend_from_slice(&v.to_le_bytes());
            }
            AudioFormat::S24 => {
                let v = ((s * (S24_SCALE - 1.0)) as i32) << 8;
                out.extend_from_slice(&v.to_le_bytes());
            }
            AudioFormat::S32 => {
                let v = (s as f64 * (S32_SCALE as f64 - 1.0)) as i32;
                out.extend_from_slice(&v.to_le_bytes());
            }
            AudioFormat::F32 => {
                out.extend_from_slice(&s.to_le_bytes());
            }
        }
    }
    out
}

/// Scale samples in place by the gain for a 0-100 volume setting.
///
/// The control is perceptual: gain = (volume/100)^2, so half volume is
/// roughly -12 dB rather than -6 dB.
pub fn apply_volume(samples: &mut [f32], volume: u8) {
    let gain = volume_gain(volume);
    if (gain - 1.0).abs() < f32::EPSILON {
        return;
    }
    for s in samples.iter_mut() {
        *s *= gain;
    }
}

pub fn volume_gain(volume: u8) -> f32 {
    let v = volume.min(100) as f32 / 100.0;
    v * v
}

/// The byte value representing silence for a format (only U8 is biased).
pub fn silence_byte(format: AudioFormat) -> u8 {
    match format {
        AudioFormat::U8 => 0x80,
        _ => 0,
    }
}
