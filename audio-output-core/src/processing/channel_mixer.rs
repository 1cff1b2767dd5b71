//! Stateless downmix of multichannel PCM to stereo or 5.1.
//!
//! Gains are power-conserving: center and merged channels enter at
//! -3 dB (1/sqrt(2)), surrounds fold to stereo through a passive
//! matrix (sqrt(2/3) same side, -sqrt(1/3) opposite side) so they stay
//! separable by a matrix decoder downstream.
//!
//! Upmixing is not handled here; synthesizing channels is the job of
//! the stateful [`SurroundUpmixer`](super::upmixer::SurroundUpmixer).

use thiserror::Error;

#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum MixError {
    #[error("unsupported downmix target: {0} channels (only 2 and 6)")]
    UnsupportedTarget(u16),

    #[error("cannot downmix {channels_in} channels to {channels_out}")]
    TooFewInputs { channels_in: u16, channels_out: u16 },

    #[error("no downmix matrix for {channels_in} -> {channels_out} channels")]
    NoMatrix { channels_in: u16, channels_out: u16 },

    #[error("buffer too short for requested frame count")]
    ShortBuffer,
}

const MINUS_3DB: f32 = std::f32::consts::FRAC_1_SQRT_2;
const MINUS_6DB: f32 = 0.5;
/// Same-side surround fold-down gain, sqrt(2/3).
const SURROUND_MAIN: f32 = 0.816_496_6;
/// Opposite-side surround fold-down gain, -sqrt(1/3).
const SURROUND_CROSS: f32 = -0.577_350_3;

/// Canonical SMPTE channel positions used by the matrix tables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Position {
    Left,
    Right,
    Center,
    Lfe,
    SurroundLeft,
    SurroundRight,
    BackLeft,
    BackRight,
    BackCenter,
}

use Position::*;

/// Interleaved channel order delivered by decoders, per input count.
fn layout(channels_in: u16) -> Option<&'static [Position]> {
    match channels_in {
        2 => Some(&[Left, Right]),
        3 => Some(&[Left, Right, Center]),
        4 => Some(&[Left, Right, SurroundLeft, SurroundRight]),
        5 => Some(&[Left, Right, Center, SurroundLeft, SurroundRight]),
        6 => Some(&[Left, Right, Center, Lfe, SurroundLeft, SurroundRight]),
        7 => Some(&[Left, Right, Center, Lfe, SurroundLeft, SurroundRight, BackCenter]),
        8 => Some(&[
            Left,
            Right,
            Center,
            Lfe,
            SurroundLeft,
            SurroundRight,
            BackLeft,
            BackRight,
        ]),
        _ => None,
    }
}

/// Stereo fold-down gains (left, right) for one input position.
fn stereo_gains(pos: Position) -> [f32; 2] {
    match pos {
        Left => [1.0, 0.0],
        Right => [0.0, 1.0],
        Center => [MINUS_3DB, MINUS_3DB],
        // LFE is discarded on stereo outputs.
        Lfe => [0.0, 0.0],
        SurroundLeft => [SURROUND_MAIN, SURROUND_CROSS],
        SurroundRight => [SURROUND_CROSS, SURROUND_MAIN],
        // Back pair sits -3 dB below the side pair.
        BackLeft => [SURROUND_MAIN * MINUS_3DB, SURROUND_CROSS * MINUS_3DB],
        BackRight => [SURROUND_CROSS * MINUS_3DB, SURROUND_MAIN * MINUS_3DB],
        BackCenter => [MINUS_6DB, MINUS_6DB],
    }
}

/// 5.1 fold-down gains (L, R, C, LFE, Ls, Rs) for one input position.
///
/// Extra back channels merge into the nearest surround slot at -3 dB.
fn s51_gains(pos: Position) -> [f32; 6] {
    let mut g = [0.0f32; 6];
    match pos {
        Left => g[0] = 1.0,
        Right => g[1] = 1.0,
        Center => g[2] = 1.0,
        Lfe => g[3] = 1.0,
        SurroundLeft => g[4] = 1.0,
        SurroundRight => g[5] = 1.0,
        BackLeft => g[4] = MINUS_3DB,
        BackRight => g[5] = MINUS_3DB,
        BackCenter => {
            g[4] = MINUS_3DB;
            g[5] = MINUS_3DB;
        }
    }
    g
}

/// Downmix `frames` interleaved f32 frames from `src` (`channels_in`
/// wide) into `dest` (`channels_out` wide). Returns the frames written.
///
/// Only 2- and 6-channel targets exist; a target equal to the source
/// count is a straight copy. Channel counts outside the matrix tables
/// are rejected rather than indexed.
pub fn downmix_frames(
    channels_in: u16,
    channels_out: u16,
    dest: &mut [f32],
    src: &[f32],
    frames: usize,
) -> Result<usize, MixError> {
    if channels_out != 2 && channels_out != 6 {
        return Err(MixError::UnsupportedTarget(channels_out));
    }
    if channels_out > channels_in {
        return Err(MixError::TooFewInputs {
            channels_in,
            channels_out,
        });
    }
    let cin = channels_in as usize;
    let cout = channels_out as usize;
    if src.len() < frames * cin || dest.len() < frames * cout {
        return Err(MixError::ShortBuffer);
    }

    if channels_in == channels_out {
        dest[..frames * cout].copy_from_slice(&src[..frames * cin]);
        return Ok(frames);
    }

    let positions = layout(channels_in).ok_or(MixError::NoMatrix {
        channels_in,
        channels_out,
    })?;
    // The 5.1 tables only cover 6.1 and 7.1 sources.
    if channels_out == 6 && !(7..=8).contains(&channels_in) {
        return Err(MixError::NoMatrix {
            channels_in,
            channels_out,
        });
    }

    for frame in 0..frames {
        let input = &src[frame * cin..frame * cin + cin];
        let output = &mut dest[frame * cout..frame * cout + cout];
        output.fill(0.0);

        for (sample, &pos) in input.iter().zip(positions) {
            if channels_out == 2 {
                let g = stereo_gains(pos);
                output[0] += sample * g[0];
                output[1] += sample * g[1];
            } else {
                let g = s51_gains(pos);
                for (o, gain) in output.iter_mut().zip(g) {
                    *o += sample * gain;
                }
            }
        }
    }
    Ok(frames)
}
