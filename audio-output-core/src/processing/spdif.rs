//! IEC 61937 burst framing for compressed-audio passthrough.
//!
//! Each compressed frame becomes a burst: an 8-byte preamble
//! (Pa=0xF872, Pb=0x4E1F, Pc=data type, Pd=payload length), the payload
//! swapped into 16-bit big-endian words, and zero padding out to the
//! codec's repetition period so the burst occupies exactly the span of
//! the frames it encodes at the S/PDIF frame rate.
//!
//! A block that fails validation (bad sync word, payload too large for
//! any burst period) is skipped; the next valid block resynchronizes
//! the stream.

use crate::models::capabilities::OutputCapabilities;
use crate::models::codec::AudioCodec;
use crate::models::error::OutputError;

const PA: u16 = 0xF872;
const PB: u16 = 0x4E1F;

/// AC-3 burst period: 1536 frames of 16-bit stereo.
const AC3_BURST: usize = 6_144;
/// E-AC-3 burst period: 6144 frames (carried at 4x data rate).
const EAC3_BURST: usize = 24_576;
/// DTS burst periods for 512/1024/2048-sample frames.
const DTS_BURSTS: [usize; 3] = [2_048, 4_096, 8_192];

/// Whether a stream can be forwarded undecoded to the device.
///
/// Consults the negotiated capability flag and the codec whitelist.
/// Extension profiles (e.g., DTS-HD) need more bandwidth than plain
/// S/PDIF carries, so only profile 0 qualifies.
pub fn can_passthrough(
    sample_rate: u32,
    channels: u16,
    codec: AudioCodec,
    codec_profile: i32,
    caps: &OutputCapabilities,
) -> bool {
    caps.passthrough
        && codec.iec61937_data_type().is_some()
        && codec_profile == 0
        && channels <= 6
        && matches!(sample_rate, 32_000 | 44_100 | 48_000)
}

pub struct SpdifFramer {
    codec: AudioCodec,
    frames_skipped: u64,
}

impl SpdifFramer {
    pub fn new(codec: AudioCodec) -> Result<Self, OutputError> {
        if codec.iec61937_data_type().is_none() {
            return Err(OutputError::UnsupportedPassthrough(format!(
                "{codec} cannot be framed for S/PDIF"
            )));
        }
        Ok(Self {
            codec,
            frames_skipped: 0,
        })
    }

    pub fn codec(&self) -> AudioCodec {
        self.codec
    }

    pub fn frames_skipped(&self) -> u64 {
        self.frames_skipped
    }

    /// Burst size in bytes for a payload, if one fits.
    fn burst_size(&self, payload_len: usize) -> Option<usize> {
        let needed = payload_len + 8;
        match self.codec {
            AudioCodec::Ac3 => (needed <= AC3_BURST).then_some(AC3_BURST),
            AudioCodec::Eac3 => (needed <= EAC3_BURST).then_some(EAC3_BURST),
            AudioCodec::Dts => DTS_BURSTS.iter().copied().find(|&b| needed <= b),
            _ => None,
        }
    }

    fn sync_ok(&self, payload: &[u8]) -> bool {
        match self.codec {
            AudioCodec::Ac3 | AudioCodec::Eac3 => payload.starts_with(&[0x0B, 0x77]),
            AudioCodec::Dts => payload.starts_with(&[0x7F, 0xFE, 0x80, 0x01]),
            _ => false,
        }
    }

    /// Frame one compressed block into an IEC 61937 burst.
    ///
    /// Returns `None` for malformed input; the caller drops the block
    /// and continues with the next one.
    pub fn frame(&mut self, payload: &[u8]) -> Option<Vec<u8>> {
        if payload.is_empty() || !self.sync_ok(payload) {
            self.frames_skipped += 1;
            log::warn!(
                "skipping malformed {} block ({} bytes, bad sync)",
                self.codec,
                payload.len()
            );
            return None;
        }
        let Some(burst_len) = self.burst_size(payload.len()) else {
            self.frames_skipped += 1;
            log::warn!(
                "skipping oversize {} block ({} bytes)",
                self.codec,
                payload.len()
            );
            return None;
        };

        let data_type = match self.codec {
            // DTS data type tracks the burst period (11/12/13).
            AudioCodec::Dts => {
                let idx = DTS_BURSTS.iter().position(|&b| b == burst_len).unwrap();
                11 + idx as u16
            }
            c => c.iec61937_data_type().unwrap(),
        };

        // Pd: length in bits, except E-AC-3 which counts bytes.
        let pd = match self.codec {
            AudioCodec::Eac3 => payload.len() as u16,
            _ => (payload.len() * 8) as u16,
        };

        let mut burst = Vec::with_capacity(burst_len);
        burst.extend_from_slice(&PA.to_le_bytes());
        burst.extend_from_slice(&PB.to_le_bytes());
        burst.extend_from_slice(&data_type.to_le_bytes());
        burst.extend_from_slice(&pd.to_le_bytes());

        // Payload as big-endian 16-bit words on the little-endian bus.
        for pair in payload.chunks(2) {
            burst.push(*pair.get(1).unwrap_or(&0));
            burst.push(pair[0]);
        }
        burst.resize(burst_len, 0);
        Some(burst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::format::AudioFormat;

    fn passthrough_caps() -> OutputCapabilities {
        OutputCapabilities {
            sample_rates: vec![44_100, 48_000],
            formats: vec![AudioFormat::S16],
            channels: vec![2, 6],
            passthrough: true,
        }
    }

    fn ac3_block(len: usize) -> Vec<u8> {
        let mut b = vec![0u8; len];
        b[0] = 0x0B;
        b[1] = 0x77;
        b
    }

    #[test]
    fn ac3_burst_layout() {
        let mut framer = SpdifFramer::new(AudioCodec::Ac3).unwrap();
        let burst = framer.frame(&ac3_block(1536)).unwrap();

        assert_eq!(burst.len(), AC3_BURST);
        assert_eq!(u16::from_le_bytes([burst[0], burst[1]]), 0xF872);
        assert_eq!(u16::from_le_bytes([burst[2], burst[3]]), 0x4E1F);
        assert_eq!(u16::from_le_bytes([burst[4], burst[5]]), 1); // AC-3 data type
        assert_eq!(u16::from_le_bytes([burst[6], burst[7]]), 1536 * 8); // bits

        // Payload is byte-swapped: sync word 0x0B77 arrives as 77 0B.
        assert_eq!(&burst[8..10], &[0x77, 0x0B]);
        // Tail is zero padding.
        assert!(burst[8 + 1536..].iter().all(|&b| b == 0));
    }

    #[test]
    fn dts_selects_burst_by_frame_size() {
        let mut framer = SpdifFramer::new(AudioCodec::Dts).unwrap();
        let mut block = vec![0u8; 1000];
        block[..4].copy_from_slice(&[0x7F, 0xFE, 0x80, 0x01]);

        let burst = framer.frame(&block).unwrap();
        assert_eq!(burst.len(), 2_048);
        assert_eq!(u16::from_le_bytes([burst[4], burst[5]]), 11);

        let mut big = vec![0u8; 3000];
        big[..4].copy_from_slice(&[0x7F, 0xFE, 0x80, 0x01]);
        let burst = framer.frame(&big).unwrap();
        assert_eq!(burst.len(), 4_096);
        assert_eq!(u16::from_le_bytes([burst[4], burst[5]]), 12);
    }

    #[test]
    fn malformed_block_skipped_then_recovers() {
        let mut framer = SpdifFramer::new(AudioCodec::Ac3).unwrap();
        assert!(framer.frame(&[0xDE, 0xAD, 0xBE, 0xEF]).is_none());
        assert_eq!(framer.frames_skipped(), 1);

        // Next valid block frames normally.
        assert!(framer.frame(&ac3_block(512)).is_some());
        assert_eq!(framer.frames_skipped(), 1);
    }

    #[test]
    fn oversize_block_skipped() {
        let mut framer = SpdifFramer::new(AudioCodec::Ac3).unwrap();
        assert!(framer.frame(&ac3_block(AC3_BURST)).is_none());
    }

    #[test]
    fn rejects_unframeable_codec() {
        assert!(SpdifFramer::new(AudioCodec::Aac).is_err());
        assert!(SpdifFramer::new(AudioCodec::Pcm).is_err());
    }

    #[test]
    fn passthrough_gate() {
        let caps = passthrough_caps();
        assert!(can_passthrough(48_000, 6, AudioCodec::Ac3, 0, &caps));
        assert!(can_passthrough(44_100, 2, AudioCodec::Dts, 0, &caps));

        // Extension profile, unsupported codec, odd rate, no device flag.
        assert!(!can_passthrough(48_000, 6, AudioCodec::Dts, 1, &caps));
        assert!(!can_passthrough(48_000, 2, AudioCodec::Aac, 0, &caps));
        assert!(!can_passthrough(96_000, 6, AudioCodec::Ac3, 0, &caps));
        let mut no_pt = caps;
        no_pt.passthrough = false;
        assert!(!can_passthrough(48_000, 6, AudioCodec::Ac3, 0, &no_pt));
    }
}
