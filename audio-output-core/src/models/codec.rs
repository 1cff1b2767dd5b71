use serde::{Deserialize, Serialize};

/// Source audio codec, as reported by the decoder.
///
/// `Pcm` means already-decoded samples; everything else is a compressed
/// bitstream that may be eligible for passthrough framing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioCodec {
    Pcm,
    Ac3,
    Eac3,
    Dts,
    TrueHd,
    Aac,
}

impl AudioCodec {
    /// IEC 61937 burst data-type code (Pc field), if the codec has one.
    ///
    /// DTS uses 11/12/13 depending on frame length; 11 covers the
    /// 512-sample base frame and the framer adjusts for longer frames.
    pub fn iec61937_data_type(self) -> Option<u16> {
        match self {
            Self::Ac3 => Some(1),
            Self::Dts => Some(11),
            Self::Eac3 => Some(21),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Pcm => "PCM",
            Self::Ac3 => "AC-3",
            Self::Eac3 => "E-AC-3",
            Self::Dts => "DTS",
            Self::TrueHd => "TrueHD",
            Self::Aac => "AAC",
        }
    }
}

impl std::fmt::Display for AudioCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}
