use serde::{Deserialize, Serialize};

/// PCM sample encoding.
///
/// Each variant carries a fixed container width; `S24` rides in a
/// 32-bit container with the low byte zero, which is how most drivers
/// expect it on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AudioFormat {
    /// 8-bit unsigned.
    U8,
    /// 16-bit signed little-endian.
    S16,
    /// 24-bit signed in a 32-bit container.
    S24,
    /// 32-bit signed.
    S32,
    /// 32-bit float, nominal range [-1.0, 1.0].
    F32,
}

impl AudioFormat {
    /// Container size of one sample in bytes.
    pub fn sample_size(self) -> usize {
        match self {
            Self::U8 => 1,
            Self::S16 => 2,
            Self::S24 | Self::S32 | Self::F32 => 4,
        }
    }

    /// Significant bits per sample.
    pub fn bits(self) -> u32 {
        match self {
            Self::U8 => 8,
            Self::S16 => 16,
            Self::S24 => 24,
            Self::S32 | Self::F32 => 32,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::U8 => "U8",
            Self::S16 => "S16",
            Self::S24 => "S24",
            Self::S32 => "S32",
            Self::F32 => "F32",
        }
    }
}

impl std::fmt::Display for AudioFormat {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sample_sizes() {
        assert_eq!(AudioFormat::U8.sample_size(), 1);
        assert_eq!(AudioFormat::S16.sample_size(), 2);
        assert_eq!(AudioFormat::S24.sample_size(), 4);
        assert_eq!(AudioFormat::S32.sample_size(), 4);
        assert_eq!(AudioFormat::F32.sample_size(), 4);
    }

    #[test]
    fn s24_is_24_significant_bits_in_32() {
        assert_eq!(AudioFormat::S24.bits(), 24);
        assert_eq!(AudioFormat::S24.sample_size(), 4);
    }
}
