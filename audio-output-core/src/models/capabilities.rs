use super::format::AudioFormat;
use super::settings::OutputPreferences;

/// Negotiated output device capabilities.
///
/// Two variants circulate: the raw driver-reported set (from
/// `DeviceBackend::output_settings`) and the user-cleaned set produced
/// by [`OutputCapabilities::cleaned_with`].
#[derive(Debug, Clone, PartialEq)]
pub struct OutputCapabilities {
    /// Supported sample rates in Hz, ascending.
    pub sample_rates: Vec<u32>,

    /// Supported sample encodings.
    pub formats: Vec<AudioFormat>,

    /// Supported channel counts, ascending.
    pub channels: Vec<u16>,

    /// Device accepts IEC 61937 compressed bursts.
    pub passthrough: bool,
}

impl OutputCapabilities {
    /// A conservative set every PCM device can do.
    pub fn stereo_pcm_fallback() -> Self {
        Self {
            sample_rates: vec![48_000],
            formats: vec![AudioFormat::S16],
            channels: vec![2],
            passthrough: false,
        }
    }

    pub fn supports_rate(&self, rate: u32) -> bool {
        self.sample_rates.contains(&rate)
    }

    pub fn supports_format(&self, format: AudioFormat) -> bool {
        self.formats.contains(&format)
    }

    pub fn supports_channels(&self, channels: u16) -> bool {
        self.channels.contains(&channels)
    }

    pub fn max_channels(&self) -> u16 {
        self.channels.iter().copied().max().unwrap_or(2)
    }

    /// Closest supported rate to `target`: exact match, else the lowest
    /// supported rate above it, else the highest available.
    pub fn best_rate(&self, target: u32) -> u32 {
        if self.supports_rate(target) {
            return target;
        }
        self.sample_rates
            .iter()
            .copied()
            .filter(|&r| r > target)
            .min()
            .or_else(|| self.sample_rates.iter().copied().max())
            .unwrap_or(48_000)
    }

    /// Widest supported format that does not lose precision versus
    /// `source`, else the widest available.
    pub fn best_format(&self, source: AudioFormat) -> AudioFormat {
        if self.supports_format(source) {
            return source;
        }
        self.formats
            .iter()
            .copied()
            .filter(|f| f.bits() >= source.bits())
            .min_by_key(|f| f.bits())
            .or_else(|| self.formats.iter().copied().max_by_key(|f| f.bits()))
            .unwrap_or(AudioFormat::S16)
    }

    /// Apply user preferences, producing the "user-cleaned" set.
    pub fn cleaned_with(&self, prefs: &OutputPreferences) -> Self {
        let channels: Vec<u16> = self
            .channels
            .iter()
            .copied()
            .filter(|&c| c <= prefs.max_channels)
            .collect();
        Self {
            sample_rates: self.sample_rates.clone(),
            formats: self.formats.clone(),
            channels: if channels.is_empty() { vec![2] } else { channels },
            passthrough: self.passthrough && prefs.allow_passthrough,
        }
    }
}
