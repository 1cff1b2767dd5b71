use serde::{Deserialize, Serialize};

use super::codec::AudioCodec;
use super::format::AudioFormat;

/// Immutable configuration snapshot consumed by `OutputEngine::reconfigure`.
///
/// Describes what the decoder is about to deliver; the engine negotiates
/// the actual device format against the backend's capabilities.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AudioSettings {
    /// Primary PCM device identifier (backend-specific string).
    pub main_device: String,

    /// Device used for compressed passthrough, if different.
    pub passthrough_device: String,

    /// Source channel count (1–8).
    pub channels: u16,

    /// Source sample rate in Hz.
    pub sample_rate: u32,

    /// Source sample encoding.
    pub format: AudioFormat,

    /// Source codec; `Pcm` unless the caller wants passthrough.
    pub codec: AudioCodec,

    /// Codec profile/extension id (e.g., DTS-HD vs core), `0` if none.
    pub codec_profile: i32,

    /// Request compressed passthrough when the device supports it.
    pub use_passthrough: bool,

    /// Open the device during `reconfigure` rather than on first write.
    pub open_on_init: bool,
}

impl AudioSettings {
    pub fn validate(&self) -> Result<(), String> {
        if self.sample_rate == 0 {
            return Err("sample rate must be positive".into());
        }
        if self.channels == 0 || self.channels > 8 {
            return Err(format!("unsupported channel count: {}", self.channels));
        }
        if self.use_passthrough && self.codec == AudioCodec::Pcm {
            return Err("passthrough requested for PCM source".into());
        }
        Ok(())
    }
}

impl Default for AudioSettings {
    fn default() -> Self {
        Self {
            main_device: "default".into(),
            passthrough_device: String::new(),
            channels: 2,
            sample_rate: 48_000,
            format: AudioFormat::S16,
            codec: AudioCodec::Pcm,
            codec_profile: 0,
            use_passthrough: false,
            open_on_init: true,
        }
    }
}

/// User preference filter applied on top of driver-reported capabilities.
///
/// Produces the "user-cleaned" capability set: what the user allows the
/// engine to negotiate, regardless of what the hardware could do.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutputPreferences {
    /// Cap on negotiated output channels (2 = force stereo).
    pub max_channels: u16,

    /// Allow compressed passthrough at all.
    pub allow_passthrough: bool,

    /// Synthesize 5.1 from stereo sources when the device has the channels.
    pub upmix_stereo: bool,
}

impl Default for OutputPreferences {
    fn default() -> Self {
        Self {
            max_channels: 8,
            allow_passthrough: true,
            upmix_stereo: false,
        }
    }
}
