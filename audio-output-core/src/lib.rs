//! # audio-output-core
//!
//! Platform-agnostic real-time audio output pipeline.
//!
//! Provides buffering, channel mixing, sample-rate conversion, time
//! stretching, IEC 61937 passthrough framing, and A/V clock accounting.
//! Platform-specific backends (ALSA, PulseAudio, WASAPI, ...) implement
//! the `DeviceBackend` trait and plug into the generic `OutputEngine`.
//!
//! ## Architecture
//!
//! ```text
//! audio-output-core (this crate)
//! ├── traits/       ← DeviceBackend, BackendFactory, BackendRegistry
//! ├── models/       ← OutputError, OutputState, AudioSettings, OutputCapabilities, etc.
//! ├── processing/   ← AudioRingBuffer, channel mixer/upmixer, SRC, stretch, S/PDIF framing
//! └── engine/       ← OutputEngine (generic orchestrator), AudioClock
//! ```

pub mod engine;
pub mod models;
pub mod processing;
pub mod traits;

// Re-export key types at crate root for convenience.
pub use engine::clock::AudioClock;
pub use engine::output::OutputEngine;
pub use models::capabilities::OutputCapabilities;
pub use models::codec::AudioCodec;
pub use models::error::OutputError;
pub use models::format::AudioFormat;
pub use models::settings::{AudioSettings, OutputPreferences};
pub use models::state::OutputState;
pub use processing::resampler::SrcQuality;
pub use processing::ring_buffer::AudioRingBuffer;
pub use traits::backend_factory::{BackendFactory, BackendRegistry};
pub use traits::device_backend::DeviceBackend;
