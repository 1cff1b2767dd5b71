pub mod channel_mixer;
pub mod pcm;
pub mod resampler;
pub mod ring_buffer;
pub mod spdif;
pub mod stretcher;
pub mod upmixer;
