//! Audio clock bookkeeping for A/V synchronization.
//!
//! Pure arithmetic over byte counts; the engine guards an instance with
//! the same lock as the ring-buffer cursors and layers the reset
//! generation token on top (see `OutputEngine`).
//!
//! The model: `reference_us` is the media timecode of the most recently
//! queued sample (the write head). The media position currently being
//! heard is that reference minus the media duration of everything still
//! buffered — ring occupancy plus whatever the device reports as
//! written-but-unplayed. One buffered output frame spans `1/rate`
//! seconds of wall time and `stretch/rate` seconds of media time.

use std::time::Duration;

#[derive(Debug, Clone)]
pub struct AudioClock {
    /// Media timecode (µs) at the ring's write head.
    reference_us: i64,
    /// Frames the device side has consumed since the reference was set.
    frames_consumed: u64,
    /// Effective output rate in Hz (see `set_eff_dsp`).
    eff_rate: u32,
    /// Playback speed; buffered audio covers `stretch` media-seconds
    /// per wall-second.
    stretch: f64,
    bytes_per_frame: usize,
    /// Buffered bytes are a compressed bitstream, not PCM frames.
    compressed: bool,
    /// Source bitrate in bits/s; with `compressed` set, buffered
    /// duration is estimated from bits instead of frame accounting.
    bitrate: u32,
}

impl AudioClock {
    pub fn new(eff_rate: u32, bytes_per_frame: usize) -> Self {
        Self {
            reference_us: 0,
            frames_consumed: 0,
            eff_rate: eff_rate.max(1),
            stretch: 1.0,
            bytes_per_frame: bytes_per_frame.max(1),
            compressed: false,
            bitrate: 0,
        }
    }

    pub fn set_compressed(&mut self, compressed: bool) {
        self.compressed = compressed;
    }

    pub fn set_eff_dsp(&mut self, rate: u32) {
        self.eff_rate = rate.max(1);
    }

    pub fn set_stretch(&mut self, stretch: f64) {
        self.stretch = stretch;
    }

    pub fn set_bytes_per_frame(&mut self, bytes_per_frame: usize) {
        self.bytes_per_frame = bytes_per_frame.max(1);
    }

    pub fn set_bitrate(&mut self, bits_per_sec: u32) {
        self.bitrate = bits_per_sec;
    }

    /// Hard-set the reference (seek / first chunk after reset).
    pub fn set_timecode(&mut self, timecode_us: i64) {
        self.reference_us = timecode_us;
        self.frames_consumed = 0;
    }

    pub fn reference(&self) -> i64 {
        self.reference_us
    }

    /// Advance the reference for `frames` source frames queued at
    /// `source_rate`. A chunk always spans `frames / source_rate` of
    /// media time, independent of stretch.
    pub fn frames_queued(&mut self, frames: usize, source_rate: u32) {
        self.reference_us += frames as i64 * 1_000_000 / source_rate.max(1) as i64;
    }

    /// Consumer-side resync: `timecode_us` was presented after
    /// `frames_consumed` further frames left the device.
    pub fn set_audiotime(&mut self, frames_consumed: u64, timecode_us: i64) {
        self.frames_consumed = frames_consumed;
        self.reference_us =
            timecode_us + self.media_us(frames_consumed as usize * self.bytes_per_frame);
    }

    /// Media duration (µs) represented by `bytes` of buffered output.
    fn media_us(&self, bytes: usize) -> i64 {
        let frames = bytes / self.bytes_per_frame;
        (frames as f64 / self.eff_rate as f64 * self.stretch * 1e6) as i64
    }

    /// Current presented media timecode in µs.
    pub fn audiotime(&self, ring_bytes: usize, soundcard_bytes: usize) -> i64 {
        if self.compressed && self.bitrate > 0 {
            // Bitrate estimate for compressed buffers.
            let bits = (ring_bytes + soundcard_bytes) as i64 * 8;
            self.reference_us - bits * 1_000_000 / self.bitrate as i64
        } else {
            self.reference_us - self.media_us(ring_bytes + soundcard_bytes)
        }
    }

    /// Total buffered wall-clock duration.
    pub fn buffered_time(&self, ring_bytes: usize, soundcard_bytes: usize) -> Duration {
        let frames = (ring_bytes + soundcard_bytes) / self.bytes_per_frame;
        Duration::from_secs_f64(frames as f64 / self.eff_rate as f64)
    }
}
