use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::models::capabilities::OutputCapabilities;
use crate::models::codec::AudioCodec;
use crate::models::error::OutputError;
use crate::models::format::AudioFormat;
use crate::models::settings::{AudioSettings, OutputPreferences};
use crate::models::state::OutputState;
use crate::processing::channel_mixer;
use crate::processing::pcm;
use crate::processing::resampler::{SrcAdapter, SrcQuality};
use crate::processing::ring_buffer::{AudioRingBuffer, DEFAULT_RING_CAPACITY};
use crate::processing::spdif::{self, SpdifFramer};
use crate::processing::stretcher::{TimeStretcher, STRETCH_EPSILON};
use crate::processing::upmixer::SurroundUpmixer;
use crate::traits::device_backend::DeviceBackend;

use super::clock::AudioClock;

/// Output thread sleep while paused or starved, and drain poll step.
const IDLE_SLEEP: Duration = Duration::from_millis(5);
/// Upper bound on `pause_until_buffered`.
const PRIME_TIMEOUT: Duration = Duration::from_secs(5);
/// Slack added to the buffered duration when computing drain deadlines.
const DRAIN_MARGIN: Duration = Duration::from_secs(1);

/// State guarded by the coarse buffer lock: ring cursors, clock
/// reference and the negotiated output geometry they are computed from.
struct Shared {
    ring: AudioRingBuffer,
    clock: AudioClock,
    state: OutputState,
    paused: bool,
    sw_volume: u8,
    last_audiotime_us: i64,
    output_rate: u32,
    output_bytes_per_frame: usize,
    /// Bytes handed to the backend per write.
    fragment_bytes: usize,
    silence: u8,
}

impl Shared {
    fn new(ring_capacity: usize) -> Self {
        Self {
            ring: AudioRingBuffer::new(ring_capacity),
            clock: AudioClock::new(48_000, 4),
            state: OutputState::Idle,
            paused: false,
            sw_volume: 100,
            last_audiotime_us: 0,
            output_rate: 48_000,
            output_bytes_per_frame: 4,
            fragment_bytes: 6_400,
            silence: 0,
        }
    }
}

/// Producer-side conversion chain, guarded by the processing lock so a
/// stretch-factor change never lands mid-chunk. Never locked while the
/// buffer lock is held.
struct Processing {
    source_rate: u32,
    source_channels: u16,
    source_format: AudioFormat,
    output_channels: u16,
    output_format: AudioFormat,
    stretch_factor: f64,
    stretcher: Option<TimeStretcher>,
    resampler: Option<SrcAdapter>,
    upmixer: Option<SurroundUpmixer>,
    framer: Option<SpdifFramer>,
    passthrough: bool,
}

impl Processing {
    fn idle() -> Self {
        Self {
            source_rate: 48_000,
            source_channels: 2,
            source_format: AudioFormat::S16,
            output_channels: 2,
            output_format: AudioFormat::S16,
            stretch_factor: 1.0,
            stretcher: None,
            resampler: None,
            upmixer: None,
            framer: None,
            passthrough: false,
        }
    }

    /// Specialized producer copy for active upmix: frames enter the
    /// surround synthesizer and the ring receives whatever it has ready.
    fn copy_with_upmix(&mut self, stereo: &[f32]) -> Vec<f32> {
        let Some(up) = self.upmixer.as_mut() else {
            return stereo.to_vec();
        };
        up.feed(stereo);
        let mut out = vec![0.0f32; up.frames_ready() * 6];
        up.pull(&mut out);
        out
    }

    fn remap_channels(&mut self, samples: Vec<f32>) -> Vec<f32> {
        let cin = self.source_channels;
        let cout = self.output_channels;
        if cin == cout {
            return samples;
        }
        if cin == 1 && cout == 2 {
            let mut out = Vec::with_capacity(samples.len() * 2);
            for s in samples {
                out.push(s);
                out.push(s);
            }
            return out;
        }
        if cin == 2 && cout == 6 {
            return self.copy_with_upmix(&samples);
        }
        let frames = samples.len() / cin as usize;
        let mut out = vec![0.0f32; frames * cout as usize];
        match channel_mixer::downmix_frames(cin, cout, &mut out, &samples, frames) {
            Ok(_) => out,
            Err(e) => {
                // Negotiation keeps this unreachable; emit silence of
                // the right shape rather than malformed frames.
                log::error!("downmix {cin}->{cout} failed: {e}");
                vec![0.0; frames * cout as usize]
            }
        }
    }

    /// Full PCM producer pipeline: decode, stretch, remap, resample,
    /// volume, pack.
    fn process_pcm(&mut self, data: &[u8], volume: u8) -> Vec<u8> {
        let mut samples = pcm::to_float(self.source_format, data);

        if let Some(st) = self.stretcher.as_mut() {
            if st.is_active() {
                samples = st.process(&samples);
            }
        }
        samples = self.remap_channels(samples);
        if let Some(rs) = self.resampler.as_mut() {
            samples = rs.resample(&samples);
        }
        if volume < 100 {
            pcm::apply_volume(&mut samples, volume);
        }
        pcm::from_float(self.output_format, &samples)
    }

    fn reset(&mut self) {
        if let Some(st) = self.stretcher.as_mut() {
            st.reset();
        }
        if let Some(rs) = self.resampler.as_mut() {
            rs.reset();
        }
        if let Some(up) = self.upmixer.as_mut() {
            up.reset();
        }
    }
}

/// Orchestrates the audio output pipeline.
///
/// A producer (decoder) thread feeds `add_frames`/`add_data`; a
/// dedicated output thread drains the ring into the device backend.
/// The player polls the clock surface (`get_audiotime`,
/// `get_audio_buffered_time`) for A/V sync.
///
/// ```text
/// [Decoder] → add_frames ─ stretch → mix/upmix → resample → volume ─┐
///                                                                   ├→ [Ring] → output thread → [DeviceBackend]
/// [Decoder] → add_data ─── IEC 61937 framing (passthrough) ─────────┘
/// ```
///
/// Locking: the buffer lock (`shared`) covers cursors and clock; the
/// processing lock covers the conversion chain; the kill lock covers
/// teardown. They are never nested, and none is held across a backend
/// call.
pub struct OutputEngine {
    backend: Arc<dyn DeviceBackend>,
    prefs: OutputPreferences,

    shared: Arc<Mutex<Shared>>,
    /// Signaled by the producer after each ring write.
    buffered_cond: Arc<Condvar>,
    processing: Arc<Mutex<Processing>>,

    /// Reset generation; clock reads straddling a bump are retried.
    generation: Arc<AtomicU64>,

    // Output thread control.
    output_running: Arc<AtomicBool>,
    output_handle: Option<thread::JoinHandle<()>>,

    // Teardown control, separate from the buffer lock so a kill never
    // waits behind steady-state ring traffic.
    killed: Arc<AtomicBool>,
    kill_lock: Arc<Mutex<()>>,

    src_quality: SrcQuality,
}

impl OutputEngine {
    pub fn new(backend: Arc<dyn DeviceBackend>, prefs: OutputPreferences) -> Self {
        Self::with_capacity(backend, prefs, DEFAULT_RING_CAPACITY)
    }

    /// Ring capacity is tunable per platform/latency target.
    pub fn with_capacity(
        backend: Arc<dyn DeviceBackend>,
        prefs: OutputPreferences,
        ring_capacity: usize,
    ) -> Self {
        Self {
            backend,
            prefs,
            shared: Arc::new(Mutex::new(Shared::new(ring_capacity))),
            buffered_cond: Arc::new(Condvar::new()),
            processing: Arc::new(Mutex::new(Processing::idle())),
            generation: Arc::new(AtomicU64::new(0)),
            output_running: Arc::new(AtomicBool::new(false)),
            output_handle: None,
            killed: Arc::new(AtomicBool::new(false)),
            kill_lock: Arc::new(Mutex::new(())),
            src_quality: SrcQuality::Medium,
        }
    }

    pub fn set_src_quality(&mut self, quality: SrcQuality) {
        self.src_quality = quality;
    }

    pub fn state(&self) -> OutputState {
        self.shared.lock().state.clone()
    }

    // --- Configuration ---

    /// (Re)build the conversion chain and ring for a new stream.
    ///
    /// Stops any running output thread first; restarts it when
    /// `settings.open_on_init` is set.
    pub fn reconfigure(&mut self, settings: AudioSettings) -> Result<(), OutputError> {
        settings
            .validate()
            .map_err(OutputError::ConfigurationFailed)?;

        self.stop_output_thread();
        self.killed.store(false, Ordering::SeqCst);
        self.generation.fetch_add(1, Ordering::SeqCst);

        let users = self.output_settings_users();
        let passthrough = settings.use_passthrough
            && spdif::can_passthrough(
                settings.sample_rate,
                settings.channels,
                settings.codec,
                settings.codec_profile,
                &users,
            );
        if settings.use_passthrough && !passthrough {
            log::warn!(
                "passthrough rejected for {} @ {} Hz; falling back to PCM",
                settings.codec,
                settings.sample_rate
            );
        }

        let mut proc = Processing::idle();
        proc.source_rate = settings.sample_rate;
        proc.source_channels = settings.channels;
        proc.source_format = settings.format;

        let (output_rate, output_channels, output_format) = if passthrough {
            proc.framer = Some(SpdifFramer::new(settings.codec)?);
            proc.passthrough = true;
            // IEC 61937 bursts ride a 16-bit stereo carrier.
            (settings.sample_rate, 2, AudioFormat::S16)
        } else {
            let rate = users.best_rate(settings.sample_rate);
            let format = users.best_format(settings.format);
            let desired = if self.prefs.upmix_stereo
                && settings.channels == 2
                && users.supports_channels(6)
            {
                6
            } else {
                settings.channels.max(2)
            };
            // Only targets the mixer has a matrix for: the source
            // count itself, 5.1 for larger sources, else stereo.
            let channels = if users.supports_channels(desired) {
                desired
            } else if settings.channels > 6 && users.supports_channels(6) {
                6
            } else {
                2
            };
            (rate, channels, format)
        };

        proc.output_channels = output_channels;
        proc.output_format = output_format;
        if !passthrough {
            if output_rate != settings.sample_rate {
                proc.resampler = Some(SrcAdapter::new(
                    settings.sample_rate,
                    output_rate,
                    output_channels,
                    self.src_quality,
                ));
            }
            if settings.channels == 2 && output_channels == 6 {
                proc.upmixer = Some(SurroundUpmixer::new(settings.sample_rate));
            }
        }

        let bytes_per_frame = output_channels as usize * output_format.sample_size();
        log::debug!(
            "reconfigure: {}ch {} @ {} Hz -> {}ch {} @ {} Hz (passthrough: {passthrough})",
            settings.channels,
            settings.format,
            settings.sample_rate,
            output_channels,
            output_format,
            output_rate
        );

        {
            let mut s = self.shared.lock();
            s.ring.reset();
            s.clock = AudioClock::new(output_rate, bytes_per_frame);
            s.clock.set_compressed(passthrough);
            s.output_rate = output_rate;
            s.output_bytes_per_frame = bytes_per_frame;
            // ~33 ms of audio per device write.
            s.fragment_bytes = ((output_rate as usize / 30) * bytes_per_frame).max(bytes_per_frame);
            s.silence = pcm::silence_byte(output_format);
            s.paused = false;
            s.state = OutputState::Opening;
        }
        *self.processing.lock() = proc;

        if settings.open_on_init {
            self.open()?;
        }
        Ok(())
    }

    /// Open the device and start the output thread.
    pub fn open(&mut self) -> Result<(), OutputError> {
        {
            let s = self.shared.lock();
            if !matches!(s.state, OutputState::Opening) {
                return Err(OutputError::ConfigurationFailed(
                    "open requires a configured engine".into(),
                ));
            }
        }
        if let Err(e) = self.backend.open_device() {
            log::error!("device open failed: {e}");
            self.shared.lock().state = OutputState::Errored(e.clone());
            return Err(e);
        }
        self.start_output_thread();
        self.shared.lock().state = OutputState::Running;
        Ok(())
    }

    // --- Producer path ---

    /// Whether `frames` source frames would fit in the ring after
    /// conversion. Conservative: includes resampler slack.
    pub fn check_free_space(&self, frames: usize) -> bool {
        let (free, bpf) = {
            let s = self.shared.lock();
            (s.ring.audiofree(), s.output_bytes_per_frame)
        };
        self.estimated_bytes(frames, bpf) <= free
    }

    fn estimated_bytes(&self, frames: usize, bytes_per_frame: usize) -> usize {
        let p = self.processing.lock();
        if p.passthrough {
            // Worst-case one full burst per block.
            return 24_576;
        }
        let ratio = p
            .resampler
            .as_ref()
            .map(|r| r.output_rate() as f64 / r.source_rate() as f64)
            .unwrap_or(1.0);
        // Frames staged in the resampler from earlier calls can flush
        // together with this chunk, so they count against free space
        // too; once the chunk is converted the staged input is gone and
        // the ring write must not be the step that fails.
        let pending = p.resampler.as_ref().map_or(0, |r| r.pending_frames());
        let in_frames = frames as f64 / p.stretch_factor.min(1.0) + pending as f64;
        ((in_frames * ratio).ceil() as usize + 2) * bytes_per_frame
    }

    /// Queue decoded PCM frames. All-or-nothing: returns `false` and
    /// leaves the ring untouched when the chunk does not fit, so the
    /// decoder can back off.
    pub fn add_frames(&self, data: &[u8], frames: usize, timecode_us: i64) -> bool {
        if self.killed.load(Ordering::SeqCst) {
            return false;
        }
        if !self.check_free_space(frames) {
            return false;
        }
        let volume = self.shared.lock().sw_volume;

        let (packed, source_rate, queued_frames) = {
            let mut p = self.processing.lock();
            if p.passthrough {
                log::warn!("add_frames called on a passthrough stream");
                return false;
            }
            let packed = p.process_pcm(data, volume);
            // Frames still staged in the resampler have not reached the
            // ring; the reference must not run ahead of the write head.
            let pending = p.resampler.as_ref().map_or(0, |r| r.pending_frames());
            let staged_source = (pending as f64 * p.stretch_factor) as usize;
            (packed, p.source_rate, frames.saturating_sub(staged_source))
        };

        let mut s = self.shared.lock();
        if !s.ring.write(&packed) {
            return false;
        }
        s.clock.set_timecode(timecode_us);
        s.clock.frames_queued(queued_frames, source_rate);
        drop(s);
        self.buffered_cond.notify_all();
        true
    }

    /// Queue raw bytes: compressed blocks in passthrough mode, packed
    /// PCM otherwise. `frames` is the source frame count the block
    /// represents, for clock accounting.
    pub fn add_data(&self, data: &[u8], timecode_us: i64, frames: usize) -> bool {
        if self.killed.load(Ordering::SeqCst) {
            return false;
        }
        let (burst, source_rate) = {
            let mut p = self.processing.lock();
            if !p.passthrough {
                drop(p);
                return self.add_frames(data, frames, timecode_us);
            }
            let Some(framer) = p.framer.as_mut() else {
                return false;
            };
            match framer.frame(data) {
                Some(b) => (b, p.source_rate),
                // Malformed block: consumed and skipped, stream resyncs
                // on the next valid one.
                None => return true,
            }
        };

        let mut s = self.shared.lock();
        if !s.ring.write(&burst) {
            return false;
        }
        s.clock.set_timecode(timecode_us);
        s.clock.frames_queued(frames, source_rate);
        drop(s);
        self.buffered_cond.notify_all();
        true
    }

    // --- Consumer path / clock ---

    /// Copy up to `dest.len()` buffered bytes, consuming them. With
    /// `full_buffer`, the remainder is silence-filled so the device
    /// always receives a complete period; this never blocks waiting for
    /// the producer. Returns the count of real audio bytes.
    pub fn get_audio_data(&self, dest: &mut [u8], full_buffer: bool) -> usize {
        let (n, silence) = {
            let mut s = self.shared.lock();
            (s.ring.read_into(dest), s.silence)
        };
        if full_buffer && n < dest.len() {
            dest[n..].fill(silence);
        }
        n
    }

    /// Consumer-side clock resync, e.g. from a backend that knows the
    /// presented timecode.
    pub fn set_audiotime(&self, frames_consumed: u64, timecode_us: i64) {
        self.shared.lock().clock.set_audiotime(frames_consumed, timecode_us);
    }

    /// Hard-set the clock reference (seek).
    pub fn set_timecode(&self, timecode_us: i64) {
        self.shared.lock().clock.set_timecode(timecode_us);
    }

    /// Effective DSP rate override for clock math.
    pub fn set_eff_dsp(&self, rate: u32) {
        self.shared.lock().clock.set_eff_dsp(rate);
    }

    /// Source bitrate hint, used by the clock to estimate buffered time
    /// for compressed audio that has no fixed frame size.
    pub fn set_bitrate(&self, bits_per_sec: u32) {
        self.shared.lock().clock.set_bitrate(bits_per_sec);
    }

    /// Current presented media timecode in µs.
    ///
    /// Tagged read against the reset generation: a computation that
    /// straddles a `reset` is discarded and retried, so a caller never
    /// sees a mix of pre- and post-reset state.
    pub fn get_audiotime(&self) -> i64 {
        for _ in 0..3 {
            let generation = self.generation.load(Ordering::Acquire);
            let (clock, ring_bytes) = {
                let s = self.shared.lock();
                (s.clock.clone(), s.ring.audioready())
            };
            // Backend query happens outside the buffer lock.
            let soundcard = self.backend.buffered_on_soundcard();
            if self.generation.load(Ordering::Acquire) == generation {
                let t = clock.audiotime(ring_bytes, soundcard);
                self.shared.lock().last_audiotime_us = t;
                return t;
            }
            // Reset raced the read; the snapshot is stale.
        }
        self.shared.lock().last_audiotime_us
    }

    /// Total buffered duration: ring occupancy plus device buffer.
    pub fn get_audio_buffered_time(&self) -> Duration {
        let (clock, ring_bytes) = {
            let s = self.shared.lock();
            (s.clock.clone(), s.ring.audioready())
        };
        clock.buffered_time(ring_bytes, self.backend.buffered_on_soundcard())
    }

    pub fn get_fill_status(&self) -> usize {
        self.shared.lock().ring.audioready()
    }

    pub fn get_buffer_status(&self) -> (usize, usize) {
        let s = self.shared.lock();
        (s.ring.audioready(), s.ring.capacity())
    }

    // --- Stretch / volume ---

    /// Change playback speed. Safe while audio is flowing: the factor
    /// is swapped under the processing lock, between chunks.
    pub fn set_stretch_factor(&self, factor: f64) {
        let applied = {
            let mut p = self.processing.lock();
            if p.passthrough {
                log::warn!("ignoring stretch factor on passthrough stream");
                return;
            }
            if (factor - 1.0).abs() > STRETCH_EPSILON && p.stretcher.is_none() {
                p.stretcher = Some(TimeStretcher::new(p.source_channels, p.source_rate));
            }
            if let Some(st) = p.stretcher.as_mut() {
                st.set_factor(factor);
                p.stretch_factor = st.factor();
            } else {
                p.stretch_factor = 1.0;
            }
            p.stretch_factor
        };
        self.shared.lock().clock.set_stretch(applied);
    }

    pub fn get_stretch_factor(&self) -> f64 {
        self.processing.lock().stretch_factor
    }

    /// Software volume, 0–100, applied to PCM in the producer path.
    pub fn set_sw_volume(&self, volume: u8) {
        self.shared.lock().sw_volume = volume.min(100);
    }

    pub fn get_sw_volume(&self) -> u8 {
        self.shared.lock().sw_volume
    }

    // --- Pause / drain / reset / teardown ---

    /// Suspend or resume device writes; the device stays open.
    pub fn pause(&self, paused: bool) {
        let mut s = self.shared.lock();
        s.paused = paused;
        match (&s.state, paused) {
            (OutputState::Running, true) => s.state = OutputState::Paused,
            (OutputState::Paused, false) => s.state = OutputState::Running,
            _ => {}
        }
    }

    pub fn is_paused(&self) -> bool {
        self.shared.lock().paused
    }

    /// Block until the ring holds a priming amount of audio, so
    /// playback does not start straight into an underrun. Returns
    /// `false` on timeout or kill.
    pub fn pause_until_buffered(&self) -> bool {
        let deadline = Instant::now() + PRIME_TIMEOUT;
        let mut s = self.shared.lock();
        let prime = s.fragment_bytes * 4;
        while s.ring.audioready() < prime {
            if self.killed.load(Ordering::SeqCst) {
                return false;
            }
            let now = Instant::now();
            if now >= deadline {
                log::warn!(
                    "pause_until_buffered timed out at {}/{prime} bytes",
                    s.ring.audioready()
                );
                return false;
            }
            self.buffered_cond.wait_for(&mut s, deadline - now);
        }
        true
    }

    /// Block until both the ring and the device buffer are empty.
    /// Bounded by the currently buffered duration plus a margin.
    pub fn drain(&self) -> Result<(), OutputError> {
        let prior = {
            let mut s = self.shared.lock();
            let prior = s.state.clone();
            if s.state.is_active() {
                s.state = OutputState::Draining;
            }
            prior
        };
        let deadline = Instant::now() + self.get_audio_buffered_time() + DRAIN_MARGIN;

        loop {
            let empty = self.shared.lock().ring.is_empty();
            if empty && self.backend.buffered_on_soundcard() == 0 {
                let mut s = self.shared.lock();
                if matches!(s.state, OutputState::Draining) {
                    s.state = prior;
                }
                return Ok(());
            }
            if self.killed.load(Ordering::SeqCst) {
                return Err(OutputError::Timeout);
            }
            if Instant::now() >= deadline {
                log::warn!("drain timed out with {} bytes buffered", self.get_fill_status());
                return Err(OutputError::Timeout);
            }
            thread::sleep(IDLE_SLEEP);
        }
    }

    /// Discard all buffered audio and invalidate the clock.
    ///
    /// Safe to call concurrently with producer/consumer activity: the
    /// generation bump makes any in-flight clock read retry against
    /// post-reset state instead of reporting a stale position.
    pub fn reset(&self) {
        {
            let mut s = self.shared.lock();
            s.ring.reset();
            s.clock.set_timecode(0);
            s.last_audiotime_us = 0;
        }
        self.processing.lock().reset();
        self.generation.fetch_add(1, Ordering::Release);
    }

    /// Hard stop: end the output thread, close the device, release the
    /// chain. Idempotent and callable from any thread.
    pub fn kill_audio(&mut self) {
        // Guard via a clone so the lock does not pin `self` while the
        // thread join below needs it mutably.
        let kill_lock = Arc::clone(&self.kill_lock);
        let _guard = kill_lock.lock();
        self.killed.store(true, Ordering::SeqCst);
        self.buffered_cond.notify_all();

        self.stop_output_thread();
        self.backend.close_device();

        let mut s = self.shared.lock();
        if !matches!(s.state, OutputState::Errored(_)) {
            s.state = OutputState::Stopped;
        }
    }

    // --- Capability surface ---

    /// Driver-reported capabilities for the digital (passthrough) path.
    pub fn output_settings_cleaned(&self) -> OutputCapabilities {
        self.backend.output_settings(true)
    }

    /// Capabilities after user-preference filtering.
    pub fn output_settings_users(&self) -> OutputCapabilities {
        self.backend.output_settings(false).cleaned_with(&self.prefs)
    }

    pub fn can_passthrough(
        &self,
        sample_rate: u32,
        channels: u16,
        codec: AudioCodec,
        codec_profile: i32,
    ) -> bool {
        spdif::can_passthrough(
            sample_rate,
            channels,
            codec,
            codec_profile,
            &self.output_settings_users(),
        )
    }

    /// `false` while a passthrough chain is active: the decoder should
    /// hand over raw compressed blocks.
    pub fn need_decoding_before_passthrough(&self) -> bool {
        !self.processing.lock().passthrough
    }

    // --- Output thread ---

    fn start_output_thread(&mut self) {
        self.output_running.store(true, Ordering::SeqCst);

        let running = Arc::clone(&self.output_running);
        let shared = Arc::clone(&self.shared);
        let backend = Arc::clone(&self.backend);

        let handle = thread::Builder::new()
            .name("audio-output".into())
            .spawn(move || {
                let mut chunk = vec![0u8; shared.lock().fragment_bytes];

                while running.load(Ordering::SeqCst) {
                    let n = {
                        let mut s = shared.lock();
                        if s.paused {
                            0
                        } else {
                            let fragment = s.fragment_bytes.min(chunk.len());
                            s.ring.read_into(&mut chunk[..fragment])
                        }
                    };
                    if n == 0 {
                        // Paused or starved; never busy-wait on the lock.
                        thread::sleep(IDLE_SLEEP);
                        continue;
                    }
                    if let Err(e) = backend.write_audio(&chunk[..n]) {
                        log::error!("device write failed, stopping output: {e}");
                        shared.lock().state = OutputState::Errored(e);
                        break;
                    }
                }
            })
            .expect("failed to spawn audio output thread");

        self.output_handle = Some(handle);
    }

    fn stop_output_thread(&mut self) {
        self.output_running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.output_handle.take() {
            let _ = handle.join();
        }
    }
}

impl Drop for OutputEngine {
    fn drop(&mut self) {
        self.kill_audio();
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use super::*;

    /// Backend that records writes and reports a configurable buffer.
    struct TestBackend {
        caps: OutputCapabilities,
        written: Mutex<Vec<u8>>,
        buffered: AtomicUsize,
        open_calls: AtomicUsize,
        close_calls: AtomicUsize,
    }

    impl TestBackend {
        fn new() -> Self {
            Self {
                caps: OutputCapabilities {
                    sample_rates: vec![44_100, 48_000],
                    formats: vec![AudioFormat::S16, AudioFormat::F32],
                    channels: vec![2, 6],
                    passthrough: true,
                },
                written: Mutex::new(Vec::new()),
                buffered: AtomicUsize::new(0),
                open_calls: AtomicUsize::new(0),
                close_calls: AtomicUsize::new(0),
            }
        }

        fn with_caps(caps: OutputCapabilities) -> Self {
            Self { caps, ..Self::new() }
        }
    }

    impl DeviceBackend for TestBackend {
        fn open_device(&self) -> Result<(), OutputError> {
            self.open_calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn close_device(&self) {
            self.close_calls.fetch_add(1, Ordering::SeqCst);
        }
        fn write_audio(&self, buffer: &[u8]) -> Result<(), OutputError> {
            self.written.lock().extend_from_slice(buffer);
            Ok(())
        }
        fn buffered_on_soundcard(&self) -> usize {
            self.buffered.load(Ordering::SeqCst)
        }
        fn output_settings(&self, _digital: bool) -> OutputCapabilities {
            self.caps.clone()
        }
    }

    fn pcm_settings() -> AudioSettings {
        AudioSettings {
            open_on_init: false,
            ..AudioSettings::default()
        }
    }

    fn engine() -> (Arc<TestBackend>, OutputEngine) {
        let backend = Arc::new(TestBackend::new());
        let engine = OutputEngine::new(backend.clone(), OutputPreferences::default());
        (backend, engine)
    }

    #[test]
    fn end_to_end_pcm_silence_round_trip() {
        let (_, mut engine) = engine();
        engine.reconfigure(pcm_settings()).unwrap();

        // One second of 48 kHz stereo S16 silence, 4096 bytes at a time.
        let chunk = vec![0u8; 4_096];
        let mut queued = 0usize;
        let mut timecode = 0i64;
        while queued < 96_000 {
            let bytes = chunk.len().min(96_000 - queued);
            let frames = bytes / 4;
            assert!(engine.add_frames(&chunk[..bytes], frames, timecode));
            queued += bytes;
            timecode += frames as i64 * 1_000_000 / 48_000;
        }
        assert_eq!(engine.get_fill_status(), 96_000);

        let mut out = vec![0u8; 4_096];
        let mut drained = 0usize;
        loop {
            let n = engine.get_audio_data(&mut out, false);
            if n == 0 {
                break;
            }
            drained += n;
        }
        assert_eq!(drained, 96_000);
        assert_eq!(engine.get_audio_buffered_time(), Duration::ZERO);
    }

    #[test]
    fn add_frames_applies_backpressure_without_partial_write() {
        let backend = Arc::new(TestBackend::new());
        let mut engine = OutputEngine::with_capacity(
            backend,
            OutputPreferences::default(),
            12_288,
        );
        engine.reconfigure(pcm_settings()).unwrap();

        let chunk = vec![0u8; 4_096];
        assert!(engine.add_frames(&chunk, 1_024, 0));
        let fill = engine.get_fill_status();

        // Ring has 12287 usable bytes; a second full chunk fits, a
        // third fails the free-space check.
        assert!(engine.add_frames(&chunk, 1_024, 0));
        assert!(!engine.add_frames(&chunk, 1_024, 0));
        assert_eq!(engine.get_fill_status(), fill * 2);
    }

    /// Backend that forces 44.1 -> 48 kHz resampling.
    fn resample_backend() -> Arc<TestBackend> {
        Arc::new(TestBackend::with_caps(OutputCapabilities {
            sample_rates: vec![48_000],
            formats: vec![AudioFormat::S16],
            channels: vec![2],
            passthrough: false,
        }))
    }

    fn resample_settings() -> AudioSettings {
        AudioSettings {
            sample_rate: 44_100,
            open_on_init: false,
            ..AudioSettings::default()
        }
    }

    #[test]
    fn backpressure_with_staged_resampler_input_loses_nothing() {
        let mut engine = OutputEngine::with_capacity(
            resample_backend(),
            OutputPreferences::default(),
            8_192,
        );
        engine.reconfigure(resample_settings()).unwrap();

        // 924 frames stay staged below the converter chunk size.
        assert!(engine.add_frames(&vec![0u8; 924 * 4], 924, 0));
        assert_eq!(engine.get_fill_status(), 0);

        // A chunk whose flush would overrun the ring is refused before
        // conversion, leaving the staged input intact.
        assert!(!engine.add_frames(&vec![0u8; 1_024 * 4], 1_024, 0));
        assert_eq!(engine.get_fill_status(), 0);

        // A chunk that fits flushes the staged frames along with it.
        assert!(engine.add_frames(&vec![0u8; 100 * 4], 100, 20_952));
        let fill = engine.get_fill_status();
        assert!(fill >= 4_400, "staged frames were lost: fill {fill}");
    }

    #[test]
    fn audiotime_does_not_run_ahead_of_staged_resampler_frames() {
        let mut engine =
            OutputEngine::new(resample_backend(), OutputPreferences::default());
        engine.reconfigure(resample_settings()).unwrap();

        // Entirely staged: nothing has reached the ring yet.
        assert!(engine.add_frames(&vec![0u8; 924 * 4], 924, 0));
        assert_eq!(engine.get_audiotime(), 0);

        // The converter chunk boundary flushes the staged frames.
        assert!(engine.add_frames(&vec![0u8; 100 * 4], 100, 20_952));
        let t = engine.get_audiotime();
        assert!(t.abs() < 2_000, "clock ran ahead of the write head: {t} µs");
    }

    #[test]
    fn unmatrixable_device_channels_fall_back_to_stereo() {
        let backend = Arc::new(TestBackend::with_caps(OutputCapabilities {
            sample_rates: vec![48_000],
            formats: vec![AudioFormat::F32],
            channels: vec![4],
            passthrough: false,
        }));
        let mut engine = OutputEngine::new(backend, OutputPreferences::default());
        let mut settings = pcm_settings();
        settings.channels = 6;
        settings.format = AudioFormat::F32;
        engine.reconfigure(settings).unwrap();

        // 5.1 frame downmixed through the stereo matrix, not truncated.
        let frame = [0.1f32, 0.2, 0.3, 0.4, 0.5, 0.6];
        assert!(engine.add_frames(&pcm::from_float(AudioFormat::F32, &frame), 1, 0));
        assert_eq!(engine.get_fill_status(), 2 * 4);

        let mut expected = [0.0f32; 2];
        channel_mixer::downmix_frames(6, 2, &mut expected, &frame, 1).unwrap();
        let mut out = [0u8; 8];
        engine.get_audio_data(&mut out, false);
        let got = pcm::to_float(AudioFormat::F32, &out);
        assert!((got[0] - expected[0]).abs() < 1e-6);
        assert!((got[1] - expected[1]).abs() < 1e-6);
    }

    #[test]
    fn passthrough_bitrate_estimates_buffered_time() {
        let (_, mut engine) = engine();
        let mut settings = pcm_settings();
        settings.codec = AudioCodec::Ac3;
        settings.use_passthrough = true;
        engine.reconfigure(settings).unwrap();
        engine.set_bitrate(384_000);

        let mut block = vec![0u8; 1_536];
        block[0] = 0x0B;
        block[1] = 0x77;
        assert!(engine.add_data(&block, 1_000_000, 1_536));

        // Reference 1.032 s; 6144 burst bytes = 128 ms at 384 kbit/s.
        assert_eq!(engine.get_audiotime(), 904_000);
    }

    #[test]
    fn audiotime_tracks_consumption_monotonically() {
        let (_, mut engine) = engine();
        engine.reconfigure(pcm_settings()).unwrap();

        let chunk = vec![0u8; 9_600]; // 50 ms of 48 kHz stereo S16
        for i in 0..10 {
            assert!(engine.add_frames(&chunk, 2_400, i * 50_000));
        }

        let mut out = vec![0u8; 4_800];
        let mut last = engine.get_audiotime();
        for _ in 0..20 {
            engine.get_audio_data(&mut out, false);
            let t = engine.get_audiotime();
            assert!(t >= last, "clock went backwards: {t} < {last}");
            last = t;
        }
        // Fully drained: the clock reads the end of the last chunk.
        assert_eq!(last, 500_000);
    }

    #[test]
    fn reset_discards_audio_and_restarts_clock() {
        let (_, mut engine) = engine();
        engine.reconfigure(pcm_settings()).unwrap();

        let chunk = vec![0u8; 9_600];
        assert!(engine.add_frames(&chunk, 2_400, 10_000_000));
        assert!(engine.get_audiotime() > 0);

        let before = engine.generation.load(Ordering::SeqCst);
        engine.reset();
        assert_eq!(engine.generation.load(Ordering::SeqCst), before + 1);
        assert_eq!(engine.get_fill_status(), 0);
        assert_eq!(engine.get_audiotime(), 0);
    }

    #[test]
    fn full_buffer_request_is_silence_padded() {
        let (_, mut engine) = engine();
        engine.reconfigure(pcm_settings()).unwrap();

        assert!(engine.add_frames(&[0x01; 8], 2, 0));
        let mut out = [0xFFu8; 16];
        let n = engine.get_audio_data(&mut out, true);
        assert_eq!(n, 8);
        assert!(out[8..].iter().all(|&b| b == 0));
    }

    #[test]
    fn drain_completes_when_ring_and_device_empty() {
        let (backend, mut engine) = engine();
        engine.reconfigure(pcm_settings()).unwrap();

        let chunk = vec![0u8; 4_096];
        assert!(engine.add_frames(&chunk, 1_024, 0));
        let mut out = vec![0u8; 8_192];
        engine.get_audio_data(&mut out, false);

        assert!(engine.drain().is_ok());
        assert_eq!(engine.get_fill_status(), 0);
        assert_eq!(backend.buffered_on_soundcard(), 0);
    }

    #[test]
    fn drain_times_out_when_audio_is_stuck() {
        let (_, mut engine) = engine();
        engine.reconfigure(pcm_settings()).unwrap();
        assert!(engine.add_frames(&[0u8; 4], 1, 0));

        // Nothing consumes; the tiny buffered duration bounds the wait.
        assert_eq!(engine.drain(), Err(OutputError::Timeout));
    }

    #[test]
    fn pause_toggles_state() {
        let (backend, mut engine) = engine();
        let mut settings = pcm_settings();
        settings.open_on_init = true;
        engine.reconfigure(settings).unwrap();
        assert_eq!(backend.open_calls.load(Ordering::SeqCst), 1);
        assert!(engine.state().is_running());

        engine.pause(true);
        assert!(engine.is_paused());
        assert!(engine.state().is_paused());
        engine.pause(false);
        assert!(engine.state().is_running());

        engine.kill_audio();
        assert_eq!(engine.state(), OutputState::Stopped);
    }

    #[test]
    fn output_thread_delivers_to_backend() {
        let (backend, mut engine) = engine();
        let mut settings = pcm_settings();
        settings.open_on_init = true;
        engine.reconfigure(settings).unwrap();

        let chunk = vec![0x55u8; 9_600];
        assert!(engine.add_frames(&chunk, 2_400, 0));

        let deadline = Instant::now() + Duration::from_secs(2);
        while backend.written.lock().len() < 9_600 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(5));
        }
        engine.kill_audio();
        assert_eq!(backend.written.lock().len(), 9_600);
    }

    #[test]
    fn kill_audio_is_idempotent() {
        let (backend, mut engine) = engine();
        let mut settings = pcm_settings();
        settings.open_on_init = true;
        engine.reconfigure(settings).unwrap();

        engine.kill_audio();
        engine.kill_audio();
        assert!(backend.close_calls.load(Ordering::SeqCst) >= 2);
        assert_eq!(engine.state(), OutputState::Stopped);
        assert!(!engine.add_frames(&[0u8; 4], 1, 0));
    }

    #[test]
    fn passthrough_frames_ac3_bursts() {
        let (_, mut engine) = engine();
        let mut settings = pcm_settings();
        settings.codec = AudioCodec::Ac3;
        settings.use_passthrough = true;
        settings.channels = 6;
        engine.reconfigure(settings).unwrap();
        assert!(!engine.need_decoding_before_passthrough());

        let mut block = vec![0u8; 1_536];
        block[0] = 0x0B;
        block[1] = 0x77;
        assert!(engine.add_data(&block, 0, 1_536));
        assert_eq!(engine.get_fill_status(), 6_144);

        // Malformed block is skipped, not queued and not an error.
        assert!(engine.add_data(&[0xDE, 0xAD], 0, 1_536));
        assert_eq!(engine.get_fill_status(), 6_144);
    }

    #[test]
    fn passthrough_falls_back_to_pcm_when_unsupported() {
        let backend = Arc::new(TestBackend::new());
        let mut engine = OutputEngine::new(
            backend,
            OutputPreferences {
                allow_passthrough: false,
                ..OutputPreferences::default()
            },
        );
        let mut settings = pcm_settings();
        settings.codec = AudioCodec::Ac3;
        settings.use_passthrough = true;
        engine.reconfigure(settings).unwrap();
        assert!(engine.need_decoding_before_passthrough());
    }

    #[test]
    fn upmix_negotiates_six_channels() {
        let backend = Arc::new(TestBackend::new());
        let mut engine = OutputEngine::new(
            backend,
            OutputPreferences {
                upmix_stereo: true,
                ..OutputPreferences::default()
            },
        );
        engine.reconfigure(pcm_settings()).unwrap();

        // 100 stereo S16 frames in, 100 5.1 frames out.
        let chunk = vec![0u8; 400];
        assert!(engine.add_frames(&chunk, 100, 0));
        assert_eq!(engine.get_fill_status(), 100 * 6 * 2);
    }

    #[test]
    fn stretch_factor_round_trip_and_clamp() {
        let (_, mut engine) = engine();
        engine.reconfigure(pcm_settings()).unwrap();

        assert_eq!(engine.get_stretch_factor(), 1.0);
        engine.set_stretch_factor(1.5);
        assert_eq!(engine.get_stretch_factor(), 1.5);
        engine.set_stretch_factor(5.0);
        assert_eq!(engine.get_stretch_factor(), 2.0);
    }

    #[test]
    fn stretch_halves_queued_bytes_at_double_speed() {
        let (_, mut engine) = engine();
        engine.reconfigure(pcm_settings()).unwrap();
        engine.set_stretch_factor(2.0);

        let chunk = vec![0u8; 4_096 * 4];
        assert!(engine.add_frames(&chunk, 4_096, 0));
        assert_eq!(engine.get_fill_status(), 4_096 * 2);
    }

    #[test]
    fn sw_volume_scales_samples() {
        let (_, mut engine) = engine();
        engine.reconfigure(pcm_settings()).unwrap();
        engine.set_sw_volume(50);
        assert_eq!(engine.get_sw_volume(), 50);

        // Full-scale S16 frame at 50% volume -> gain 0.25.
        let data = pcm::from_float(AudioFormat::S16, &[1.0, 1.0]);
        assert!(engine.add_frames(&data, 1, 0));
        let mut out = [0u8; 4];
        engine.get_audio_data(&mut out, false);
        let sample = i16::from_le_bytes([out[0], out[1]]);
        let expected = (i16::MAX as f32 * 0.25) as i16;
        assert!((sample - expected).abs() <= 1);
    }

    #[test]
    fn user_capabilities_respect_preferences() {
        let backend = Arc::new(TestBackend::new());
        let engine = OutputEngine::new(
            backend,
            OutputPreferences {
                max_channels: 2,
                allow_passthrough: false,
                upmix_stereo: false,
            },
        );
        let users = engine.output_settings_users();
        assert_eq!(users.channels, vec![2]);
        assert!(!users.passthrough);
        // The cleaned (driver) set is unfiltered.
        assert!(engine.output_settings_cleaned().passthrough);
    }

    #[test]
    fn pause_until_buffered_waits_for_prime() {
        let (_, mut engine) = engine();
        engine.reconfigure(pcm_settings()).unwrap();

        let shared_engine = Arc::new(engine);
        let feeder = {
            let engine = Arc::clone(&shared_engine);
            thread::spawn(move || {
                // Feed well past the priming threshold.
                let chunk = vec![0u8; 9_600];
                for _ in 0..10 {
                    thread::sleep(Duration::from_millis(5));
                    engine.add_frames(&chunk, 2_400, 0);
                }
            })
        };
        assert!(shared_engine.pause_until_buffered());
        feeder.join().unwrap();
    }
}
