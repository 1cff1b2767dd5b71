//! # audio-output-null
//!
//! Device-free `DeviceBackend` for testing and timing-only playback.
//!
//! Accepts every write and discards the audio, but models a real
//! soundcard buffer that drains in wall-clock time, so engine-level
//! clock and drain behavior can be exercised without audio hardware.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use audio_output_core::models::capabilities::OutputCapabilities;
use audio_output_core::models::error::OutputError;
use audio_output_core::models::format::AudioFormat;
use audio_output_core::models::settings::AudioSettings;
use audio_output_core::traits::backend_factory::BackendFactory;
use audio_output_core::traits::device_backend::DeviceBackend;

/// Simulated soundcard parameters.
#[derive(Debug, Clone)]
pub struct NullConfig {
    /// Drain rate of the simulated device buffer.
    pub bytes_per_sec: usize,
    /// Simulated hardware buffer size; writes block while it is full.
    pub device_buffer_bytes: usize,
}

impl Default for NullConfig {
    fn default() -> Self {
        Self {
            // 48 kHz stereo S16.
            bytes_per_sec: 48_000 * 4,
            device_buffer_bytes: 32_768,
        }
    }
}

struct Inner {
    open: bool,
    buffered: usize,
    last_drain: Instant,
}

pub struct NullBackend {
    config: NullConfig,
    inner: Mutex<Inner>,
}

impl NullBackend {
    pub fn new(config: NullConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner {
                open: false,
                buffered: 0,
                last_drain: Instant::now(),
            }),
        }
    }

    /// Advance the simulated drain to now.
    fn drain_elapsed(&self, inner: &mut Inner) {
        let now = Instant::now();
        let elapsed = now.duration_since(inner.last_drain);
        let drained = (elapsed.as_secs_f64() * self.config.bytes_per_sec as f64) as usize;
        inner.buffered = inner.buffered.saturating_sub(drained);
        inner.last_drain = now;
    }
}

impl Default for NullBackend {
    fn default() -> Self {
        Self::new(NullConfig::default())
    }
}

impl DeviceBackend for NullBackend {
    fn open_device(&self) -> Result<(), OutputError> {
        let mut inner = self.inner.lock();
        inner.open = true;
        inner.buffered = 0;
        inner.last_drain = Instant::now();
        log::debug!("null device opened ({} B/s)", self.config.bytes_per_sec);
        Ok(())
    }

    fn close_device(&self) {
        let mut inner = self.inner.lock();
        if inner.open {
            log::debug!("null device closed with {} bytes unplayed", inner.buffered);
        }
        inner.open = false;
        inner.buffered = 0;
    }

    /// Blocks like a real device while the hardware buffer is full.
    fn write_audio(&self, buffer: &[u8]) -> Result<(), OutputError> {
        loop {
            {
                let mut inner = self.inner.lock();
                if !inner.open {
                    return Err(OutputError::WriteFailed("device not open".into()));
                }
                self.drain_elapsed(&mut inner);
                if inner.buffered + buffer.len() <= self.config.device_buffer_bytes
                    || buffer.len() > self.config.device_buffer_bytes
                {
                    inner.buffered = (inner.buffered + buffer.len())
                        .min(self.config.device_buffer_bytes);
                    return Ok(());
                }
            }
            thread::sleep(Duration::from_millis(2));
        }
    }

    fn buffered_on_soundcard(&self) -> usize {
        let mut inner = self.inner.lock();
        if !inner.open {
            return 0;
        }
        self.drain_elapsed(&mut inner);
        inner.buffered
    }

    fn output_settings(&self, _digital: bool) -> OutputCapabilities {
        OutputCapabilities {
            sample_rates: vec![8_000, 11_025, 16_000, 22_050, 32_000, 44_100, 48_000, 88_200, 96_000, 176_400, 192_000],
            formats: vec![
                AudioFormat::U8,
                AudioFormat::S16,
                AudioFormat::S24,
                AudioFormat::S32,
                AudioFormat::F32,
            ],
            channels: (2..=8).collect(),
            passthrough: true,
        }
    }
}

/// Factory registered as the lowest-priority fallback; it can serve any
/// settings but should lose to any real device backend.
pub struct NullBackendFactory;

impl BackendFactory for NullBackendFactory {
    fn name(&self) -> &'static str {
        "null"
    }

    fn score(&self, _settings: &AudioSettings) -> u32 {
        1
    }

    fn create(&self, _settings: &AudioSettings) -> Result<Arc<dyn DeviceBackend>, OutputError> {
        Ok(Arc::new(NullBackend::default()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    use audio_output_core::traits::backend_factory::BackendRegistry;

    #[test]
    fn write_requires_open_device() {
        let backend = NullBackend::default();
        assert!(backend.write_audio(&[0u8; 16]).is_err());

        backend.open_device().unwrap();
        assert!(backend.write_audio(&[0u8; 16]).is_ok());

        backend.close_device();
        assert!(backend.write_audio(&[0u8; 16]).is_err());
    }

    #[test]
    fn buffer_drains_in_real_time() {
        // 1 MB/s so a short sleep drains a visible amount.
        let backend = NullBackend::new(NullConfig {
            bytes_per_sec: 1_000_000,
            device_buffer_bytes: 32_768,
        });
        backend.open_device().unwrap();
        backend.write_audio(&[0u8; 10_000]).unwrap();

        let first = backend.buffered_on_soundcard();
        assert!(first > 0 && first <= 10_000);

        thread::sleep(Duration::from_millis(20));
        assert!(backend.buffered_on_soundcard() < first);

        thread::sleep(Duration::from_millis(20));
        assert_eq!(backend.buffered_on_soundcard(), 0);
    }

    #[test]
    fn close_resets_buffer() {
        let backend = NullBackend::default();
        backend.open_device().unwrap();
        backend.write_audio(&[0u8; 1_024]).unwrap();
        backend.close_device();
        assert_eq!(backend.buffered_on_soundcard(), 0);
    }

    #[test]
    fn factory_registers_and_creates() {
        let mut registry = BackendRegistry::new();
        registry.register(Box::new(NullBackendFactory));
        assert_eq!(registry.names(), vec!["null"]);

        let backend = registry.create_best(&AudioSettings::default()).unwrap();
        assert!(backend.output_settings(false).passthrough);
    }

    #[test]
    fn reports_generous_capabilities() {
        let backend = NullBackend::default();
        let caps = backend.output_settings(false);
        assert!(caps.channels.contains(&6));
        assert!(caps.sample_rates.contains(&44_100));
    }
}
