use crate::models::capabilities::OutputCapabilities;
use crate::models::error::OutputError;

/// Interface to a platform sound device.
///
/// Implemented per platform (ALSA, PulseAudio, WASAPI, ...) and by the
/// null backend for headless use. All receivers are `&self`: backends
/// own their interior synchronization, so the engine can query
/// `buffered_on_soundcard` for clock math while the output thread sits
/// in a blocking `write_audio` — the engine never holds its own locks
/// across either call.
pub trait DeviceBackend: Send + Sync {
    /// Open the physical or virtual device.
    fn open_device(&self) -> Result<(), OutputError>;

    /// Close the device and release OS resources. Idempotent.
    fn close_device(&self);

    /// Blocking write of interleaved output-format bytes.
    ///
    /// May block for up to one hardware buffer's worth of time. Called
    /// only from the engine's output thread.
    fn write_audio(&self, buffer: &[u8]) -> Result<(), OutputError>;

    /// Bytes written but not yet played by the hardware.
    fn buffered_on_soundcard(&self) -> usize;

    /// Driver-reported capabilities; `digital` selects the passthrough
    /// capability set where the device distinguishes them.
    fn output_settings(&self, digital: bool) -> OutputCapabilities;
}
