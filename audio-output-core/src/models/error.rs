use thiserror::Error;

/// Errors surfaced by the audio output pipeline.
///
/// Backpressure (`add_frames` returning `false`) and capability probes
/// are deliberately not errors; this enum covers conditions the caller
/// must react to.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum OutputError {
    #[error("device not available")]
    DeviceNotAvailable,

    #[error("device open failed: {0}")]
    OpenFailed(String),

    #[error("device write failed: {0}")]
    WriteFailed(String),

    #[error("configuration failed: {0}")]
    ConfigurationFailed(String),

    #[error("unsupported passthrough: {0}")]
    UnsupportedPassthrough(String),

    #[error("timeout")]
    Timeout,
}
