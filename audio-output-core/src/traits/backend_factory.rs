use std::sync::Arc;

use crate::models::error::OutputError;
use crate::models::settings::AudioSettings;

use super::device_backend::DeviceBackend;

/// Factory for one backend family, registered with [`BackendRegistry`].
///
/// Backends are selected by score rather than subclassing: each factory
/// rates how well it matches the requested settings (device string,
/// passthrough needs, platform availability) and the registry picks the
/// highest bidder. A score of 0 means "cannot serve this request".
pub trait BackendFactory: Send + Sync {
    /// Stable identifier, also matched against `settings.main_device`
    /// prefixes (e.g., `"alsa:hw:0"`).
    fn name(&self) -> &str;

    fn score(&self, settings: &AudioSettings) -> u32;

    fn create(&self, settings: &AudioSettings) -> Result<Arc<dyn DeviceBackend>, OutputError>;
}

/// Startup-time registry of available backend factories.
#[derive(Default)]
pub struct BackendRegistry {
    factories: Vec<Box<dyn BackendFactory>>,
}

impl BackendRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, factory: Box<dyn BackendFactory>) {
        log::debug!("registered audio backend factory '{}'", factory.name());
        self.factories.push(factory);
    }

    pub fn names(&self) -> Vec<&str> {
        self.factories.iter().map(|f| f.name()).collect()
    }

    /// Create a backend from the best-scoring factory.
    pub fn create_best(
        &self,
        settings: &AudioSettings,
    ) -> Result<Arc<dyn DeviceBackend>, OutputError> {
        let best = self
            .factories
            .iter()
            .map(|f| (f.score(settings), f))
            .filter(|(score, _)| *score > 0)
            .max_by_key(|(score, _)| *score);

        match best {
            Some((score, factory)) => {
                log::debug!(
                    "selected audio backend '{}' (score {score}) for device '{}'",
                    factory.name(),
                    settings.main_device
                );
                factory.create(settings)
            }
            None => Err(OutputError::DeviceNotAvailable),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::capabilities::OutputCapabilities;

    struct FakeBackend;

    impl DeviceBackend for FakeBackend {
        fn open_device(&self) -> Result<(), OutputError> {
            Ok(())
        }
        fn close_device(&self) {}
        fn write_audio(&self, _buffer: &[u8]) -> Result<(), OutputError> {
            Ok(())
        }
        fn buffered_on_soundcard(&self) -> usize {
            0
        }
        fn output_settings(&self, _digital: bool) -> OutputCapabilities {
            OutputCapabilities::stereo_pcm_fallback()
        }
    }

    struct FakeFactory {
        name: &'static str,
        score: u32,
    }

    impl BackendFactory for FakeFactory {
        fn name(&self) -> &str {
            self.name
        }
        fn score(&self, _settings: &AudioSettings) -> u32 {
            self.score
        }
        fn create(&self, _settings: &AudioSettings) -> Result<Arc<dyn DeviceBackend>, OutputError> {
            Ok(Arc::new(FakeBackend))
        }
    }

    #[test]
    fn empty_registry_reports_no_device() {
        let registry = BackendRegistry::new();
        assert_eq!(
            registry.create_best(&AudioSettings::default()).err(),
            Some(OutputError::DeviceNotAvailable)
        );
    }

    #[test]
    fn highest_score_wins() {
        let mut registry = BackendRegistry::new();
        registry.register(Box::new(FakeFactory { name: "low", score: 10 }));
        registry.register(Box::new(FakeFactory { name: "high", score: 50 }));
        registry.register(Box::new(FakeFactory { name: "disabled", score: 0 }));

        assert!(registry.create_best(&AudioSettings::default()).is_ok());
        assert_eq!(registry.names(), vec!["low", "high", "disabled"]);
    }

    #[test]
    fn zero_scores_are_never_selected() {
        let mut registry = BackendRegistry::new();
        registry.register(Box::new(FakeFactory { name: "disabled", score: 0 }));
        assert!(registry.create_best(&AudioSettings::default()).is_err());
    }
}
