use super::error::OutputError;

/// Output engine state machine.
///
/// State transitions:
/// ```text
/// idle → opening → running ↔ paused
///                     ↓
///                  draining → stopped
/// ```
/// `errored` is reachable from any state on an unrecoverable backend
/// failure; `kill_audio` forces any state to `stopped`.
#[derive(Debug, Clone, PartialEq)]
pub enum OutputState {
    Idle,
    Opening,
    Running,
    Paused,
    Draining,
    Stopped,
    Errored(OutputError),
}

impl OutputState {
    pub fn is_idle(&self) -> bool {
        matches!(self, Self::Idle)
    }

    pub fn is_running(&self) -> bool {
        matches!(self, Self::Running)
    }

    pub fn is_paused(&self) -> bool {
        matches!(self, Self::Paused)
    }

    /// Running, paused or draining: the device is open and the output
    /// thread is alive.
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Running | Self::Paused | Self::Draining)
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Stopped | Self::Errored(_))
    }

    /// The error, if the engine has failed.
    pub fn error(&self) -> Option<&OutputError> {
        match self {
            Self::Errored(e) => Some(e),
            _ => None,
        }
    }
}
