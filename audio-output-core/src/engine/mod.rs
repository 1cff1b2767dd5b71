//! Pipeline orchestration: the output engine and its media clock.

pub mod clock;
pub mod output;

pub use clock::AudioClock;
pub use output::OutputEngine;
