pub mod capabilities;
pub mod codec;
pub mod error;
pub mod format;
pub mod settings;
pub mod state;
