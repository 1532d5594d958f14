//! Configuration documents and their persistence

pub mod recording;
pub mod store;

pub use recording::RecordingConfig;
pub use store::{default_config_dir, ConfigStore};
