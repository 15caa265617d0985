//! Config module
//!
//! Player settings using serde and JSON, validated before playback starts.

pub mod player;

pub use player::{load_from_file, save_to_file, ConfigError, PlayerConfig};
