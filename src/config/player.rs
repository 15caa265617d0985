//! Player settings.
//!
//! Every field has a default, so a config file only needs the settings it changes.
//! Command-line flags are applied on top of the loaded file and the result is
//! validated once, before any device or thread is touched.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::dsp::Quality;
use crate::engine::{LiveOptions, MAX_OUTPUT_RATE, MIN_OUTPUT_RATE};
use crate::queue::DEFAULT_EVENT_CAPACITY;

/// Error type for config operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid config {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("sample rate {0} Hz is outside {}..={}", MIN_OUTPUT_RATE, MAX_OUTPUT_RATE)]
    SampleRate(u32),

    #[error("buffer size must be at least one frame")]
    BufferSize,

    #[error("invalid gain {0}")]
    Gain(f32),

    #[error("invalid highpass cutoff {0} Hz")]
    Filter(f32),

    #[error("event capacity {0} is not a non-zero power of two")]
    EventCapacity(usize),

    #[error("invalid maximum tail {0} s")]
    Tail(f32),
}

/// Playback and rendering settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Output sample rate in Hz.
    pub sample_rate: u32,
    /// Device buffer size in frames.
    pub buffer_frames: usize,
    /// Linear output gain.
    pub gain: f32,
    /// Highpass cutoff in Hz; 0 disables the filter.
    pub filter_hz: f32,
    pub stereo: bool,
    pub looping: bool,
    /// 0-based song index.
    pub song: usize,
    pub quality: Quality,
    /// Longest tail rendered after the end of a bulk render.
    pub max_tail_secs: f32,
    /// Live input ring capacity.
    pub event_capacity: usize,
    pub device_timeout_ms: u64,
    pub restart_backoff_ms: u64,
    pub max_restarts: u32,
}

impl Default for PlayerConfig {
    fn default() -> Self {
        Self {
            sample_rate: 44_100,
            buffer_frames: 4096,
            gain: 1.0,
            filter_hz: 5.0,
            stereo: true,
            looping: true,
            song: 0,
            quality: Quality::Cubic,
            max_tail_secs: 5.0,
            event_capacity: DEFAULT_EVENT_CAPACITY,
            device_timeout_ms: 200,
            restart_backoff_ms: 500,
            max_restarts: 5,
        }
    }
}

impl PlayerConfig {
    /// Checks every setting, failing on the first bad one.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(MIN_OUTPUT_RATE..=MAX_OUTPUT_RATE).contains(&self.sample_rate) {
            return Err(ConfigError::SampleRate(self.sample_rate));
        }
        if self.buffer_frames == 0 {
            return Err(ConfigError::BufferSize);
        }
        if !self.gain.is_finite() || self.gain <= 0.0 {
            return Err(ConfigError::Gain(self.gain));
        }
        if !self.filter_hz.is_finite() || self.filter_hz < 0.0 {
            return Err(ConfigError::Filter(self.filter_hz));
        }
        if !self.event_capacity.is_power_of_two() {
            return Err(ConfigError::EventCapacity(self.event_capacity));
        }
        if !self.max_tail_secs.is_finite() || self.max_tail_secs <= 0.0 {
            return Err(ConfigError::Tail(self.max_tail_secs));
        }
        Ok(())
    }

    pub fn channels(&self) -> u16 {
        if self.stereo {
            2
        } else {
            1
        }
    }

    pub fn max_tail(&self) -> Duration {
        Duration::from_secs_f32(self.max_tail_secs)
    }

    /// Render thread options.
    pub fn live_options(&self, play_once: bool) -> LiveOptions {
        LiveOptions {
            device_timeout: Duration::from_millis(self.device_timeout_ms),
            restart_backoff: Duration::from_millis(self.restart_backoff_ms),
            max_restarts: self.max_restarts,
            play_once,
        }
    }
}

/// Save a config to a JSON file.
pub fn save_to_file(config: &PlayerConfig, path: &Path) -> Result<(), ConfigError> {
    let json = serde_json::to_string_pretty(config).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    std::fs::write(path, json).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })
}

/// Load and validate a config from a JSON file.
pub fn load_from_file(path: &Path) -> Result<PlayerConfig, ConfigError> {
    let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let config: PlayerConfig = serde_json::from_str(&json).map_err(|source| ConfigError::Parse {
        path: path.to_path_buf(),
        source,
    })?;
    config.validate()?;
    Ok(config)
}
