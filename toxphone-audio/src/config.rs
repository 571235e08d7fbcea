//! Audio configuration
//!
//! JSON configuration for the frame geometry of both pipelines, the
//! buffer graph, and the processing stage. Every section falls back to its
//! defaults, so a partial file such as `{"record": {"latency_micros": 10000}}`
//! is valid.
//!
//! # Example
//!
//! ```no_run
//! use toxphone_audio::config::ConfigManager;
//!
//! let config = ConfigManager::load_or_default("toxphone-audio.json").unwrap();
//! config.validate().unwrap();
//! ```

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::buffer::{DEFAULT_CAPACITY_FRAMES, MAX_CAPACITY_FRAMES};
use crate::audio::geometry::FrameParams;
use crate::audio::pipeline::PipelineLayout;
use crate::audio::worker::DEFAULT_POLL_INTERVAL;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Value outside its allowed range
    #[error("Invalid config: {0}")]
    Invalid(String),
}

/// Result type for configuration operations
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Top-level audio configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AudioConfig {
    /// Geometry defaults for the record pipeline
    pub record: FrameParams,
    /// Geometry defaults for the voice pipeline
    pub voice: FrameParams,
    /// Buffer graph
    pub buffer: BufferConfig,
    /// Record processing stage
    pub processing: ProcessingConfig,
}

/// Buffer graph configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BufferConfig {
    /// Depth of every ring buffer in frames (1 - 64)
    pub capacity_frames: usize,
    /// Number of buffers on the record path
    pub record_stages: usize,
    /// Idle sleep of stage workers in microseconds
    pub worker_poll_micros: u64,
}

impl Default for BufferConfig {
    fn default() -> Self {
        let layout = PipelineLayout::default();
        Self {
            capacity_frames: DEFAULT_CAPACITY_FRAMES,
            record_stages: layout.record_stages,
            worker_poll_micros: DEFAULT_POLL_INTERVAL.as_micros() as u64,
        }
    }
}

impl BufferConfig {
    /// Buffer graph described by this section
    pub fn layout(&self) -> PipelineLayout {
        PipelineLayout {
            capacity_frames: self.capacity_frames,
            record_stages: self.record_stages,
            ..PipelineLayout::default()
        }
    }

    /// Worker idle sleep
    pub fn worker_poll(&self) -> Duration {
        Duration::from_micros(self.worker_poll_micros)
    }
}

/// Processing stage configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProcessingConfig {
    /// Linear gain applied to captured audio (0.0 - 8.0)
    pub gain: f32,
}

impl Default for ProcessingConfig {
    fn default() -> Self {
        Self { gain: 1.0 }
    }
}

const MAX_GAIN: f32 = 8.0;

impl AudioConfig {
    /// Check every value against its allowed range
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` naming the first offending field.
    pub fn validate(&self) -> ConfigResult<()> {
        self.record
            .build()
            .map_err(|e| ConfigError::Invalid(format!("record: {}", e)))?;
        self.voice
            .build()
            .map_err(|e| ConfigError::Invalid(format!("voice: {}", e)))?;

        if self.buffer.capacity_frames == 0 || self.buffer.capacity_frames > MAX_CAPACITY_FRAMES {
            return Err(ConfigError::Invalid(format!(
                "buffer.capacity_frames must be 1..={}, got {}",
                MAX_CAPACITY_FRAMES, self.buffer.capacity_frames
            )));
        }
        if self.buffer.record_stages == 0 {
            return Err(ConfigError::Invalid(
                "buffer.record_stages must be at least 1".to_string(),
            ));
        }
        if self.buffer.worker_poll_micros == 0 {
            return Err(ConfigError::Invalid(
                "buffer.worker_poll_micros must be greater than zero".to_string(),
            ));
        }
        if !self.processing.gain.is_finite()
            || self.processing.gain < 0.0
            || self.processing.gain > MAX_GAIN
        {
            return Err(ConfigError::Invalid(format!(
                "processing.gain must be 0.0..={}, got {}",
                MAX_GAIN, self.processing.gain
            )));
        }
        Ok(())
    }
}

/// Loads and saves [`AudioConfig`] as JSON
pub struct ConfigManager;

impl ConfigManager {
    /// Load configuration from `path`
    ///
    /// # Errors
    ///
    /// Fails if the file is missing, unreadable, or not valid JSON.
    pub fn load(path: impl AsRef<Path>) -> ConfigResult<AudioConfig> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Loading config");

        let content = std::fs::read_to_string(path)?;
        let config: AudioConfig = serde_json::from_str(&content)?;

        tracing::info!(path = %path.display(), "Config loaded successfully");
        Ok(config)
    }

    /// Load configuration from `path`, or defaults if the file does not exist
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<AudioConfig> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            tracing::info!(path = %path.display(), "Config file not found, using defaults");
            Ok(AudioConfig::default())
        }
    }

    /// Save configuration to `path`, creating parent directories
    pub fn save(path: impl AsRef<Path>, config: &AudioConfig) -> ConfigResult<()> {
        let path = path.as_ref();
        tracing::debug!(path = %path.display(), "Saving config");

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let content = serde_json::to_string_pretty(config)?;
        std::fs::write(path, content)?;

        tracing::info!(path = %path.display(), "Config saved successfully");
        Ok(())
    }
}
