//! Application-level error handling
//!
//! Aggregates the module errors into one [`AppError`] with a stable
//! [`ErrorCode`] for callers that report failures outside the process.
//!
//! # Example
//!
//! ```
//! use toxphone_audio::audio::AudioError;
//! use toxphone_audio::utils::error::{AppError, ErrorCode};
//!
//! let err = AppError::from(AudioError::DeviceNotFound);
//! assert_eq!(err.code(), ErrorCode::AudioDeviceNotFound);
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::audio::error::AudioError;
use crate::config::ConfigError;

/// Application error type
#[derive(Error, Debug)]
pub enum AppError {
    /// Audio error
    #[error("Audio error: {0}")]
    Audio(#[from] AudioError),

    /// Configuration error
    #[error("Config error: {0}")]
    Config(#[from] ConfigError),

    /// Internal error
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Stable error codes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    // Geometry and buffers
    /// Frame parameters rejected
    AudioInvalidGeometry,
    /// Read or write with the wrong frame size
    AudioFrameSizeMismatch,
    /// Ring buffer capacity rejected
    AudioInvalidCapacity,
    /// Stage index or endpoint misuse
    AudioStageUnavailable,
    /// Rebuild refused while handles are out
    AudioPipelineBusy,
    /// Processing worker failed
    AudioWorkerFailed,

    // Devices
    /// No input or output device
    AudioDeviceNotFound,
    /// Stream could not be built or failed while running
    AudioStreamError,

    // Configuration
    /// Configuration file could not be read or written
    ConfigIoFailed,
    /// Configuration file is not valid JSON
    ConfigParseFailed,
    /// Configuration value out of range
    ConfigInvalid,

    /// Internal error
    InternalError,
}

/// Serializable error report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorContext {
    /// Error code
    pub code: ErrorCode,
    /// Short message
    pub message: String,
    /// Full error chain
    pub detail: Option<String>,
    /// Whether retrying may succeed
    pub recoverable: bool,
}

impl ErrorContext {
    /// Create a new error context
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
            detail: None,
            recoverable: true,
        }
    }

    /// Attach details
    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    /// Mark as not recoverable
    pub fn not_recoverable(mut self) -> Self {
        self.recoverable = false;
        self
    }
}

impl AppError {
    /// Error code for this error
    pub fn code(&self) -> ErrorCode {
        match self {
            AppError::Audio(AudioError::InvalidGeometry(_)) => ErrorCode::AudioInvalidGeometry,
            AppError::Audio(AudioError::FrameSizeMismatch { .. }) => {
                ErrorCode::AudioFrameSizeMismatch
            }
            AppError::Audio(AudioError::InvalidCapacity(_)) => ErrorCode::AudioInvalidCapacity,
            AppError::Audio(
                AudioError::StageOutOfRange { .. }
                | AudioError::EndpointCheckedOut { .. }
                | AudioError::ForeignEndpoint(_),
            ) => ErrorCode::AudioStageUnavailable,
            AppError::Audio(AudioError::PipelineBusy { .. }) => ErrorCode::AudioPipelineBusy,
            AppError::Audio(AudioError::WorkerFailed(_)) => ErrorCode::AudioWorkerFailed,
            AppError::Audio(AudioError::DeviceNotFound) => ErrorCode::AudioDeviceNotFound,
            AppError::Audio(
                AudioError::StreamBuildFailed(_)
                | AudioError::StreamError(_)
                | AudioError::DeviceConfig(_),
            ) => ErrorCode::AudioStreamError,

            AppError::Config(ConfigError::Io(_)) => ErrorCode::ConfigIoFailed,
            AppError::Config(ConfigError::Json(_)) => ErrorCode::ConfigParseFailed,
            AppError::Config(ConfigError::Invalid(_)) => ErrorCode::ConfigInvalid,

            AppError::Internal(_) => ErrorCode::InternalError,
        }
    }

    /// Short message for the operator, without the error chain
    pub fn user_message(&self) -> String {
        match self {
            AppError::Audio(AudioError::DeviceNotFound) => {
                "No audio device found, check the audio settings".to_string()
            }
            AppError::Audio(AudioError::PipelineBusy { pipeline, .. }) => {
                format!("Stop the {} stream before changing its format", pipeline)
            }
            AppError::Audio(AudioError::InvalidGeometry(_)) => {
                "Unsupported audio format".to_string()
            }
            AppError::Audio(_) => "Audio error".to_string(),
            AppError::Config(ConfigError::Json(_)) => "Configuration file is malformed".to_string(),
            AppError::Config(_) => "Configuration error".to_string(),
            AppError::Internal(msg) => format!("Internal error: {}", msg),
        }
    }

    /// Serializable report, printed by `toxphone-loopback` on failure
    pub fn context(&self) -> ErrorContext {
        let ctx = ErrorContext::new(self.code(), self.user_message()).with_detail(self.to_string());
        if self.is_recoverable() {
            ctx
        } else {
            ctx.not_recoverable()
        }
    }

    /// Whether retrying the operation may succeed
    ///
    /// A busy pipeline recovers once its handles are returned; device errors
    /// may clear when hardware changes. Malformed input does not.
    pub fn is_recoverable(&self) -> bool {
        match self {
            AppError::Audio(
                AudioError::PipelineBusy { .. }
                | AudioError::EndpointCheckedOut { .. }
                | AudioError::DeviceNotFound
                | AudioError::StreamBuildFailed(_)
                | AudioError::StreamError(_)
                | AudioError::DeviceConfig(_),
            ) => true,
            AppError::Audio(_) => false,
            AppError::Config(ConfigError::Io(_)) => true,
            AppError::Config(_) | AppError::Internal(_) => false,
        }
    }
}

/// Result type for application operations
pub type AppResult<T> = Result<T, AppError>;

impl From<String> for AppError {
    fn from(msg: String) -> Self {
        AppError::Internal(msg)
    }
}

impl From<&str> for AppError {
    fn from(msg: &str) -> Self {
        AppError::Internal(msg.to_string())
    }
}
