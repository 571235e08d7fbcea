use thiserror::Error;

use crate::audio::registry::PipelineKind;

/// Audio-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AudioError {
    /// Frame geometry parameters are malformed or inconsistent
    #[error("Invalid frame geometry: {0}")]
    InvalidGeometry(String),

    /// A read or write used a slice whose length is not the buffer's frame size
    #[error("Frame size mismatch on {stage}: expected {expected} bytes, got {actual}")]
    FrameSizeMismatch {
        /// Stage whose buffer was addressed
        stage: String,
        /// Frame size the buffer was built for
        expected: usize,
        /// Length the caller supplied
        actual: usize,
    },

    /// Ring buffer capacity is out of range
    #[error("Invalid buffer capacity: {0} frames")]
    InvalidCapacity(usize),

    /// Stage index does not exist in the pipeline
    #[error("{pipeline} pipeline has no stage {index}")]
    StageOutOfRange {
        /// Pipeline addressed
        pipeline: PipelineKind,
        /// Requested stage index
        index: usize,
    },

    /// The requested producer or consumer is already checked out
    #[error("{endpoint} of {stage} is already checked out")]
    EndpointCheckedOut {
        /// Stage whose endpoint was requested
        stage: String,
        /// "producer" or "consumer"
        endpoint: &'static str,
    },

    /// A handle was returned to a stage it was not built for
    #[error("Endpoint does not belong to {0}")]
    ForeignEndpoint(String),

    /// Buffers cannot be rebuilt while handles are out
    #[error("{pipeline} pipeline is busy: {outstanding} endpoint(s) still checked out")]
    PipelineBusy {
        /// Pipeline that refused to rebuild
        pipeline: PipelineKind,
        /// Number of live handles outside the pipeline
        outstanding: usize,
    },

    /// A processing worker thread could not be started or died
    #[error("Worker failed: {0}")]
    WorkerFailed(String),

    /// No audio device found
    #[error("No audio device found")]
    DeviceNotFound,

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildFailed(String),

    /// Audio stream error
    #[error("Audio stream error: {0}")]
    StreamError(String),

    /// Failed to get device configuration
    #[error("Failed to get device configuration: {0}")]
    DeviceConfig(String),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
