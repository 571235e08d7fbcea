/// Frame-slotted ring buffers between pipeline stages
pub mod buffer;

/// Device callback adapters
pub mod callback;

/// Default input/output devices (cpal)
#[cfg(feature = "device-cpal")]
pub mod device;

/// Audio-related error types
pub mod error;

/// Frame geometry and its derived sizes
pub mod geometry;

/// Stage buffers of the record and voice pipelines
pub mod pipeline;

/// Per-pipeline geometry registry
pub mod registry;

/// Threads moving frames between stages
pub mod worker;

// Re-export commonly used types
pub use buffer::{
    BufferMonitor, FrameConsumer, FrameProducer, FrameRingBuffer, ReadOutcome, StageId,
    StatsSnapshot, WriteOutcome, DEFAULT_CAPACITY_FRAMES, MAX_CAPACITY_FRAMES,
};
pub use callback::{FrameAccumulator, FrameDrain};
#[cfg(feature = "device-cpal")]
pub use device::{default_input_format, default_output_format, CaptureStream, PlaybackStream};
pub use error::{AudioError, AudioResult};
pub use geometry::{DeviceFormat, FrameGeometry, FrameParams};
pub use pipeline::{
    AudioSubsystem, PipelineBuffers, PipelineLayout, StageBuffer, StageStats, SubsystemStats,
    RECORD_CAPTURE_STAGE, RECORD_PROCESSED_STAGE, VOICE_PLAYBACK_STAGE,
};
pub use registry::{FrameGeometryRegistry, PipelineKind};
pub use worker::{FrameProcessor, Passthrough, PcmGain, StageWorker, WorkerEndpoints};
