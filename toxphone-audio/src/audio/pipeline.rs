use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audio::buffer::{
    BufferMonitor, FrameConsumer, FrameProducer, FrameRingBuffer, StageId, StatsSnapshot,
    DEFAULT_CAPACITY_FRAMES,
};
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::geometry::{FrameGeometry, FrameParams};
use crate::audio::registry::{FrameGeometryRegistry, PipelineKind};
use crate::config::AudioConfig;

/// Record stage fed by the capture callback (the first record stage)
pub const RECORD_CAPTURE_STAGE: usize = 0;

/// Record stage fed by the processing worker, drained by the encoder (the
/// second record stage)
pub const RECORD_PROCESSED_STAGE: usize = 1;

/// Voice stage fed by the decoder, drained by the playback callback
pub const VOICE_PLAYBACK_STAGE: usize = 0;

/// One ring buffer between two pipeline stages
///
/// The stage keeps its producer and consumer until a thread checks them
/// out. A checked-out handle is returned either with `restore_*` or by
/// dropping it; once it is dropped the stage has no handle to give out
/// until the pipeline is rebuilt.
pub struct StageBuffer {
    id: StageId,
    monitor: BufferMonitor,
    producer: Option<FrameProducer>,
    consumer: Option<FrameConsumer>,
}

impl StageBuffer {
    fn build(id: StageId, geometry: &Arc<FrameGeometry>, capacity_frames: usize) -> AudioResult<Self> {
        let (producer, consumer) = FrameRingBuffer::new(id, Arc::clone(geometry), capacity_frames)?;
        Ok(Self {
            id,
            monitor: producer.monitor(),
            producer: Some(producer),
            consumer: Some(consumer),
        })
    }

    /// Stage identifier
    pub fn id(&self) -> StageId {
        self.id
    }

    /// Diagnostics view of the underlying buffer
    pub fn monitor(&self) -> &BufferMonitor {
        &self.monitor
    }

    /// Geometry the buffer was built against
    pub fn geometry(&self) -> &Arc<FrameGeometry> {
        self.monitor.geometry()
    }

    /// Bytes waiting to be read
    pub fn available_bytes(&self) -> u32 {
        self.monitor.available_bytes()
    }

    /// Total capacity in bytes
    pub fn capacity_bytes(&self) -> u32 {
        self.monitor.capacity_bytes()
    }

    /// Hand the writing end to a producer thread
    ///
    /// # Errors
    /// Returns `AudioError::EndpointCheckedOut` if the producer is already
    /// out (or was dropped after being checked out).
    pub fn take_producer(&mut self) -> AudioResult<FrameProducer> {
        let mut producer = self.producer.take().ok_or_else(|| AudioError::EndpointCheckedOut {
            stage: self.id.to_string(),
            endpoint: "producer",
        })?;
        producer.mark_checked_out();
        debug!(stage = %self.id, "Producer checked out");
        Ok(producer)
    }

    /// Hand the reading end to a consumer thread
    ///
    /// # Errors
    /// Returns `AudioError::EndpointCheckedOut` if the consumer is already
    /// out (or was dropped after being checked out).
    pub fn take_consumer(&mut self) -> AudioResult<FrameConsumer> {
        let mut consumer = self.consumer.take().ok_or_else(|| AudioError::EndpointCheckedOut {
            stage: self.id.to_string(),
            endpoint: "consumer",
        })?;
        consumer.mark_checked_out();
        debug!(stage = %self.id, "Consumer checked out");
        Ok(consumer)
    }

    /// Return a producer after its thread has stopped
    ///
    /// # Errors
    /// Returns `AudioError::ForeignEndpoint` if the handle belongs to another
    /// buffer (for instance one replaced by a rebuild); the handle is dropped.
    pub fn restore_producer(&mut self, mut producer: FrameProducer) -> AudioResult<()> {
        if !producer.belongs_to(&self.monitor) {
            return Err(AudioError::ForeignEndpoint(self.id.to_string()));
        }
        producer.mark_returned();
        self.producer = Some(producer);
        Ok(())
    }

    /// Return a consumer after its thread has stopped
    ///
    /// # Errors
    /// Returns `AudioError::ForeignEndpoint` if the handle belongs to another
    /// buffer; the handle is dropped.
    pub fn restore_consumer(&mut self, mut consumer: FrameConsumer) -> AudioResult<()> {
        if !consumer.belongs_to(&self.monitor) {
            return Err(AudioError::ForeignEndpoint(self.id.to_string()));
        }
        consumer.mark_returned();
        self.consumer = Some(consumer);
        Ok(())
    }

    /// Whether the stage holds its producer
    pub fn has_producer(&self) -> bool {
        self.producer.is_some()
    }

    /// Whether the stage holds its consumer
    pub fn has_consumer(&self) -> bool {
        self.consumer.is_some()
    }

    /// Whether no checked-out handle of this stage is still alive
    pub fn is_quiesced(&self) -> bool {
        self.monitor.checked_out() == 0
    }

    /// Counters and fill level for reporting
    pub fn stats(&self) -> StageStats {
        StageStats {
            stage: self.id,
            frame_bytes: self.geometry().frame_byte_size(),
            available_bytes: self.available_bytes(),
            capacity_bytes: self.capacity_bytes(),
            counters: self.monitor.stats(),
        }
    }
}

/// Point-in-time report of one stage
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageStats {
    /// Stage identifier
    pub stage: StageId,
    /// Frame size the stage was built for
    pub frame_bytes: u32,
    /// Bytes waiting to be read
    pub available_bytes: u32,
    /// Total capacity in bytes
    pub capacity_bytes: u32,
    /// Event counters
    pub counters: StatsSnapshot,
}

/// Ordered stage buffers of one pipeline, all sharing one geometry
pub struct PipelineBuffers {
    kind: PipelineKind,
    geometry: Arc<FrameGeometry>,
    capacity_frames: usize,
    generation: u64,
    stages: Vec<StageBuffer>,
}

impl PipelineBuffers {
    /// Build every stage of a pipeline
    ///
    /// # Arguments
    /// * `kind` - Pipeline the buffers serve
    /// * `geometry` - Frame shape for every stage
    /// * `stage_count` - Number of buffers (at least one)
    /// * `capacity_frames` - Depth of each buffer in frames
    pub fn build(
        kind: PipelineKind,
        geometry: Arc<FrameGeometry>,
        stage_count: usize,
        capacity_frames: usize,
    ) -> AudioResult<Self> {
        let stages = Self::build_stages(kind, &geometry, stage_count, capacity_frames)?;
        info!(
            pipeline = %kind,
            stages = stage_count,
            frames = capacity_frames,
            geometry = %geometry,
            "Pipeline buffers built"
        );
        Ok(Self {
            kind,
            geometry,
            capacity_frames,
            generation: 0,
            stages,
        })
    }

    fn build_stages(
        kind: PipelineKind,
        geometry: &Arc<FrameGeometry>,
        stage_count: usize,
        capacity_frames: usize,
    ) -> AudioResult<Vec<StageBuffer>> {
        if stage_count == 0 {
            return Err(AudioError::StageOutOfRange { pipeline: kind, index: 0 });
        }
        (0..stage_count)
            .map(|index| StageBuffer::build(StageId::new(kind, index), geometry, capacity_frames))
            .collect()
    }

    /// Pipeline these buffers serve
    pub fn kind(&self) -> PipelineKind {
        self.kind
    }

    /// Geometry every stage was built against
    pub fn geometry(&self) -> &Arc<FrameGeometry> {
        &self.geometry
    }

    /// Number of rebuilds since construction
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// Depth of each buffer in frames
    pub fn capacity_frames(&self) -> usize {
        self.capacity_frames
    }

    /// Number of stages
    pub fn stage_count(&self) -> usize {
        self.stages.len()
    }

    /// All stages in pipeline order
    pub fn stages(&self) -> &[StageBuffer] {
        &self.stages
    }

    /// One stage by index
    pub fn stage(&self, index: usize) -> AudioResult<&StageBuffer> {
        self.stages.get(index).ok_or(AudioError::StageOutOfRange {
            pipeline: self.kind,
            index,
        })
    }

    /// One stage by index, for checking handles in and out
    pub fn stage_mut(&mut self, index: usize) -> AudioResult<&mut StageBuffer> {
        let kind = self.kind;
        self.stages
            .get_mut(index)
            .ok_or(AudioError::StageOutOfRange { pipeline: kind, index })
    }

    /// Live handles checked out of any stage
    pub fn outstanding(&self) -> usize {
        self.stages.iter().map(|stage| stage.monitor.checked_out()).sum()
    }

    /// Whether every producer and consumer thread has let go of its handle
    pub fn is_quiesced(&self) -> bool {
        self.outstanding() == 0
    }

    /// Replace every stage with fresh buffers for `geometry`
    ///
    /// All new buffers are built before any old one is dropped, so a failure
    /// leaves the pipeline as it was.
    ///
    /// # Errors
    /// Returns `AudioError::PipelineBusy` while any handle is checked out.
    pub fn rebuild(&mut self, geometry: Arc<FrameGeometry>) -> AudioResult<()> {
        let outstanding = self.outstanding();
        if outstanding > 0 {
            warn!(pipeline = %self.kind, outstanding, "Refusing to rebuild busy pipeline");
            return Err(AudioError::PipelineBusy {
                pipeline: self.kind,
                outstanding,
            });
        }

        let stages =
            Self::build_stages(self.kind, &geometry, self.stages.len(), self.capacity_frames)?;
        self.stages = stages;
        self.geometry = geometry;
        self.generation += 1;

        info!(
            pipeline = %self.kind,
            generation = self.generation,
            geometry = %self.geometry,
            "Pipeline buffers rebuilt"
        );
        Ok(())
    }

    /// Reports for every stage
    pub fn stats(&self) -> Vec<StageStats> {
        self.stages.iter().map(StageBuffer::stats).collect()
    }
}

/// Shape of the buffer graph
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PipelineLayout {
    /// Depth of every buffer in frames
    pub capacity_frames: usize,
    /// Buffers on the record path
    pub record_stages: usize,
    /// Buffers on the voice path
    pub voice_stages: usize,
}

impl Default for PipelineLayout {
    fn default() -> Self {
        Self {
            capacity_frames: DEFAULT_CAPACITY_FRAMES,
            record_stages: 2,
            voice_stages: 1,
        }
    }
}

/// Reports for both pipelines
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubsystemStats {
    /// Record stages in order
    pub record: Vec<StageStats>,
    /// Voice stages in order
    pub voice: Vec<StageStats>,
}

/// Audio buffer subsystem of a call
///
/// Owns the geometry registry and the buffers of both pipelines. This is
/// the surface the application uses:
///
/// 1. `frame_info` to read or change a pipeline's geometry
/// 2. `record_buffer_stage` / `voice_buffer` to check handles out to threads
/// 3. `reconfigure` to switch geometry once those threads are stopped
///
/// # Example
/// ```
/// use toxphone_audio::audio::{AudioSubsystem, FrameParams, PipelineKind, RECORD_CAPTURE_STAGE};
///
/// let mut audio = AudioSubsystem::with_defaults().unwrap();
/// let capture = audio.record_buffer_stage(RECORD_CAPTURE_STAGE).unwrap();
/// assert_eq!(capture.capacity_bytes(), 4 * 1920);
///
/// let stereo = FrameParams { channels: 2, ..FrameParams::default() };
/// audio.reconfigure(PipelineKind::Record, Some(stereo), false).unwrap();
/// let capture = audio.record_buffer_stage(RECORD_CAPTURE_STAGE).unwrap();
/// assert_eq!(capture.capacity_bytes(), 4 * 3840);
/// ```
pub struct AudioSubsystem {
    registry: Arc<FrameGeometryRegistry>,
    record: PipelineBuffers,
    voice: PipelineBuffers,
}

impl AudioSubsystem {
    /// Build both pipelines from the registry's current geometry
    pub fn new(registry: Arc<FrameGeometryRegistry>, layout: PipelineLayout) -> AudioResult<Self> {
        let record = PipelineBuffers::build(
            PipelineKind::Record,
            registry.get(PipelineKind::Record),
            layout.record_stages,
            layout.capacity_frames,
        )?;
        let voice = PipelineBuffers::build(
            PipelineKind::Voice,
            registry.get(PipelineKind::Voice),
            layout.voice_stages,
            layout.capacity_frames,
        )?;

        Ok(Self {
            registry,
            record,
            voice,
        })
    }

    /// Build with the default registry and layout
    pub fn with_defaults() -> AudioResult<Self> {
        Self::new(
            Arc::new(FrameGeometryRegistry::with_defaults()),
            PipelineLayout::default(),
        )
    }

    /// Build from application configuration
    pub fn from_config(config: &AudioConfig) -> AudioResult<Self> {
        let registry = FrameGeometryRegistry::new(config.record, config.voice)?;
        Self::new(Arc::new(registry), config.buffer.layout())
    }

    /// Geometry registry, shareable with control threads
    pub fn registry(&self) -> &Arc<FrameGeometryRegistry> {
        &self.registry
    }

    /// Read or change a pipeline's frame geometry
    ///
    /// Same contract as [`FrameGeometryRegistry::set`]. Buffers are not
    /// touched; call [`refresh`](Self::refresh) or
    /// [`reconfigure`](Self::reconfigure) to rebuild them.
    pub fn frame_info(
        &self,
        kind: PipelineKind,
        override_params: Option<FrameParams>,
        reset: bool,
    ) -> AudioResult<Arc<FrameGeometry>> {
        self.registry.set(kind, override_params, reset)
    }

    /// Buffers of one pipeline
    pub fn pipeline(&self, kind: PipelineKind) -> &PipelineBuffers {
        match kind {
            PipelineKind::Record => &self.record,
            PipelineKind::Voice => &self.voice,
        }
    }

    /// Buffers of one pipeline, mutable
    pub fn pipeline_mut(&mut self, kind: PipelineKind) -> &mut PipelineBuffers {
        match kind {
            PipelineKind::Record => &mut self.record,
            PipelineKind::Voice => &mut self.voice,
        }
    }

    /// A record-path stage buffer
    ///
    /// Indices are 0-based: stage 1 of the record path is
    /// [`RECORD_CAPTURE_STAGE`] (0) and stage 2 is [`RECORD_PROCESSED_STAGE`]
    /// (1). Anything else is `StageOutOfRange`.
    pub fn record_buffer_stage(&mut self, index: usize) -> AudioResult<&mut StageBuffer> {
        self.record.stage_mut(index)
    }

    /// The voice-path buffer feeding playback
    pub fn voice_buffer(&mut self) -> &mut StageBuffer {
        // build() guarantees at least one stage
        &mut self.voice.stages[VOICE_PLAYBACK_STAGE]
    }

    /// Change a pipeline's geometry and rebuild its buffers
    ///
    /// Every producer and consumer of the pipeline must be stopped first.
    /// The registry is updated only after the pipeline is known to be idle,
    /// and is rolled back if the rebuild fails.
    ///
    /// # Errors
    /// - `AudioError::PipelineBusy` if handles are still checked out
    /// - `AudioError::InvalidGeometry` if the override is invalid
    pub fn reconfigure(
        &mut self,
        kind: PipelineKind,
        override_params: Option<FrameParams>,
        reset: bool,
    ) -> AudioResult<Arc<FrameGeometry>> {
        let outstanding = self.pipeline(kind).outstanding();
        if outstanding > 0 {
            return Err(AudioError::PipelineBusy {
                pipeline: kind,
                outstanding,
            });
        }

        let previous = self.registry.get(kind);
        let geometry = self.registry.set(kind, override_params, reset)?;

        if let Err(e) = self.pipeline_mut(kind).rebuild(Arc::clone(&geometry)) {
            warn!(pipeline = %kind, error = %e, "Rebuild failed, restoring previous geometry");
            self.registry.restore(kind, previous);
            return Err(e);
        }

        Ok(geometry)
    }

    /// Whether the registry holds a different geometry than the buffers
    pub fn is_stale(&self, kind: PipelineKind) -> bool {
        *self.registry.get(kind) != **self.pipeline(kind).geometry()
    }

    /// Rebuild a pipeline if its geometry is stale or a handle was dropped
    ///
    /// # Returns
    /// `true` if the buffers were rebuilt.
    pub fn refresh(&mut self, kind: PipelineKind) -> AudioResult<bool> {
        let missing_handle = self
            .pipeline(kind)
            .stages()
            .iter()
            .any(|stage| stage.is_quiesced() && !(stage.has_producer() && stage.has_consumer()));

        if !self.is_stale(kind) && !missing_handle {
            return Ok(false);
        }

        let geometry = self.registry.get(kind);
        self.pipeline_mut(kind).rebuild(geometry)?;
        Ok(true)
    }

    /// Reports for every stage of both pipelines
    pub fn stats(&self) -> SubsystemStats {
        SubsystemStats {
            record: self.record.stats(),
            voice: self.voice.stats(),
        }
    }
}
