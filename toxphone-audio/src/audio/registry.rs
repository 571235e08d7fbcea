use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::audio::error::AudioResult;
use crate::audio::geometry::{FrameGeometry, FrameParams};

/// The two audio pipelines of a call
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PipelineKind {
    /// Capture -> processing -> encode/send
    Record,
    /// Receive/decode -> playback
    Voice,
}

impl PipelineKind {
    /// Name used in logs and stage labels
    pub fn name(&self) -> &'static str {
        match self {
            Self::Record => "record",
            Self::Voice => "voice",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Current frame geometry of each pipeline
///
/// Each slot is either unset or holds a shared, immutable
/// [`FrameGeometry`]. Reads are lock-free; replacing a slot is a single
/// atomic pointer swap, so a control thread can reconfigure while audio
/// threads keep reading.
///
/// The registry does not own buffers. After a new geometry is installed,
/// buffers built against the old one stay valid until they are rebuilt
/// (see [`AudioSubsystem::reconfigure`](crate::audio::AudioSubsystem::reconfigure)).
///
/// # Example
/// ```
/// use toxphone_audio::audio::{FrameGeometryRegistry, FrameParams, PipelineKind};
///
/// let registry = FrameGeometryRegistry::with_defaults();
/// let record = registry.get(PipelineKind::Record);
/// assert_eq!(record.frame_byte_size(), 1920);
///
/// let stereo = FrameParams { channels: 2, ..FrameParams::default() };
/// let installed = registry.set(PipelineKind::Record, Some(stereo), false).unwrap();
/// assert_eq!(installed.frame_byte_size(), 3840);
/// ```
pub struct FrameGeometryRegistry {
    record: ArcSwapOption<FrameGeometry>,
    voice: ArcSwapOption<FrameGeometry>,
    record_default: Arc<FrameGeometry>,
    voice_default: Arc<FrameGeometry>,
}

impl FrameGeometryRegistry {
    /// Create a registry with explicit per-pipeline defaults
    ///
    /// Both slots start unset; the defaults are installed on first read or
    /// on reset.
    ///
    /// # Errors
    /// Returns `AudioError::InvalidGeometry` if either default is invalid.
    pub fn new(record_defaults: FrameParams, voice_defaults: FrameParams) -> AudioResult<Self> {
        let record_default = Arc::new(record_defaults.build()?);
        let voice_default = Arc::new(voice_defaults.build()?);

        debug!(
            record = %record_default,
            voice = %voice_default,
            "Frame geometry registry created"
        );

        Ok(Self {
            record: ArcSwapOption::empty(),
            voice: ArcSwapOption::empty(),
            record_default,
            voice_default,
        })
    }

    /// Create a registry using [`FrameParams::default`] for both pipelines
    pub fn with_defaults() -> Self {
        match Self::new(FrameParams::default(), FrameParams::default()) {
            Ok(registry) => registry,
            Err(e) => unreachable!("built-in frame geometry is invalid: {}", e),
        }
    }

    /// Current geometry of a pipeline
    ///
    /// If the slot is unset, the pipeline's default is installed and
    /// returned. Concurrent first reads all observe the same instance.
    pub fn get(&self, kind: PipelineKind) -> Arc<FrameGeometry> {
        let slot = self.slot(kind);
        if let Some(current) = slot.load_full() {
            return current;
        }

        let fallback = Arc::clone(self.default_for(kind));
        let previous = slot.rcu(|current| match current {
            Some(existing) => Some(Arc::clone(existing)),
            None => Some(Arc::clone(&fallback)),
        });

        match previous {
            Some(existing) => existing,
            None => {
                info!(pipeline = %kind, geometry = %fallback, "Installed default frame geometry");
                fallback
            }
        }
    }

    /// Replace or query a pipeline's geometry
    ///
    /// # Arguments
    /// * `kind` - Pipeline to address
    /// * `candidate` - New base parameters; derived sizes are recomputed
    /// * `reset` - Without a candidate, re-install the default
    ///
    /// # Returns
    /// The geometry in effect after the call.
    ///
    /// # Errors
    /// Returns `AudioError::InvalidGeometry` if the candidate is invalid; the
    /// current geometry is left untouched in that case.
    pub fn set(
        &self,
        kind: PipelineKind,
        candidate: Option<FrameParams>,
        reset: bool,
    ) -> AudioResult<Arc<FrameGeometry>> {
        match candidate {
            Some(params) => Ok(self.install(kind, params.build()?)),
            None if reset => {
                let default = Arc::clone(self.default_for(kind));
                self.slot(kind).store(Some(Arc::clone(&default)));
                info!(pipeline = %kind, geometry = %default, "Frame geometry reset to default");
                Ok(default)
            }
            None => Ok(self.get(kind)),
        }
    }

    /// Install an already-built geometry
    pub fn install(&self, kind: PipelineKind, geometry: FrameGeometry) -> Arc<FrameGeometry> {
        let geometry = Arc::new(geometry);
        self.slot(kind).store(Some(Arc::clone(&geometry)));
        info!(pipeline = %kind, geometry = %geometry, "Frame geometry installed");
        geometry
    }

    /// Put back a geometry that was current before a failed reconfiguration
    pub(crate) fn restore(&self, kind: PipelineKind, geometry: Arc<FrameGeometry>) {
        self.slot(kind).store(Some(geometry));
    }

    /// Whether a geometry has been installed for the pipeline
    pub fn is_set(&self, kind: PipelineKind) -> bool {
        self.slot(kind).load().is_some()
    }

    /// Default geometry of a pipeline
    pub fn defaults(&self, kind: PipelineKind) -> Arc<FrameGeometry> {
        Arc::clone(self.default_for(kind))
    }

    fn slot(&self, kind: PipelineKind) -> &ArcSwapOption<FrameGeometry> {
        match kind {
            PipelineKind::Record => &self.record,
            PipelineKind::Voice => &self.voice,
        }
    }

    fn default_for(&self, kind: PipelineKind) -> &Arc<FrameGeometry> {
        match kind {
            PipelineKind::Record => &self.record_default,
            PipelineKind::Voice => &self.voice_default,
        }
    }
}

impl Default for FrameGeometryRegistry {
    fn default() -> Self {
        Self::with_defaults()
    }
}
