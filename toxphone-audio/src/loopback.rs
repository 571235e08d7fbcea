//! Synthetic call over the audio subsystem
//!
//! Runs the whole buffer graph without hardware or a network:
//!
//! ```text
//! tone capture -> record[0] -> gain worker -> record[1]
//!              -> echo worker -> voice[0] -> playback
//! ```
//!
//! The capture and playback threads run at the geometry's frame cadence,
//! the way device callbacks would. The echo worker stands in for
//! encode, transport and decode, so record and voice frames must be the
//! same size.

use std::f32::consts::TAU;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::audio::buffer::{FrameConsumer, FrameProducer, StageId};
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::geometry::FrameGeometry;
use crate::audio::pipeline::{
    AudioSubsystem, StageStats, SubsystemStats, RECORD_CAPTURE_STAGE, RECORD_PROCESSED_STAGE,
    VOICE_PLAYBACK_STAGE,
};
use crate::audio::registry::PipelineKind;
use crate::audio::worker::{Passthrough, PcmGain, StageWorker};
use crate::config::{AudioConfig, ProcessingConfig};
use crate::utils::error::AppResult;

/// Frequency of the generated tone
pub const TONE_FREQUENCY_HZ: f32 = 440.0;

/// Peak amplitude of the generated tone
pub const TONE_AMPLITUDE: f32 = 8_000.0;

/// Outcome of a loopback run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoopbackReport {
    /// Wall time the graph ran
    pub elapsed_ms: u64,
    /// Record geometry, human readable
    pub record_geometry: String,
    /// Voice geometry, human readable
    pub voice_geometry: String,
    /// Gain applied by the processing stage
    pub gain: f32,
    /// Frames produced by the tone generator
    pub frames_captured: u64,
    /// Frames through the gain worker
    pub frames_processed: u64,
    /// Frames through the echo worker
    pub frames_echoed: u64,
    /// Frames handed to playback, silence included
    pub frames_played: u64,
    /// Played frames that carried audio
    pub frames_with_audio: u64,
    /// Per-stage counters after all handles were returned
    pub stats: SubsystemStats,
}

impl LoopbackReport {
    /// Underruns seen by playback
    pub fn playback_underruns(&self) -> u64 {
        self.stats
            .voice
            .get(VOICE_PLAYBACK_STAGE)
            .map(|stage| stage.counters.underruns)
            .unwrap_or(0)
    }
}

/// Build a subsystem from `config` and run a loopback call for `duration`
///
/// # Errors
/// Invalid configuration, mismatched record and voice frame sizes, or a
/// failed worker.
pub fn run_loopback(config: &AudioConfig, duration: Duration) -> AppResult<LoopbackReport> {
    config.validate()?;
    let mut audio = AudioSubsystem::from_config(config)?;
    run_loopback_on(
        &mut audio,
        &config.processing,
        config.buffer.worker_poll(),
        duration,
    )
}

/// Run a loopback call on an existing subsystem
///
/// Every handle is checked back in before returning, so both pipelines are
/// quiesced and can be reconfigured afterwards. On error, handles held by
/// threads are dropped instead, which quiesces the pipelines as well.
pub fn run_loopback_on(
    audio: &mut AudioSubsystem,
    processing: &ProcessingConfig,
    poll_interval: Duration,
    duration: Duration,
) -> AppResult<LoopbackReport> {
    let record_geometry = Arc::clone(audio.pipeline(PipelineKind::Record).geometry());
    let voice_geometry = Arc::clone(audio.pipeline(PipelineKind::Voice).geometry());
    let gain = PcmGain::new(processing.gain, &record_geometry)?;
    // Checked before any handle leaves its stage
    if record_geometry.frame_bytes() != voice_geometry.frame_bytes() {
        return Err(AudioError::FrameSizeMismatch {
            stage: StageId::new(PipelineKind::Voice, VOICE_PLAYBACK_STAGE).to_string(),
            expected: voice_geometry.frame_bytes(),
            actual: record_geometry.frame_bytes(),
        }
        .into());
    }

    info!(
        record = %record_geometry,
        voice = %voice_geometry,
        gain = processing.gain,
        duration_ms = duration.as_millis() as u64,
        "Starting loopback"
    );

    let capture_producer = audio
        .record_buffer_stage(RECORD_CAPTURE_STAGE)?
        .take_producer()?;
    let gain_input = audio
        .record_buffer_stage(RECORD_CAPTURE_STAGE)?
        .take_consumer()?;
    let gain_output = audio
        .record_buffer_stage(RECORD_PROCESSED_STAGE)?
        .take_producer()?;
    let echo_input = audio
        .record_buffer_stage(RECORD_PROCESSED_STAGE)?
        .take_consumer()?;
    let echo_output = audio.voice_buffer().take_producer()?;
    let playback_consumer = audio.voice_buffer().take_consumer()?;

    let stop = Arc::new(AtomicBool::new(false));
    let frames_played = Arc::new(AtomicU64::new(0));
    let frames_with_audio = Arc::new(AtomicU64::new(0));

    // Downstream first so nothing piles up while the rest starts. Workers
    // join on drop if a later step fails.
    let echo = StageWorker::spawn(echo_input, echo_output, Passthrough, poll_interval)?;
    let gain_worker = StageWorker::spawn(gain_input, gain_output, gain, poll_interval)?;
    let playback = spawn_playback(
        playback_consumer,
        Arc::clone(&stop),
        Arc::clone(&frames_played),
        Arc::clone(&frames_with_audio),
    )?;
    let capture = match spawn_capture(capture_producer, Arc::clone(&stop)) {
        Ok(handle) => handle,
        Err(e) => {
            stop.store(true, Ordering::Release);
            if let Err(join_err) = join_thread("playback", playback) {
                warn!(error = %join_err, "Playback did not stop cleanly");
            }
            return Err(e.into());
        }
    };

    let started = Instant::now();
    thread::sleep(duration);

    stop.store(true, Ordering::Release);
    let capture_producer = join_thread("capture", capture)?;
    let gain_endpoints = gain_worker.stop()?;
    let echo_endpoints = echo.stop()?;
    let playback_consumer = join_thread("playback", playback)?;
    let elapsed = started.elapsed();

    audio
        .record_buffer_stage(RECORD_CAPTURE_STAGE)?
        .restore_producer(capture_producer)?;
    audio
        .record_buffer_stage(RECORD_CAPTURE_STAGE)?
        .restore_consumer(gain_endpoints.input)?;
    audio
        .record_buffer_stage(RECORD_PROCESSED_STAGE)?
        .restore_producer(gain_endpoints.output)?;
    audio
        .record_buffer_stage(RECORD_PROCESSED_STAGE)?
        .restore_consumer(echo_endpoints.input)?;
    audio.voice_buffer().restore_producer(echo_endpoints.output)?;
    audio.voice_buffer().restore_consumer(playback_consumer)?;

    // Each stage's writes are the frames that made it past the step before it
    let stats = audio.stats();
    let report = LoopbackReport {
        elapsed_ms: elapsed.as_millis() as u64,
        record_geometry: record_geometry.to_string(),
        voice_geometry: voice_geometry.to_string(),
        gain: processing.gain,
        frames_captured: frames_written(&stats.record, RECORD_CAPTURE_STAGE),
        frames_processed: frames_written(&stats.record, RECORD_PROCESSED_STAGE),
        frames_echoed: frames_written(&stats.voice, VOICE_PLAYBACK_STAGE),
        frames_played: frames_played.load(Ordering::Relaxed),
        frames_with_audio: frames_with_audio.load(Ordering::Relaxed),
        stats,
    };

    info!(
        captured = report.frames_captured,
        played = report.frames_played,
        underruns = report.playback_underruns(),
        "Loopback finished"
    );
    Ok(report)
}

/// Sine generator writing interleaved 16-bit little-endian frames
struct ToneGenerator {
    phase: f32,
    step: f32,
    channels: usize,
}

impl ToneGenerator {
    fn new(geometry: &FrameGeometry) -> Self {
        Self {
            phase: 0.0,
            step: TAU * TONE_FREQUENCY_HZ / geometry.sampling_rate_hz() as f32,
            channels: usize::from(geometry.channels()),
        }
    }

    fn fill(&mut self, frame: &mut [u8]) {
        for tick in frame.chunks_exact_mut(2 * self.channels) {
            let sample = (self.phase.sin() * TONE_AMPLITUDE) as i16;
            for channel in tick.chunks_exact_mut(2) {
                channel.copy_from_slice(&sample.to_le_bytes());
            }
            self.phase = (self.phase + self.step) % TAU;
        }
    }
}

fn spawn_capture(
    mut producer: FrameProducer,
    stop: Arc<AtomicBool>,
) -> AudioResult<JoinHandle<AudioResult<FrameProducer>>> {
    thread::Builder::new()
        .name("loopback-capture".to_string())
        .spawn(move || {
            let geometry = Arc::clone(producer.geometry());
            let mut tone = ToneGenerator::new(&geometry);
            let mut frame = vec![0u8; producer.frame_bytes()];
            let mut next_tick = Instant::now();

            while !stop.load(Ordering::Acquire) {
                tone.fill(&mut frame);
                let outcome = producer.write(&frame)?;
                if outcome.dropped_bytes() > 0 {
                    debug!(dropped = outcome.dropped_bytes(), "Capture overran record[0]");
                }

                next_tick += geometry.duration();
                sleep_until(next_tick);
            }
            Ok(producer)
        })
        .map_err(|e| AudioError::WorkerFailed(format!("failed to spawn capture: {}", e)))
}

fn spawn_playback(
    mut consumer: FrameConsumer,
    stop: Arc<AtomicBool>,
    played: Arc<AtomicU64>,
    with_audio: Arc<AtomicU64>,
) -> AudioResult<JoinHandle<AudioResult<FrameConsumer>>> {
    thread::Builder::new()
        .name("loopback-playback".to_string())
        .spawn(move || {
            let period = consumer.geometry().duration();
            let mut frame = vec![0u8; consumer.frame_bytes()];
            let mut next_tick = Instant::now();

            while !stop.load(Ordering::Acquire) {
                consumer.read(&mut frame)?;
                played.fetch_add(1, Ordering::Relaxed);
                if frame.iter().any(|&b| b != 0) {
                    with_audio.fetch_add(1, Ordering::Relaxed);
                }

                next_tick += period;
                sleep_until(next_tick);
            }
            Ok(consumer)
        })
        .map_err(|e| AudioError::WorkerFailed(format!("failed to spawn playback: {}", e)))
}

fn frames_written(stages: &[StageStats], index: usize) -> u64 {
    stages
        .get(index)
        .map(|stage| stage.counters.frames_written)
        .unwrap_or(0)
}

fn sleep_until(deadline: Instant) {
    let now = Instant::now();
    if deadline > now {
        thread::sleep(deadline - now);
    }
}

fn join_thread<T>(name: &str, handle: JoinHandle<AudioResult<T>>) -> AudioResult<T> {
    handle.join().map_err(|_| {
        warn!(thread = name, "Loopback thread panicked");
        AudioError::WorkerFailed(format!("{} panicked", name))
    })?
}
