//! Processing stage worker
//!
//! Drains one stage buffer at its own pace, transforms each frame and pushes
//! the result into the next stage. Runs on its own OS thread so the capture
//! callback upstream never waits on processing.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use tracing::{debug, error, info, warn};

use crate::audio::buffer::{FrameConsumer, FrameProducer};
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::geometry::FrameGeometry;

/// Default idle sleep between polls of an empty input stage
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Transformation applied by a processing stage
///
/// `input` and `output` are exactly one frame each.
pub trait FrameProcessor: Send + 'static {
    /// Transform one frame
    fn process(&mut self, input: &[u8], output: &mut [u8]) -> AudioResult<()>;

    /// Name used in logs
    fn name(&self) -> &'static str;
}

/// Copies frames unchanged
#[derive(Debug, Default, Clone, Copy)]
pub struct Passthrough;

impl FrameProcessor for Passthrough {
    fn process(&mut self, input: &[u8], output: &mut [u8]) -> AudioResult<()> {
        output.copy_from_slice(input);
        Ok(())
    }

    fn name(&self) -> &'static str {
        "passthrough"
    }
}

/// Scales 16-bit little-endian PCM, clamping to the sample range
#[derive(Debug, Clone, Copy)]
pub struct PcmGain {
    gain: f32,
}

impl PcmGain {
    /// Create a gain stage for `geometry`
    ///
    /// # Errors
    /// Returns `AudioError::InvalidGeometry` unless samples are 16-bit, or if
    /// the gain is negative or not finite.
    pub fn new(gain: f32, geometry: &FrameGeometry) -> AudioResult<Self> {
        if geometry.sample_size_bytes() != 2 {
            return Err(AudioError::InvalidGeometry(format!(
                "gain stage needs 16-bit samples, got {} bytes",
                geometry.sample_size_bytes()
            )));
        }
        if !gain.is_finite() || gain < 0.0 {
            return Err(AudioError::InvalidGeometry(format!("invalid gain {}", gain)));
        }
        Ok(Self { gain })
    }

    /// Linear gain factor
    pub fn gain(&self) -> f32 {
        self.gain
    }
}

impl FrameProcessor for PcmGain {
    fn process(&mut self, input: &[u8], output: &mut [u8]) -> AudioResult<()> {
        for (src, dst) in input.chunks_exact(2).zip(output.chunks_exact_mut(2)) {
            let sample = i16::from_le_bytes([src[0], src[1]]);
            let scaled = (f32::from(sample) * self.gain)
                .round()
                .clamp(f32::from(i16::MIN), f32::from(i16::MAX)) as i16;
            dst.copy_from_slice(&scaled.to_le_bytes());
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "pcm-gain"
    }
}

/// Handles returned by a stopped worker
pub struct WorkerEndpoints {
    /// Reading end of the upstream stage
    pub input: FrameConsumer,
    /// Writing end of the downstream stage
    pub output: FrameProducer,
}

/// A processing thread between two stage buffers
pub struct StageWorker {
    name: String,
    handle: Option<JoinHandle<AudioResult<WorkerEndpoints>>>,
    stop: Arc<AtomicBool>,
    processed: Arc<AtomicU64>,
}

impl StageWorker {
    /// Start a worker thread
    ///
    /// # Arguments
    /// * `input` - Consumer of the upstream stage
    /// * `output` - Producer of the downstream stage
    /// * `processor` - Transformation applied to each frame
    /// * `poll_interval` - Sleep when the upstream stage is empty
    ///
    /// # Errors
    /// - `AudioError::FrameSizeMismatch` if the two stages disagree on frame size
    /// - `AudioError::WorkerFailed` if the thread cannot be spawned
    pub fn spawn<P: FrameProcessor>(
        input: FrameConsumer,
        output: FrameProducer,
        processor: P,
        poll_interval: Duration,
    ) -> AudioResult<Self> {
        if input.frame_bytes() != output.frame_bytes() {
            return Err(AudioError::FrameSizeMismatch {
                stage: output.id().to_string(),
                expected: output.frame_bytes(),
                actual: input.frame_bytes(),
            });
        }

        let name = format!("{}->{}", input.id(), output.id());
        let stop = Arc::new(AtomicBool::new(false));
        let processed = Arc::new(AtomicU64::new(0));

        let thread_stop = Arc::clone(&stop);
        let thread_processed = Arc::clone(&processed);
        let thread_name = name.clone();

        let handle = thread::Builder::new()
            .name(format!("stage-{}", name))
            .spawn(move || {
                Self::run(
                    input,
                    output,
                    processor,
                    poll_interval,
                    &thread_stop,
                    &thread_processed,
                    &thread_name,
                )
            })
            .map_err(|e| AudioError::WorkerFailed(format!("failed to spawn {}: {}", name, e)))?;

        info!(worker = %name, "Stage worker started");

        Ok(Self {
            name,
            handle: Some(handle),
            stop,
            processed,
        })
    }

    fn run<P: FrameProcessor>(
        mut input: FrameConsumer,
        mut output: FrameProducer,
        mut processor: P,
        poll_interval: Duration,
        stop: &AtomicBool,
        processed: &AtomicU64,
        name: &str,
    ) -> AudioResult<WorkerEndpoints> {
        let mut in_frame = vec![0u8; input.frame_bytes()];
        let mut out_frame = vec![0u8; output.frame_bytes()];

        debug!(worker = name, processor = processor.name(), "Processing loop started");

        while !stop.load(Ordering::Acquire) {
            if !input.try_read(&mut in_frame)? {
                thread::sleep(poll_interval);
                continue;
            }

            if let Err(e) = processor.process(&in_frame, &mut out_frame) {
                error!(worker = name, error = %e, "Frame processing failed");
                return Err(e);
            }
            output.write(&out_frame)?;
            processed.fetch_add(1, Ordering::Relaxed);
        }

        debug!(worker = name, "Processing loop finished");
        Ok(WorkerEndpoints { input, output })
    }

    /// Worker name, `"<input stage>-><output stage>"`
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Frames processed so far
    pub fn processed(&self) -> u64 {
        self.processed.load(Ordering::Relaxed)
    }

    /// Whether the thread is still running
    pub fn is_running(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    /// Stop the thread and take back its stage handles
    ///
    /// # Errors
    /// Returns the error that ended the loop early, or
    /// `AudioError::WorkerFailed` if the thread panicked. The handles are
    /// dropped in both cases.
    pub fn stop(mut self) -> AudioResult<WorkerEndpoints> {
        self.join()
    }

    fn join(&mut self) -> AudioResult<WorkerEndpoints> {
        self.stop.store(true, Ordering::Release);
        let handle = self
            .handle
            .take()
            .ok_or_else(|| AudioError::WorkerFailed(format!("{} already stopped", self.name)))?;

        let result = handle
            .join()
            .map_err(|_| AudioError::WorkerFailed(format!("{} panicked", self.name)))?;

        info!(worker = %self.name, processed = self.processed(), "Stage worker stopped");
        result
    }
}

impl Drop for StageWorker {
    fn drop(&mut self) {
        if self.handle.is_some() {
            // Handles are dropped with the thread's result
            if let Err(e) = self.join() {
                warn!(worker = %self.name, error = %e, "Stage worker failed during drop");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::buffer::{FrameRingBuffer, StageId};
    use crate::audio::registry::PipelineKind;
    use std::time::Instant;

    fn geometry() -> Arc<FrameGeometry> {
        // 40 samples, mono, 16-bit -> 80 bytes
        Arc::new(FrameGeometry::new(5_000, 1, 2, 8_000).unwrap())
    }

    fn stage(index: usize) -> (FrameProducer, FrameConsumer) {
        FrameRingBuffer::new(StageId::new(PipelineKind::Record, index), geometry(), 8).unwrap()
    }

    fn pcm_frame(value: i16) -> Vec<u8> {
        (0..40).flat_map(|_| value.to_le_bytes()).collect()
    }

    #[test]
    fn test_passthrough_copies() {
        let mut out = [0u8; 4];
        Passthrough.process(&[1, 2, 3, 4], &mut out).unwrap();
        assert_eq!(out, [1, 2, 3, 4]);
    }

    #[test]
    fn test_pcm_gain_scales_and_clamps() {
        let mut gain = PcmGain::new(2.0, &geometry()).unwrap();
        let input: Vec<u8> = [100i16, -100, 20_000, -20_000]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();
        let mut output = vec![0u8; input.len()];
        gain.process(&input, &mut output).unwrap();

        let samples: Vec<i16> = output
            .chunks_exact(2)
            .map(|b| i16::from_le_bytes([b[0], b[1]]))
            .collect();
        assert_eq!(samples, vec![200, -200, i16::MAX, i16::MIN]);
    }

    #[test]
    fn test_pcm_gain_rejects_bad_config() {
        let wide = FrameGeometry::new(5_000, 1, 4, 8_000).unwrap();
        assert!(PcmGain::new(1.0, &wide).is_err());
        assert!(PcmGain::new(-1.0, &geometry()).is_err());
        assert!(PcmGain::new(f32::NAN, &geometry()).is_err());
    }

    #[test]
    fn test_worker_moves_frames() {
        let (mut capture_tx, capture_rx) = stage(0);
        let (processed_tx, mut processed_rx) = stage(1);

        let worker = StageWorker::spawn(
            capture_rx,
            processed_tx,
            PcmGain::new(0.5, &geometry()).unwrap(),
            Duration::from_micros(200),
        )
        .unwrap();
        assert!(worker.is_running());
        assert_eq!(worker.name(), "record[0]->record[1]");

        for value in [1000i16, 2000, 3000] {
            capture_tx.write(&pcm_frame(value)).unwrap();
        }

        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.processed() < 3 && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert_eq!(worker.processed(), 3);

        let endpoints = worker.stop().unwrap();
        assert_eq!(endpoints.input.id(), StageId::new(PipelineKind::Record, 0));

        let mut out = vec![0u8; 80];
        for value in [500i16, 1000, 1500] {
            assert!(processed_rx.try_read(&mut out).unwrap());
            assert_eq!(out, pcm_frame(value));
        }
        // An idle worker never counts underruns on its input
        assert_eq!(endpoints.input.monitor().stats().underruns, 0);
    }

    #[test]
    fn test_worker_rejects_mismatched_stages() {
        let (_tx, rx) = stage(0);
        let other = Arc::new(FrameGeometry::new(10_000, 1, 2, 8_000).unwrap());
        let (tx, _rx) =
            FrameRingBuffer::new(StageId::new(PipelineKind::Record, 1), other, 4).unwrap();

        let result = StageWorker::spawn(rx, tx, Passthrough, DEFAULT_POLL_INTERVAL);
        assert!(matches!(result, Err(AudioError::FrameSizeMismatch { .. })));
    }

    struct Failing;

    impl FrameProcessor for Failing {
        fn process(&mut self, _input: &[u8], _output: &mut [u8]) -> AudioResult<()> {
            Err(AudioError::InvalidGeometry("boom".to_string()))
        }

        fn name(&self) -> &'static str {
            "failing"
        }
    }

    #[test]
    fn test_worker_reports_processor_error() {
        let (mut tx, rx) = stage(0);
        let (out_tx, _out_rx) = stage(1);
        let monitor = rx.monitor();

        let worker = StageWorker::spawn(rx, out_tx, Failing, Duration::from_micros(200)).unwrap();
        tx.write(&pcm_frame(1)).unwrap();

        let deadline = Instant::now() + Duration::from_secs(5);
        while worker.is_running() && Instant::now() < deadline {
            thread::sleep(Duration::from_millis(1));
        }
        assert!(matches!(worker.stop(), Err(AudioError::InvalidGeometry(_))));
        assert_eq!(monitor.stats().frames_read, 1);
    }
}
