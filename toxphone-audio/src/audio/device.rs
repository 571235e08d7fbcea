//! Default cpal devices bound to ring buffers
//!
//! Only the default input and output devices are used; enumeration and
//! device selection belong to the application. Streams are opened with
//! 16-bit samples at the geometry's rate and channel count.

use cpal::traits::{DeviceTrait, HostTrait, StreamTrait};
use cpal::{Device, Stream, StreamConfig};
use tracing::{error, info};

use crate::audio::buffer::{FrameConsumer, FrameProducer};
use crate::audio::callback::{FrameAccumulator, FrameDrain};
use crate::audio::error::{AudioError, AudioResult};
use crate::audio::geometry::{DeviceFormat, FrameGeometry};

/// Sampling format of the default input device
pub fn default_input_format() -> AudioResult<DeviceFormat> {
    let device = default_input_device()?;
    let config = device
        .default_input_config()
        .map_err(|e| AudioError::DeviceConfig(e.to_string()))?;
    to_device_format(config.sample_rate().0, config.channels())
}

/// Sampling format of the default output device
pub fn default_output_format() -> AudioResult<DeviceFormat> {
    let device = default_output_device()?;
    let config = device
        .default_output_config()
        .map_err(|e| AudioError::DeviceConfig(e.to_string()))?;
    to_device_format(config.sample_rate().0, config.channels())
}

fn to_device_format(sampling_rate_hz: u32, channels: u16) -> AudioResult<DeviceFormat> {
    let channels = u8::try_from(channels)
        .map_err(|_| AudioError::DeviceConfig(format!("{} channels not supported", channels)))?;
    Ok(DeviceFormat {
        sampling_rate_hz,
        channels,
    })
}

fn default_input_device() -> AudioResult<Device> {
    cpal::default_host()
        .default_input_device()
        .ok_or(AudioError::DeviceNotFound)
}

fn default_output_device() -> AudioResult<Device> {
    cpal::default_host()
        .default_output_device()
        .ok_or(AudioError::DeviceNotFound)
}

fn stream_config(geometry: &FrameGeometry) -> StreamConfig {
    StreamConfig {
        channels: u16::from(geometry.channels()),
        sample_rate: cpal::SampleRate(geometry.sampling_rate_hz()),
        buffer_size: cpal::BufferSize::Default,
    }
}

fn require_16_bit(geometry: &FrameGeometry) -> AudioResult<()> {
    if geometry.sample_size_bytes() == 2 {
        Ok(())
    } else {
        Err(AudioError::StreamBuildFailed(format!(
            "device streams carry 16-bit samples, geometry has {} bytes",
            geometry.sample_size_bytes()
        )))
    }
}

/// Capture callback writing whole frames into a record stage
pub struct CaptureStream {
    stream: Option<Stream>,
}

impl CaptureStream {
    /// Open the default input device and start writing into `producer`
    ///
    /// The producer moves into the callback and is dropped with the
    /// stream, which releases it from its stage.
    pub fn start(mut producer: FrameProducer) -> AudioResult<Self> {
        let geometry = std::sync::Arc::clone(producer.geometry());
        require_16_bit(&geometry)?;

        let device = default_input_device()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!(device = %device_name, geometry = %geometry, "Starting capture stream");

        let mut accumulator = FrameAccumulator::new(&geometry);
        let stream = device
            .build_input_stream(
                &stream_config(&geometry),
                move |data: &[i16], _: &cpal::InputCallbackInfo| {
                    accumulator.push_i16(data, |frame| forward_frame(&mut producer, frame));
                },
                move |err| {
                    error!("Capture stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildFailed(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
        })
    }

    /// Stop capturing; safe to call more than once
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("Capture stream stopped");
        }
    }

    /// Whether the stream is running
    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }
}

/// Write one accumulated capture frame; overruns are counted by the buffer
fn forward_frame(producer: &mut FrameProducer, frame: &[u8]) {
    if let Err(e) = producer.write(frame) {
        error!(stage = %producer.id(), "Capture frame rejected: {}", e);
    }
}

impl Drop for CaptureStream {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Playback callback reading whole frames from the voice stage
pub struct PlaybackStream {
    stream: Option<Stream>,
}

impl PlaybackStream {
    /// Open the default output device and start playing from `consumer`
    ///
    /// Underruns are played as silence.
    pub fn start(mut consumer: FrameConsumer) -> AudioResult<Self> {
        let geometry = std::sync::Arc::clone(consumer.geometry());
        require_16_bit(&geometry)?;

        let device = default_output_device()?;
        let device_name = device.name().unwrap_or_else(|_| "Unknown".to_string());
        info!(device = %device_name, geometry = %geometry, "Starting playback stream");

        let mut drain = FrameDrain::new(&geometry);
        let stream = device
            .build_output_stream(
                &stream_config(&geometry),
                move |data: &mut [i16], _: &cpal::OutputCallbackInfo| {
                    drain.fill_i16(data, |frame| {
                        if consumer.read(frame).is_err() {
                            frame.fill(0);
                        }
                    });
                },
                move |err| {
                    error!("Playback stream error: {}", err);
                },
                None,
            )
            .map_err(|e| AudioError::StreamBuildFailed(e.to_string()))?;

        stream
            .play()
            .map_err(|e| AudioError::StreamError(e.to_string()))?;

        Ok(Self {
            stream: Some(stream),
        })
    }

    /// Stop playback; safe to call more than once
    pub fn stop(&mut self) {
        if let Some(stream) = self.stream.take() {
            drop(stream);
            info!("Playback stream stopped");
        }
    }

    /// Whether the stream is running
    pub fn is_active(&self) -> bool {
        self.stream.is_some()
    }
}

impl Drop for PlaybackStream {
    fn drop(&mut self) {
        self.stop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{AudioSubsystem, RECORD_CAPTURE_STAGE};

    #[test]
    fn test_forward_frame_counts_writes_and_overruns() {
        let mut audio = AudioSubsystem::with_defaults().unwrap();
        let stage = audio.record_buffer_stage(RECORD_CAPTURE_STAGE).unwrap();
        let mut producer = stage.take_producer().unwrap();
        let monitor = producer.monitor();

        let mut accumulator = FrameAccumulator::new(producer.geometry());
        let samples = vec![100i16; producer.frame_bytes() / 2 * (monitor.capacity_frames() + 1)];
        accumulator.push_i16(&samples, |frame| forward_frame(&mut producer, frame));

        let stats = monitor.stats();
        assert_eq!(stats.frames_written, monitor.capacity_frames() as u64 + 1);
        assert_eq!(stats.overruns, 1);
        stage.restore_producer(producer).unwrap();
    }

    #[test]
    fn test_default_formats() {
        // Hosts without audio hardware report DeviceNotFound
        match default_input_format() {
            Ok(format) => {
                assert!(format.sampling_rate_hz > 0);
                assert!(format.channels > 0);
            }
            Err(e) => eprintln!("Warning: no input device: {}", e),
        }
        if let Err(e) = default_output_format() {
            eprintln!("Warning: no output device: {}", e);
        }
    }

    #[test]
    fn test_capture_stream_releases_producer() {
        let mut audio = AudioSubsystem::with_defaults().unwrap();
        let producer = audio
            .record_buffer_stage(RECORD_CAPTURE_STAGE)
            .unwrap()
            .take_producer()
            .unwrap();

        match CaptureStream::start(producer) {
            Ok(mut capture) => {
                assert!(capture.is_active());
                capture.stop();
                assert!(!capture.is_active());
            }
            Err(e) => eprintln!("Warning: could not start capture: {}", e),
        }

        // Either way the producer is gone and the stage is idle
        assert!(audio.pipeline(crate::audio::PipelineKind::Record).is_quiesced());
    }
}
