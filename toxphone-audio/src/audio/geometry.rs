//! Frame geometry
//!
//! Describes the shape of one PCM frame (latency, channels, sample width,
//! sampling rate) and the sizes derived from it. A [`FrameGeometry`] is
//! immutable: reconfiguration builds a new one and swaps it into the
//! [`FrameGeometryRegistry`](crate::audio::FrameGeometryRegistry).
//!
//! # Example
//!
//! ```
//! use toxphone_audio::audio::FrameGeometry;
//!
//! let geometry = FrameGeometry::new(20_000, 2, 2, 48_000).unwrap();
//! assert_eq!(geometry.sample_count(), 960);
//! assert_eq!(geometry.frame_byte_size(), 3840);
//! ```

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::audio::error::{AudioError, AudioResult};

/// Default callback interval (20ms)
pub const DEFAULT_LATENCY_MICROS: u32 = 20_000;

/// Default channel count (mono voice)
pub const DEFAULT_CHANNELS: u8 = 1;

/// Default sample width (16-bit PCM)
pub const DEFAULT_SAMPLE_SIZE_BYTES: u32 = 2;

/// Default sampling rate when no device format is known
pub const DEFAULT_SAMPLING_RATE_HZ: u32 = 48_000;

/// Widest supported sample (32-bit PCM)
pub const MAX_SAMPLE_SIZE_BYTES: u32 = 4;

const MICROS_PER_SECOND: u64 = 1_000_000;

/// Sampling format reported by an audio device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeviceFormat {
    /// Device sampling rate in Hz
    pub sampling_rate_hz: u32,
    /// Device channel count
    pub channels: u8,
}

/// Base parameters of a frame, before derived sizes are computed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(default)]
pub struct FrameParams {
    /// Target callback interval in microseconds
    pub latency_micros: u32,
    /// Number of interleaved channels
    pub channels: u8,
    /// Bytes per sample
    pub sample_size_bytes: u32,
    /// Sampling rate in Hz
    pub sampling_rate_hz: u32,
}

impl Default for FrameParams {
    fn default() -> Self {
        Self {
            latency_micros: DEFAULT_LATENCY_MICROS,
            channels: DEFAULT_CHANNELS,
            sample_size_bytes: DEFAULT_SAMPLE_SIZE_BYTES,
            sampling_rate_hz: DEFAULT_SAMPLING_RATE_HZ,
        }
    }
}

impl FrameParams {
    /// Replace the sampling rate and channel count with what a device reports
    pub fn with_device_format(mut self, format: DeviceFormat) -> Self {
        self.sampling_rate_hz = format.sampling_rate_hz;
        self.channels = format.channels;
        self
    }

    /// Validate and derive the full geometry
    pub fn build(self) -> AudioResult<FrameGeometry> {
        FrameGeometry::from_params(self)
    }
}

/// Shape of one audio frame and its derived sizes
///
/// Derived fields are computed once at construction and are always
/// consistent with the base parameters. Serialization goes through
/// [`FrameParams`], so a deserialized geometry is re-derived and validated.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "FrameParams", into = "FrameParams")]
pub struct FrameGeometry {
    latency_micros: u32,
    channels: u8,
    sample_size_bytes: u32,
    sample_count: u32,
    sampling_rate_hz: u32,
    frame_byte_size: u32,
}

impl FrameGeometry {
    /// Create a geometry from its base parameters
    ///
    /// # Arguments
    /// * `latency_micros` - Frame duration in microseconds
    /// * `channels` - Number of interleaved channels
    /// * `sample_size_bytes` - Bytes per sample (1..=4)
    /// * `sampling_rate_hz` - Sampling rate in Hz
    ///
    /// # Errors
    /// Returns `AudioError::InvalidGeometry` if any parameter is zero, the
    /// sample width is unsupported, the frame holds no samples, or the frame
    /// size overflows `u32`.
    pub fn new(
        latency_micros: u32,
        channels: u8,
        sample_size_bytes: u32,
        sampling_rate_hz: u32,
    ) -> AudioResult<Self> {
        Self::from_params(FrameParams {
            latency_micros,
            channels,
            sample_size_bytes,
            sampling_rate_hz,
        })
    }

    /// Create a geometry from a [`FrameParams`] value
    pub fn from_params(params: FrameParams) -> AudioResult<Self> {
        if params.latency_micros == 0 {
            return Err(AudioError::InvalidGeometry(
                "latency must be greater than zero".to_string(),
            ));
        }
        if params.channels == 0 {
            return Err(AudioError::InvalidGeometry(
                "channel count must be greater than zero".to_string(),
            ));
        }
        if params.sample_size_bytes == 0 || params.sample_size_bytes > MAX_SAMPLE_SIZE_BYTES {
            return Err(AudioError::InvalidGeometry(format!(
                "sample size must be 1..={} bytes, got {}",
                MAX_SAMPLE_SIZE_BYTES, params.sample_size_bytes
            )));
        }
        if params.sampling_rate_hz == 0 {
            return Err(AudioError::InvalidGeometry(
                "sampling rate must be greater than zero".to_string(),
            ));
        }

        let sample_count = derive_sample_count(params.latency_micros, params.sampling_rate_hz)?;
        if sample_count == 0 {
            return Err(AudioError::InvalidGeometry(format!(
                "{}us at {} Hz holds no samples",
                params.latency_micros, params.sampling_rate_hz
            )));
        }

        let frame_byte_size = sample_count
            .checked_mul(u32::from(params.channels))
            .and_then(|n| n.checked_mul(params.sample_size_bytes))
            .ok_or_else(|| {
                AudioError::InvalidGeometry(format!(
                    "frame of {} samples x {} channels x {} bytes overflows",
                    sample_count, params.channels, params.sample_size_bytes
                ))
            })?;

        Ok(Self {
            latency_micros: params.latency_micros,
            channels: params.channels,
            sample_size_bytes: params.sample_size_bytes,
            sample_count,
            sampling_rate_hz: params.sampling_rate_hz,
            frame_byte_size,
        })
    }

    /// Base parameters this geometry was derived from
    pub fn params(&self) -> FrameParams {
        FrameParams {
            latency_micros: self.latency_micros,
            channels: self.channels,
            sample_size_bytes: self.sample_size_bytes,
            sampling_rate_hz: self.sampling_rate_hz,
        }
    }

    /// Target callback interval in microseconds
    pub fn latency_micros(&self) -> u32 {
        self.latency_micros
    }

    /// Number of interleaved channels
    pub fn channels(&self) -> u8 {
        self.channels
    }

    /// Bytes per sample
    pub fn sample_size_bytes(&self) -> u32 {
        self.sample_size_bytes
    }

    /// Samples per channel in one frame
    pub fn sample_count(&self) -> u32 {
        self.sample_count
    }

    /// Sampling rate in Hz
    pub fn sampling_rate_hz(&self) -> u32 {
        self.sampling_rate_hz
    }

    /// Size of one frame in bytes
    pub fn frame_byte_size(&self) -> u32 {
        self.frame_byte_size
    }

    /// Size of one frame in bytes, as a slice length
    pub fn frame_bytes(&self) -> usize {
        self.frame_byte_size as usize
    }

    /// Interleaved samples in one frame, all channels together
    pub fn interleaved_samples(&self) -> usize {
        self.sample_count as usize * usize::from(self.channels)
    }

    /// Frame duration
    pub fn duration(&self) -> Duration {
        Duration::from_micros(u64::from(self.latency_micros))
    }
}

impl TryFrom<FrameParams> for FrameGeometry {
    type Error = AudioError;

    fn try_from(params: FrameParams) -> AudioResult<Self> {
        Self::from_params(params)
    }
}

impl From<FrameGeometry> for FrameParams {
    fn from(geometry: FrameGeometry) -> Self {
        geometry.params()
    }
}

impl std::fmt::Display for FrameGeometry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{}us {}ch {}B @ {} Hz ({} samples, {} bytes)",
            self.latency_micros,
            self.channels,
            self.sample_size_bytes,
            self.sampling_rate_hz,
            self.sample_count,
            self.frame_byte_size
        )
    }
}

/// `round(latency * rate / 1e6)`, half rounded up
fn derive_sample_count(latency_micros: u32, sampling_rate_hz: u32) -> AudioResult<u32> {
    let scaled = u64::from(latency_micros) * u64::from(sampling_rate_hz);
    let rounded = (scaled + MICROS_PER_SECOND / 2) / MICROS_PER_SECOND;
    u32::try_from(rounded).map_err(|_| {
        AudioError::InvalidGeometry(format!(
            "{}us at {} Hz exceeds the sample counter",
            latency_micros, sampling_rate_hz
        ))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stereo_48k_example() {
        let geometry = FrameGeometry::new(20_000, 2, 2, 48_000).unwrap();
        assert_eq!(geometry.sample_count(), 960);
        assert_eq!(geometry.frame_byte_size(), 3840);
        assert_eq!(geometry.interleaved_samples(), 1920);
        assert_eq!(geometry.duration(), Duration::from_millis(20));
    }

    #[test]
    fn test_default_params() {
        let geometry = FrameParams::default().build().unwrap();
        assert_eq!(geometry.sample_count(), 960);
        assert_eq!(geometry.channels(), 1);
        assert_eq!(geometry.frame_byte_size(), 1920);
    }

    #[test]
    fn test_sample_count_rounding() {
        // 10ms @ 44.1kHz = 441 exactly
        assert_eq!(FrameGeometry::new(10_000, 1, 2, 44_100).unwrap().sample_count(), 441);
        // 1ms @ 22.05kHz = 22.05 -> 22
        assert_eq!(FrameGeometry::new(1_000, 1, 2, 22_050).unwrap().sample_count(), 22);
        // 30us @ 50kHz = 1.5 -> 2 (half rounds up)
        assert_eq!(FrameGeometry::new(30, 1, 2, 50_000).unwrap().sample_count(), 2);
        // 1us @ 44.1kHz = 0.0441 -> 0, rejected
        assert!(FrameGeometry::new(1, 1, 2, 44_100).is_err());
    }

    #[test]
    fn test_rejects_zero_fields() {
        assert!(matches!(
            FrameGeometry::new(0, 1, 2, 48_000),
            Err(AudioError::InvalidGeometry(_))
        ));
        assert!(FrameGeometry::new(20_000, 0, 2, 48_000).is_err());
        assert!(FrameGeometry::new(20_000, 1, 0, 48_000).is_err());
        assert!(FrameGeometry::new(20_000, 1, 2, 0).is_err());
        assert!(FrameGeometry::new(20_000, 1, 5, 48_000).is_err());
    }

    #[test]
    fn test_rejects_overflowing_frame() {
        // ~4.29e9 samples per channel does not fit the byte size
        let result = FrameGeometry::new(u32::MAX, 255, 4, 1_000_000);
        assert!(matches!(result, Err(AudioError::InvalidGeometry(_))));
    }

    #[test]
    fn test_device_format_override() {
        let params = FrameParams::default().with_device_format(DeviceFormat {
            sampling_rate_hz: 16_000,
            channels: 2,
        });
        let geometry = params.build().unwrap();
        assert_eq!(geometry.sample_count(), 320);
        assert_eq!(geometry.frame_byte_size(), 1280);
    }

    #[test]
    fn test_params_round_trip_is_identical() {
        let geometry = FrameGeometry::new(10_000, 2, 2, 44_100).unwrap();
        let rebuilt = FrameGeometry::from_params(geometry.params()).unwrap();
        assert_eq!(geometry, rebuilt);
    }

    #[test]
    fn test_deserialize_rederives_sizes() {
        let json = r#"{"latency_micros":20000,"channels":2,"sample_size_bytes":2,"sampling_rate_hz":48000}"#;
        let geometry: FrameGeometry = serde_json::from_str(json).unwrap();
        assert_eq!(geometry.frame_byte_size(), 3840);

        let invalid = r#"{"latency_micros":20000,"channels":2,"sample_size_bytes":2,"sampling_rate_hz":0}"#;
        assert!(serde_json::from_str::<FrameGeometry>(invalid).is_err());
    }

    #[test]
    fn test_display() {
        let geometry = FrameGeometry::new(20_000, 1, 2, 8_000).unwrap();
        assert_eq!(geometry.to_string(), "20000us 1ch 2B @ 8000 Hz (160 samples, 320 bytes)");
    }
}
