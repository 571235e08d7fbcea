//! Adapters between device callbacks and whole frames
//!
//! Hardware callbacks hand over slices of whatever length the driver
//! chooses. [`FrameAccumulator`] gathers captured samples into whole frames;
//! [`FrameDrain`] spreads whole frames over playback slices. Both own a
//! single preallocated frame and never allocate per callback.

use crate::audio::geometry::FrameGeometry;

/// Collects captured 16-bit samples into whole frames
pub struct FrameAccumulator {
    frame: Box<[u8]>,
    filled: usize,
}

impl FrameAccumulator {
    /// Create an accumulator sized for `geometry`
    pub fn new(geometry: &FrameGeometry) -> Self {
        Self {
            frame: vec![0u8; geometry.frame_bytes()].into_boxed_slice(),
            filled: 0,
        }
    }

    /// Append raw bytes, calling `emit` once per completed frame
    ///
    /// # Returns
    /// Number of frames emitted.
    pub fn push_bytes<F: FnMut(&[u8])>(&mut self, mut data: &[u8], mut emit: F) -> usize {
        let mut emitted = 0;
        while !data.is_empty() {
            let take = (self.frame.len() - self.filled).min(data.len());
            self.frame[self.filled..self.filled + take].copy_from_slice(&data[..take]);
            self.filled += take;
            data = &data[take..];

            if self.filled == self.frame.len() {
                emit(&self.frame);
                self.filled = 0;
                emitted += 1;
            }
        }
        emitted
    }

    /// Append interleaved 16-bit samples as little-endian bytes
    pub fn push_i16<F: FnMut(&[u8])>(&mut self, samples: &[i16], mut emit: F) -> usize {
        samples
            .iter()
            .map(|sample| self.push_bytes(&sample.to_le_bytes(), &mut emit))
            .sum()
    }

    /// Bytes held towards the next frame
    pub fn pending(&self) -> usize {
        self.filled
    }
}

/// Feeds playback slices from whole frames
pub struct FrameDrain {
    frame: Box<[u8]>,
    position: usize,
}

impl FrameDrain {
    /// Create a drain sized for `geometry`
    pub fn new(geometry: &FrameGeometry) -> Self {
        let frame = vec![0u8; geometry.frame_bytes()].into_boxed_slice();
        let position = frame.len();
        Self { frame, position }
    }

    /// Fill `out` with bytes, calling `refill` whenever a new frame is needed
    pub fn fill_bytes<F: FnMut(&mut [u8])>(&mut self, out: &mut [u8], mut refill: F) {
        let mut written = 0;
        while written < out.len() {
            if self.position == self.frame.len() {
                refill(&mut self.frame);
                self.position = 0;
            }
            let take = (self.frame.len() - self.position).min(out.len() - written);
            out[written..written + take]
                .copy_from_slice(&self.frame[self.position..self.position + take]);
            self.position += take;
            written += take;
        }
    }

    /// Fill interleaved 16-bit samples from little-endian frame bytes
    pub fn fill_i16<F: FnMut(&mut [u8])>(&mut self, out: &mut [i16], mut refill: F) {
        let mut bytes = [0u8; 2];
        for sample in out.iter_mut() {
            self.fill_bytes(&mut bytes, &mut refill);
            *sample = i16::from_le_bytes(bytes);
        }
    }

    /// Bytes of the current frame not yet played
    pub fn remaining(&self) -> usize {
        self.frame.len() - self.position
    }
}
