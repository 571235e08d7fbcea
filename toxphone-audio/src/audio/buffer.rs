//! Frame ring buffer
//!
//! Fixed-capacity single-producer/single-consumer frame queue used between
//! pipeline stages.
//!
//! # Features
//!
//! - Lock-free: no mutex on either side
//! - Frame-slotted: every write and read moves exactly one frame, so a read
//!   never returns a splice of two frames
//! - Overwrite-oldest: a full buffer drops its oldest unread frame instead of
//!   blocking the producer
//! - Silence on underrun: an empty buffer zero-fills the caller's frame
//! - All memory allocated at construction, none in `write`/`read`
//!
//! # Layout
//!
//! `capacity + 2` frames are allocated up front and circulate as owned boxes.
//! Filled frames sit in a bounded `ArrayQueue`; `force_push` hands the
//! producer the oldest one back when the queue is full, and that box becomes
//! its next scratch frame. The consumer copies a popped frame out and returns
//! the box through a ringbuf free list.
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use toxphone_audio::audio::{
//!     FrameGeometry, FrameRingBuffer, PipelineKind, ReadOutcome, StageId, WriteOutcome,
//! };
//!
//! let geometry = Arc::new(FrameGeometry::new(20_000, 1, 2, 8_000).unwrap());
//! let id = StageId::new(PipelineKind::Voice, 0);
//! let (mut producer, mut consumer) = FrameRingBuffer::new(id, geometry, 4).unwrap();
//!
//! let frame = vec![7u8; 320];
//! assert_eq!(producer.write(&frame).unwrap(), WriteOutcome::Written);
//!
//! let mut out = vec![0u8; 320];
//! assert_eq!(consumer.read(&mut out).unwrap(), ReadOutcome::Filled);
//! assert_eq!(out, frame);
//! ```

use std::fmt;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crossbeam::queue::ArrayQueue;
use ringbuf::{
    traits::{Consumer, Producer, Split},
    HeapCons, HeapProd, HeapRb,
};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::audio::error::{AudioError, AudioResult};
use crate::audio::geometry::FrameGeometry;
use crate::audio::registry::PipelineKind;

/// Default buffer depth in frames
pub const DEFAULT_CAPACITY_FRAMES: usize = 4;

/// Largest accepted buffer depth in frames
pub const MAX_CAPACITY_FRAMES: usize = 64;

/// Frames beyond capacity: one in flight on each side
const SPARE_FRAMES: usize = 2;

/// Position of a buffer inside a pipeline
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct StageId {
    /// Pipeline the stage belongs to
    pub pipeline: PipelineKind,
    /// Zero-based stage index
    pub index: usize,
}

impl StageId {
    /// Create a stage identifier
    pub fn new(pipeline: PipelineKind, index: usize) -> Self {
        Self { pipeline, index }
    }
}

impl fmt::Display for StageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}[{}]", self.pipeline, self.index)
    }
}

/// Result of a successful write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// The frame fit without dropping anything
    Written,
    /// The oldest unread frame was discarded; carries the dropped byte count
    WrittenOverwriting(usize),
}

impl WriteOutcome {
    /// Bytes discarded to make room
    pub fn dropped_bytes(&self) -> usize {
        match self {
            Self::Written => 0,
            Self::WrittenOverwriting(n) => *n,
        }
    }
}

/// Result of a successful read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadOutcome {
    /// A full frame was copied out
    Filled,
    /// No frame was available; the output was filled with silence
    Underrun,
}

/// Steady-state event counters of one buffer
#[derive(Debug, Default)]
pub struct BufferStats {
    frames_written: AtomicU64,
    frames_read: AtomicU64,
    overruns: AtomicU64,
    frames_dropped: AtomicU64,
    underruns: AtomicU64,
}

impl BufferStats {
    /// Point-in-time copy of the counters
    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            frames_written: self.frames_written.load(Ordering::Relaxed),
            frames_read: self.frames_read.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
            frames_dropped: self.frames_dropped.load(Ordering::Relaxed),
            underruns: self.underruns.load(Ordering::Relaxed),
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::Relaxed);
    }
}

/// Copy of [`BufferStats`] for reporting
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    /// Frames accepted by `write`
    pub frames_written: u64,
    /// Frames delivered by `read`/`try_read`
    pub frames_read: u64,
    /// Writes that had to discard a frame
    pub overruns: u64,
    /// Frames discarded unread
    pub frames_dropped: u64,
    /// Reads answered with silence
    pub underruns: u64,
}

struct Shared {
    id: StageId,
    geometry: Arc<FrameGeometry>,
    frame_bytes: usize,
    ready: ArrayQueue<Box<[u8]>>,
    stats: BufferStats,
    checked_out: AtomicUsize,
}

impl Shared {
    fn check_len(&self, actual: usize) -> AudioResult<()> {
        if actual == self.frame_bytes {
            return Ok(());
        }
        debug_assert_eq!(
            actual, self.frame_bytes,
            "frame size mismatch on {}", self.id
        );
        Err(AudioError::FrameSizeMismatch {
            stage: self.id.to_string(),
            expected: self.frame_bytes,
            actual,
        })
    }

    fn capacity_frames(&self) -> usize {
        self.ready.capacity()
    }

    fn available_frames(&self) -> usize {
        self.ready.len()
    }

    fn available_bytes(&self) -> u32 {
        // bounded by capacity_bytes, which fits u32
        (self.available_frames() * self.frame_bytes) as u32
    }

    fn capacity_bytes(&self) -> u32 {
        (self.capacity_frames() * self.frame_bytes) as u32
    }
}

/// Constructor for split ring buffer handles
pub struct FrameRingBuffer;

impl FrameRingBuffer {
    /// Create a frame ring buffer
    ///
    /// # Arguments
    /// * `id` - Stage the buffer serves, used in logs and errors
    /// * `geometry` - Frame shape; every read and write moves one frame
    /// * `capacity_frames` - Depth in frames (1..=64)
    ///
    /// # Returns
    /// A `(producer, consumer)` pair. Hand each to exactly one thread.
    ///
    /// # Errors
    /// Returns `AudioError::InvalidCapacity` if the depth is out of range or
    /// the total byte size does not fit `u32`.
    pub fn new(
        id: StageId,
        geometry: Arc<FrameGeometry>,
        capacity_frames: usize,
    ) -> AudioResult<(FrameProducer, FrameConsumer)> {
        if capacity_frames == 0 || capacity_frames > MAX_CAPACITY_FRAMES {
            return Err(AudioError::InvalidCapacity(capacity_frames));
        }
        let frame_bytes = geometry.frame_bytes();
        capacity_frames
            .checked_mul(frame_bytes)
            .and_then(|total| u32::try_from(total).ok())
            .ok_or(AudioError::InvalidCapacity(capacity_frames))?;

        let frame_count = capacity_frames + SPARE_FRAMES;
        let (mut free_tx, free_rx) = HeapRb::<Box<[u8]>>::new(frame_count).split();
        // One frame starts as the producer's scratch, the rest are free
        let seeded = free_tx.push_iter((1..frame_count).map(|_| silent_frame(frame_bytes)));
        debug_assert_eq!(seeded, frame_count - 1);

        debug!(
            stage = %id,
            frames = capacity_frames,
            frame_bytes,
            "Ring buffer created"
        );

        let shared = Arc::new(Shared {
            id,
            geometry,
            frame_bytes,
            ready: ArrayQueue::new(capacity_frames),
            stats: BufferStats::default(),
            checked_out: AtomicUsize::new(0),
        });

        Ok((
            FrameProducer {
                shared: Arc::clone(&shared),
                scratch: Some(silent_frame(frame_bytes)),
                free: free_rx,
                checked_out: false,
            },
            FrameConsumer {
                shared,
                free: free_tx,
                checked_out: false,
            },
        ))
    }
}

/// Writing end of a [`FrameRingBuffer`]
pub struct FrameProducer {
    shared: Arc<Shared>,
    scratch: Option<Box<[u8]>>,
    free: HeapCons<Box<[u8]>>,
    checked_out: bool,
}

impl FrameProducer {
    /// Write one frame
    ///
    /// Never blocks. If the buffer is full, the oldest unread frame is
    /// discarded and `WrittenOverwriting` reports the dropped bytes.
    ///
    /// # Errors
    /// `frame.len()` must equal the frame size. A mismatch panics in debug
    /// builds and returns `AudioError::FrameSizeMismatch` otherwise.
    pub fn write(&mut self, frame: &[u8]) -> AudioResult<WriteOutcome> {
        self.shared.check_len(frame.len())?;

        let mut filled = self.take_spare();
        filled.copy_from_slice(frame);
        let displaced = self.shared.ready.force_push(filled);

        let stats = &self.shared.stats;
        BufferStats::bump(&stats.frames_written);
        match displaced {
            Some(oldest) => {
                self.scratch = Some(oldest);
                BufferStats::bump(&stats.overruns);
                BufferStats::bump(&stats.frames_dropped);
                Ok(WriteOutcome::WrittenOverwriting(self.shared.frame_bytes))
            }
            None => Ok(WriteOutcome::Written),
        }
    }

    /// Frame to write into: the last displaced one, else one from the free list.
    ///
    /// With `capacity + 2` frames, one is always in scratch or on the free
    /// list; the loop only waits out a consumer push that is not visible yet.
    fn take_spare(&mut self) -> Box<[u8]> {
        if let Some(frame) = self.scratch.take() {
            return frame;
        }
        loop {
            if let Some(frame) = self.free.try_pop() {
                return frame;
            }
            std::hint::spin_loop();
        }
    }

    /// Whole frames waiting to be read
    pub fn available_frames(&self) -> usize {
        self.shared.available_frames()
    }

    /// Bytes waiting to be read
    pub fn available_bytes(&self) -> u32 {
        self.shared.available_bytes()
    }

    /// Total capacity in bytes
    pub fn capacity_bytes(&self) -> u32 {
        self.shared.capacity_bytes()
    }

    /// Depth in frames
    pub fn capacity_frames(&self) -> usize {
        self.shared.capacity_frames()
    }

    /// Size of one frame in bytes
    pub fn frame_bytes(&self) -> usize {
        self.shared.frame_bytes
    }

    /// Geometry the buffer was built against
    pub fn geometry(&self) -> &Arc<FrameGeometry> {
        &self.shared.geometry
    }

    /// Stage this buffer serves
    pub fn id(&self) -> StageId {
        self.shared.id
    }

    /// Read-only view for diagnostics
    pub fn monitor(&self) -> BufferMonitor {
        BufferMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn belongs_to(&self, monitor: &BufferMonitor) -> bool {
        Arc::ptr_eq(&self.shared, &monitor.shared)
    }

    pub(crate) fn mark_checked_out(&mut self) {
        mark_checked_out(&self.shared, &mut self.checked_out);
    }

    pub(crate) fn mark_returned(&mut self) {
        mark_returned(&self.shared, &mut self.checked_out);
    }
}

impl Drop for FrameProducer {
    fn drop(&mut self) {
        self.mark_returned();
    }
}

/// Reading end of a [`FrameRingBuffer`]
pub struct FrameConsumer {
    shared: Arc<Shared>,
    free: HeapProd<Box<[u8]>>,
    checked_out: bool,
}

impl FrameConsumer {
    /// Read one frame for a real-time consumer
    ///
    /// Never blocks. With no frame available, `out` is zero-filled, the
    /// underrun counter is bumped and `Underrun` is returned.
    ///
    /// # Errors
    /// `out.len()` must equal the frame size. A mismatch panics in debug
    /// builds and returns `AudioError::FrameSizeMismatch` otherwise.
    pub fn read(&mut self, out: &mut [u8]) -> AudioResult<ReadOutcome> {
        if self.pop_into(out)? {
            return Ok(ReadOutcome::Filled);
        }
        out.fill(0);
        BufferStats::bump(&self.shared.stats.underruns);
        Ok(ReadOutcome::Underrun)
    }

    /// Read one frame if one is ready
    ///
    /// For stages that poll at their own pace: an empty buffer returns
    /// `false`, leaves `out` untouched and is not counted as an underrun.
    pub fn try_read(&mut self, out: &mut [u8]) -> AudioResult<bool> {
        self.pop_into(out)
    }

    fn pop_into(&mut self, out: &mut [u8]) -> AudioResult<bool> {
        self.shared.check_len(out.len())?;

        let Some(frame) = self.shared.ready.pop() else {
            return Ok(false);
        };
        out.copy_from_slice(&frame);

        if self.free.try_push(frame).is_err() {
            debug_assert!(false, "free list overflow on {}", self.shared.id);
        }

        BufferStats::bump(&self.shared.stats.frames_read);
        Ok(true)
    }

    /// Whole frames waiting to be read
    pub fn available_frames(&self) -> usize {
        self.shared.available_frames()
    }

    /// Bytes waiting to be read
    pub fn available_bytes(&self) -> u32 {
        self.shared.available_bytes()
    }

    /// Total capacity in bytes
    pub fn capacity_bytes(&self) -> u32 {
        self.shared.capacity_bytes()
    }

    /// Depth in frames
    pub fn capacity_frames(&self) -> usize {
        self.shared.capacity_frames()
    }

    /// Size of one frame in bytes
    pub fn frame_bytes(&self) -> usize {
        self.shared.frame_bytes
    }

    /// Geometry the buffer was built against
    pub fn geometry(&self) -> &Arc<FrameGeometry> {
        &self.shared.geometry
    }

    /// Stage this buffer serves
    pub fn id(&self) -> StageId {
        self.shared.id
    }

    /// Read-only view for diagnostics
    pub fn monitor(&self) -> BufferMonitor {
        BufferMonitor {
            shared: Arc::clone(&self.shared),
        }
    }

    pub(crate) fn belongs_to(&self, monitor: &BufferMonitor) -> bool {
        Arc::ptr_eq(&self.shared, &monitor.shared)
    }

    pub(crate) fn mark_checked_out(&mut self) {
        mark_checked_out(&self.shared, &mut self.checked_out);
    }

    pub(crate) fn mark_returned(&mut self) {
        mark_returned(&self.shared, &mut self.checked_out);
    }
}

impl Drop for FrameConsumer {
    fn drop(&mut self) {
        self.mark_returned();
    }
}

fn silent_frame(frame_bytes: usize) -> Box<[u8]> {
    vec![0u8; frame_bytes].into_boxed_slice()
}

fn mark_checked_out(shared: &Shared, flag: &mut bool) {
    if !*flag {
        *flag = true;
        shared.checked_out.fetch_add(1, Ordering::AcqRel);
    }
}

fn mark_returned(shared: &Shared, flag: &mut bool) {
    if *flag {
        *flag = false;
        shared.checked_out.fetch_sub(1, Ordering::AcqRel);
    }
}

/// Read-only diagnostics view of a ring buffer
///
/// Safe to use from any thread. Values are approximate while the producer
/// and consumer are running.
#[derive(Clone)]
pub struct BufferMonitor {
    shared: Arc<Shared>,
}

impl BufferMonitor {
    /// Stage this buffer serves
    pub fn id(&self) -> StageId {
        self.shared.id
    }

    /// Geometry the buffer was built against
    pub fn geometry(&self) -> &Arc<FrameGeometry> {
        &self.shared.geometry
    }

    /// Whole frames waiting to be read
    pub fn available_frames(&self) -> usize {
        self.shared.available_frames()
    }

    /// Bytes waiting to be read
    pub fn available_bytes(&self) -> u32 {
        self.shared.available_bytes()
    }

    /// Depth in frames
    pub fn capacity_frames(&self) -> usize {
        self.shared.capacity_frames()
    }

    /// Total capacity in bytes
    pub fn capacity_bytes(&self) -> u32 {
        self.shared.capacity_bytes()
    }

    /// Event counters
    pub fn stats(&self) -> StatsSnapshot {
        self.shared.stats.snapshot()
    }

    /// Handles currently checked out of their stage and still alive
    pub fn checked_out(&self) -> usize {
        self.shared.checked_out.load(Ordering::Acquire)
    }
}

impl fmt::Debug for BufferMonitor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BufferMonitor")
            .field("id", &self.shared.id)
            .field("available_frames", &self.available_frames())
            .field("capacity_frames", &self.capacity_frames())
            .field("frame_bytes", &self.shared.frame_bytes)
            .finish()
    }
}
