/// Stress tests for the frame ring buffer
///
/// A producer and a consumer thread hammer one buffer with randomized
/// pacing. Every frame carries its sequence number twice, so a torn or
/// spliced read shows up as a mismatch, and reordering shows up as a
/// non-increasing sequence.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use rand::rngs::SmallRng;
use rand::{Rng, SeedableRng};
use toxphone_audio::audio::{
    FrameGeometry, FrameRingBuffer, PipelineKind, ReadOutcome, StageId, WriteOutcome,
};

const FRAMES: u64 = 100_000;

fn geometry() -> Arc<FrameGeometry> {
    // 8 samples, mono, 16-bit -> 16 bytes
    Arc::new(FrameGeometry::new(1_000, 1, 2, 8_000).unwrap())
}

fn stamp(frame: &mut [u8], seq: u64) {
    frame[..8].copy_from_slice(&seq.to_le_bytes());
    frame[8..16].copy_from_slice(&(!seq).to_le_bytes());
}

fn unstamp(frame: &[u8]) -> u64 {
    let seq = u64::from_le_bytes(frame[..8].try_into().unwrap());
    let check = u64::from_le_bytes(frame[8..16].try_into().unwrap());
    assert_eq!(check, !seq, "torn frame for sequence {}", seq);
    seq
}

#[test]
fn test_concurrent_ordering_and_accounting() {
    println!("\n=== Ring Buffer Stress Test ===");

    let id = StageId::new(PipelineKind::Record, 0);
    let (mut producer, mut consumer) = FrameRingBuffer::new(id, geometry(), 4).unwrap();
    let monitor = producer.monitor();
    let done = Arc::new(AtomicBool::new(false));

    let writer_done = Arc::clone(&done);
    let writer = thread::spawn(move || {
        let mut rng = SmallRng::seed_from_u64(0x5EED);
        let mut frame = [0u8; 16];
        let mut dropped = 0u64;
        for seq in 0..FRAMES {
            stamp(&mut frame, seq);
            if let WriteOutcome::WrittenOverwriting(bytes) = producer.write(&frame).unwrap() {
                assert_eq!(bytes, 16);
                dropped += 1;
            }
            if rng.gen_ratio(1, 500) {
                thread::sleep(Duration::from_micros(rng.gen_range(1..50)));
            }
        }
        writer_done.store(true, Ordering::Release);
        dropped
    });

    let mut rng = SmallRng::seed_from_u64(0xC0FFEE);
    let mut frame = [0u8; 16];
    let mut last: Option<u64> = None;
    let mut received = 0u64;

    loop {
        // Check the flag before reading so the final drain sees every frame
        let finished = done.load(Ordering::Acquire);
        if consumer.try_read(&mut frame).unwrap() {
            let seq = unstamp(&frame);
            if let Some(prev) = last {
                assert!(seq > prev, "sequence went from {} to {}", prev, seq);
            }
            last = Some(seq);
            received += 1;
            if rng.gen_ratio(1, 500) {
                thread::sleep(Duration::from_micros(rng.gen_range(1..50)));
            }
        } else if finished {
            break;
        }
    }

    let dropped = writer.join().unwrap();
    let stats = monitor.stats();
    println!(
        "written={} read={} dropped={} overruns={}",
        stats.frames_written, stats.frames_read, stats.frames_dropped, stats.overruns
    );

    assert_eq!(stats.frames_written, FRAMES);
    assert_eq!(stats.frames_read, received);
    assert_eq!(stats.frames_dropped, dropped);
    assert_eq!(stats.frames_written, stats.frames_read + stats.frames_dropped);
    assert_eq!(stats.underruns, 0, "try_read never counts underruns");
    // The newest frame is never the one dropped
    assert_eq!(last, Some(FRAMES - 1));
}

#[test]
fn test_realtime_reader_against_bursty_writer() {
    println!("\n=== Real-time Reader Stress Test ===");

    let id = StageId::new(PipelineKind::Voice, 0);
    let (mut producer, mut consumer) = FrameRingBuffer::new(id, geometry(), 2).unwrap();
    let monitor = consumer.monitor();

    let writer = thread::spawn(move || {
        let mut rng = SmallRng::seed_from_u64(42);
        let mut frame = [0u8; 16];
        let mut seq = 1u64;
        for _ in 0..2_000 {
            for _ in 0..rng.gen_range(0..4) {
                stamp(&mut frame, seq);
                producer.write(&frame).unwrap();
                seq += 1;
            }
            thread::sleep(Duration::from_micros(20));
        }
        producer
    });

    let mut frame = [0u8; 16];
    let mut last = 0u64;
    let mut silent = 0u64;
    let mut filled = 0u64;
    while !writer.is_finished() {
        match consumer.read(&mut frame).unwrap() {
            ReadOutcome::Filled => {
                let seq = unstamp(&frame);
                assert!(seq > last);
                last = seq;
                filled += 1;
            }
            ReadOutcome::Underrun => {
                assert!(frame.iter().all(|&b| b == 0), "underrun must be silence");
                silent += 1;
            }
        }
        thread::sleep(Duration::from_micros(30));
    }

    let _producer = writer.join().unwrap();
    let stats = monitor.stats();
    println!("filled={} silent={} dropped={}", filled, silent, stats.frames_dropped);

    assert_eq!(stats.underruns, silent);
    assert_eq!(stats.frames_read, filled);
    assert!(monitor.available_frames() <= monitor.capacity_frames());
}

fn race_at_capacity(capacity: usize, frames: u64) {
    let id = StageId::new(PipelineKind::Record, 1);
    let (mut producer, mut consumer) = FrameRingBuffer::new(id, geometry(), capacity).unwrap();
    let monitor = producer.monitor();
    let done = Arc::new(AtomicBool::new(false));

    let writer_done = Arc::clone(&done);
    let writer = thread::spawn(move || {
        let mut frame = [0u8; 16];
        for seq in 0..frames {
            stamp(&mut frame, seq);
            producer.write(&frame).unwrap();
        }
        writer_done.store(true, Ordering::Release);
    });

    let mut frame = [0u8; 16];
    let mut last: Option<u64> = None;
    loop {
        let finished = done.load(Ordering::Acquire);
        if consumer.try_read(&mut frame).unwrap() {
            let seq = unstamp(&frame);
            if let Some(prev) = last {
                assert!(seq > prev, "sequence went from {} to {}", prev, seq);
            }
            last = Some(seq);
        } else if finished {
            break;
        }
    }
    writer.join().unwrap();

    let stats = monitor.stats();
    println!(
        "cap={} written={} read={} dropped={}",
        capacity, stats.frames_written, stats.frames_read, stats.frames_dropped
    );
    assert_eq!(stats.frames_written, frames);
    assert_eq!(stats.frames_written, stats.frames_read + stats.frames_dropped);
    assert_eq!(last, Some(frames - 1));
}

#[test]
fn test_overwrite_races_reader_at_minimum_depth() {
    println!("\n=== Minimum Depth Overwrite Race Test ===");

    // Nearly every write displaces a frame the reader is racing to pop
    race_at_capacity(1, 200_000);
    race_at_capacity(2, 200_000);
}
