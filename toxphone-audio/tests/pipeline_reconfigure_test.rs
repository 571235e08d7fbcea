/// Integration tests for pipeline wiring and reconfiguration
///
/// Handles are checked out to real threads, and geometry changes are only
/// accepted once every one of them has come back or been dropped.

use std::sync::Arc;
use std::thread;

use toxphone_audio::audio::{
    AudioError, AudioSubsystem, FrameGeometryRegistry, FrameParams, PipelineKind, PipelineLayout,
    ReadOutcome, RECORD_CAPTURE_STAGE, RECORD_PROCESSED_STAGE,
};

fn narrowband() -> FrameParams {
    FrameParams {
        latency_micros: 20_000,
        channels: 1,
        sample_size_bytes: 2,
        sampling_rate_hz: 8_000,
    }
}

fn subsystem() -> AudioSubsystem {
    let registry = FrameGeometryRegistry::new(narrowband(), narrowband()).unwrap();
    AudioSubsystem::new(Arc::new(registry), PipelineLayout::default()).unwrap()
}

#[test]
fn test_capacity_follows_geometry() {
    println!("\n=== Capacity Follows Geometry Test ===");

    let mut audio = subsystem();
    let stage = audio.record_buffer_stage(RECORD_CAPTURE_STAGE).unwrap();
    assert_eq!(stage.capacity_bytes(), 4 * 320);

    let wideband = FrameParams {
        sampling_rate_hz: 16_000,
        ..narrowband()
    };
    let geometry = audio
        .reconfigure(PipelineKind::Record, Some(wideband), false)
        .unwrap();
    assert_eq!(geometry.frame_byte_size(), 640);

    for stage in audio.pipeline(PipelineKind::Record).stages() {
        assert_eq!(stage.capacity_bytes(), 4 * 640);
        assert_eq!(stage.available_bytes(), 0);
        assert_eq!(stage.capacity_bytes() % geometry.frame_byte_size(), 0);
    }
    // Voice is untouched
    assert_eq!(audio.voice_buffer().capacity_bytes(), 4 * 320);
}

#[test]
fn test_reconfigure_waits_for_threads() {
    println!("\n=== Reconfigure Waits For Threads Test ===");

    let mut audio = subsystem();
    let mut producer = audio.voice_buffer().take_producer().unwrap();
    let mut consumer = audio.voice_buffer().take_consumer().unwrap();

    let writer = thread::spawn(move || {
        let frame = vec![3u8; 320];
        for _ in 0..10 {
            producer.write(&frame).unwrap();
        }
        producer
    });
    let producer = writer.join().unwrap();

    let wideband = FrameParams {
        sampling_rate_hz: 16_000,
        ..narrowband()
    };
    let err = audio
        .reconfigure(PipelineKind::Voice, Some(wideband), false)
        .unwrap_err();
    assert_eq!(
        err,
        AudioError::PipelineBusy {
            pipeline: PipelineKind::Voice,
            outstanding: 2
        }
    );
    // The registry was not touched by the refused call
    assert_eq!(
        audio.registry().get(PipelineKind::Voice).sampling_rate_hz(),
        8_000
    );

    // Oldest frames were overwritten, the newest four remain
    let mut frame = vec![0u8; 320];
    for _ in 0..4 {
        assert_eq!(consumer.read(&mut frame).unwrap(), ReadOutcome::Filled);
        assert!(frame.iter().all(|&b| b == 3));
    }
    assert_eq!(consumer.read(&mut frame).unwrap(), ReadOutcome::Underrun);

    audio.voice_buffer().restore_producer(producer).unwrap();
    // A dropped handle counts as stopped too
    drop(consumer);
    assert!(audio.pipeline(PipelineKind::Voice).is_quiesced());

    let generation = audio.pipeline(PipelineKind::Voice).generation();
    audio
        .reconfigure(PipelineKind::Voice, Some(wideband), false)
        .unwrap();
    assert_eq!(audio.pipeline(PipelineKind::Voice).generation(), generation + 1);
    assert_eq!(audio.voice_buffer().capacity_bytes(), 4 * 640);

    // Both endpoints are available again after the rebuild
    assert!(audio.voice_buffer().take_consumer().is_ok());
}

#[test]
fn test_invalid_reconfigure_keeps_buffers() {
    println!("\n=== Invalid Reconfigure Test ===");

    let mut audio = subsystem();
    let bad = FrameParams {
        sample_size_bytes: 0,
        ..narrowband()
    };
    assert!(matches!(
        audio.reconfigure(PipelineKind::Record, Some(bad), false),
        Err(AudioError::InvalidGeometry(_))
    ));
    assert_eq!(audio.pipeline(PipelineKind::Record).generation(), 0);
    assert!(!audio.is_stale(PipelineKind::Record));
}

#[test]
fn test_stale_pipeline_refresh() {
    println!("\n=== Stale Pipeline Refresh Test ===");

    let mut audio = subsystem();
    assert!(!audio.refresh(PipelineKind::Record).unwrap());

    // Another control thread changes the registry directly
    let registry = Arc::clone(audio.registry());
    thread::spawn(move || {
        let stereo = FrameParams {
            channels: 2,
            ..narrowband()
        };
        registry
            .set(PipelineKind::Record, Some(stereo), false)
            .unwrap();
    })
    .join()
    .unwrap();

    assert!(audio.is_stale(PipelineKind::Record));
    assert!(audio.refresh(PipelineKind::Record).unwrap());
    assert!(!audio.is_stale(PipelineKind::Record));
    let stage = audio.record_buffer_stage(RECORD_PROCESSED_STAGE).unwrap();
    assert_eq!(stage.capacity_bytes(), 4 * 640);
}

#[test]
fn test_reset_restores_default_geometry() {
    println!("\n=== Reset To Default Test ===");

    let mut audio = subsystem();
    let stereo = FrameParams {
        channels: 2,
        ..narrowband()
    };
    audio
        .reconfigure(PipelineKind::Record, Some(stereo), false)
        .unwrap();
    let geometry = audio.reconfigure(PipelineKind::Record, None, true).unwrap();

    assert_eq!(geometry.params(), narrowband());
    assert_eq!(
        audio
            .record_buffer_stage(RECORD_CAPTURE_STAGE)
            .unwrap()
            .capacity_bytes(),
        4 * 320
    );
}

#[test]
fn test_stage_index_out_of_range() {
    println!("\n=== Stage Index Test ===");

    let mut audio = subsystem();
    // Record stages 1 and 2 sit at indices 0 and 1
    assert_eq!(
        audio.record_buffer_stage(RECORD_CAPTURE_STAGE).unwrap().id().index,
        0
    );
    assert_eq!(
        audio.record_buffer_stage(RECORD_PROCESSED_STAGE).unwrap().id().index,
        1
    );
    assert!(matches!(
        audio.record_buffer_stage(2),
        Err(AudioError::StageOutOfRange {
            pipeline: PipelineKind::Record,
            index: 2
        })
    ));
}
