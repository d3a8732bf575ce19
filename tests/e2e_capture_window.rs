//! E2E tests for the fill-and-freeze capture window behind the engine
//!
//! Chunks are pushed through the scripted backend on the test thread, so
//! every delivery has landed by the time the snapshot is taken.

use approx::assert_abs_diff_eq;
use loopmeter::audio::scripted::ScriptedBackend;
use loopmeter::{CalibrationTable, CaptureEngine, EngineConfig, SampleSpec, SnapshotMode};

fn engine(backend: &ScriptedBackend, window: usize, channels: u16) -> CaptureEngine<ScriptedBackend> {
    let config = EngineConfig {
        window_samples: window,
        sample_spec: SampleSpec {
            channels,
            ..SampleSpec::default()
        },
        health_poll_ms: 5,
        ..EngineConfig::default()
    };
    CaptureEngine::with_calibration(
        backend.clone(),
        config,
        CalibrationTable::uniform(window / 2, 1.0).unwrap(),
    )
    .unwrap()
}

fn level(sample: i16) -> f32 {
    (sample as f32).abs() / 32768.0
}

#[test]
fn test_partial_window_is_not_visible() {
    let backend = ScriptedBackend::with_default_monitor();
    let engine = engine(&backend, 8, 1);
    engine.start().unwrap().wait().unwrap();

    assert!(backend.deliver(&[1000, 2000, 3000, 4000]));
    assert_eq!(engine.snapshot(SnapshotMode::Amplitude), vec![0.0; 4]);
    assert_eq!(engine.stats().cursor, 4);
}

#[test]
fn test_overflow_freezes_first_window_and_drops_tail() {
    let backend = ScriptedBackend::with_default_monitor();
    let engine = engine(&backend, 8, 1);
    engine.start().unwrap().wait().unwrap();

    backend.deliver(&[100, 200, 300, 400]);
    backend.deliver(&[500, 600, 700, 800, 900, 1000]);

    let values = engine.snapshot(SnapshotMode::Amplitude);
    assert_eq!(values.len(), 4);
    for (value, &sample) in values.iter().zip(&[100, 200, 300, 400]) {
        assert_abs_diff_eq!(*value, level(sample), epsilon = 1e-7);
    }

    let stats = engine.stats();
    assert_eq!(stats.freezes, 1);
    assert_eq!(stats.dropped_samples, 2);
    assert_eq!(stats.delivered_samples, 10);
    assert_eq!(stats.cursor, 0);
}

#[test]
fn test_dropped_tail_is_not_carried_forward() {
    let backend = ScriptedBackend::with_default_monitor();
    let engine = engine(&backend, 4, 1);
    engine.start().unwrap().wait().unwrap();

    backend.deliver(&[1, 2, 3, 4, 5, 6]);
    backend.deliver(&[-7, -8, -9, -10]);

    let values = engine.snapshot(SnapshotMode::Amplitude);
    assert_abs_diff_eq!(values[0], level(7), epsilon = 1e-7);
    assert_abs_diff_eq!(values[1], level(8), epsilon = 1e-7);
    assert_eq!(engine.stats().freezes, 2);
}

#[test]
fn test_exact_fill_freezes_without_loss() {
    let backend = ScriptedBackend::with_default_monitor();
    let engine = engine(&backend, 4, 1);
    engine.start().unwrap().wait().unwrap();

    backend.deliver(&[32767, 32767]);
    backend.deliver(&[32767, 32767]);

    let stats = engine.stats();
    assert_eq!(stats.freezes, 1);
    assert_eq!(stats.dropped_samples, 0);
    assert!(engine
        .snapshot(SnapshotMode::Amplitude)
        .iter()
        .all(|&v| v > 0.999));
}

#[test]
fn test_stereo_frames_are_averaged() {
    let backend = ScriptedBackend::with_default_monitor();
    let engine = engine(&backend, 8, 2);
    assert_eq!(engine.bin_count(), 4);
    engine.start().unwrap().wait().unwrap();

    backend.deliver(&[1000, -3000, 0, 0, 16384, 16384, -32768, -32768]);

    let values = engine.snapshot(SnapshotMode::Amplitude);
    assert_eq!(values.len(), 4);
    assert_abs_diff_eq!(values[0], 2000.0 / 32768.0, epsilon = 1e-7);
    assert_eq!(values[1], 0.0);
    assert_abs_diff_eq!(values[2], 0.5, epsilon = 1e-7);
    assert_eq!(values[3], 1.0);
}

#[test]
fn test_nothing_recorded_before_start() {
    let backend = ScriptedBackend::with_default_monitor();
    let engine = engine(&backend, 4, 1);

    assert!(!backend.deliver(&[1, 2, 3, 4]));
    assert_eq!(engine.stats().delivered_samples, 0);
}

#[test]
fn test_snapshot_is_stable_until_next_freeze() {
    let backend = ScriptedBackend::with_default_monitor();
    let engine = engine(&backend, 4, 1);
    engine.start().unwrap().wait().unwrap();

    backend.deliver(&[400, 400, 400, 400]);
    let first = engine.snapshot(SnapshotMode::Amplitude);

    // Partial fill of the next window leaves the snapshot alone
    backend.deliver(&[9000, 9000]);
    assert_eq!(engine.snapshot(SnapshotMode::Amplitude), first);

    backend.deliver(&[9000, 9000]);
    assert_ne!(engine.snapshot(SnapshotMode::Amplitude), first);
}

#[test]
fn test_mono_window_of_eight_with_four_bin_table() {
    let backend = ScriptedBackend::with_default_monitor();
    let config = EngineConfig {
        window_samples: 8,
        sample_spec: SampleSpec {
            channels: 1,
            ..SampleSpec::default()
        },
        health_poll_ms: 5,
        ..EngineConfig::default()
    };
    let engine = CaptureEngine::with_calibration(
        backend.clone(),
        config,
        CalibrationTable::uniform(4, 1.0).unwrap(),
    )
    .unwrap();
    assert_eq!(engine.bin_count(), 4);
    engine.start().unwrap().wait().unwrap();

    backend.deliver(&[1, 2, 3, 4]);
    backend.deliver(&[5, 6, 7, 8, 9, 10]);

    let values = engine.snapshot(SnapshotMode::Amplitude);
    assert_eq!(values.len(), 4);
    for (value, sample) in values.iter().zip(1..) {
        assert_abs_diff_eq!(*value, level(sample), epsilon = 1e-9);
    }

    let spectrum = engine.snapshot(SnapshotMode::Spectrum);
    assert_eq!(spectrum.len(), 4);
    assert!(spectrum.iter().all(|v| (0.0..=1.0).contains(v)));

    let stats = engine.stats();
    assert_eq!(stats.freezes, 1);
    assert_eq!(stats.dropped_samples, 2);
}

#[test]
fn test_aligned_chunks_freeze_once_per_window() {
    let backend = ScriptedBackend::with_default_monitor();
    let engine = engine(&backend, 8, 1);
    engine.start().unwrap().wait().unwrap();

    let windows: [&[&[i16]]; 3] = [
        &[&[100, 200, 300], &[400, 500, 600, 700, 800]],
        &[&[-1100, -1200, -1300, -1400, -1500, -1600, -1700, -1800]],
        &[&[2100, 2200], &[2300, 2400, 2500, 2600, 2700, 2800]],
    ];

    for (n, chunks) in windows.iter().enumerate() {
        for chunk in chunks.iter() {
            assert!(backend.deliver(chunk));
        }

        let stats = engine.stats();
        assert_eq!(stats.freezes, n as u64 + 1);
        assert_eq!(stats.cursor, 0);
        assert_eq!(stats.dropped_samples, 0);

        let window: Vec<i16> = chunks.concat();
        let values = engine.snapshot(SnapshotMode::Amplitude);
        for (value, &sample) in values.iter().zip(&window) {
            assert_abs_diff_eq!(*value, level(sample), epsilon = 1e-7);
        }
    }
    assert_eq!(engine.stats().delivered_samples, 24);
}
