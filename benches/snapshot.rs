//! Snapshot cost at the default geometry

use criterion::{black_box, criterion_group, criterion_main, Criterion};
use loopmeter::audio::analyzer::Analyzer;
use loopmeter::audio::capture::CaptureWindow;
use loopmeter::{CalibrationTable, DEFAULT_WINDOW_SAMPLES};

fn window_of_noise() -> Vec<i16> {
    let mut state = 0x1234_5678u32;
    (0..DEFAULT_WINDOW_SAMPLES)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state >> 16) as i16
        })
        .collect()
}

fn bench_snapshot(c: &mut Criterion) {
    let snapshot = window_of_noise();
    let mut analyzer = Analyzer::new(DEFAULT_WINDOW_SAMPLES, 2, CalibrationTable::reference())
        .expect("reference geometry");
    analyzer.allocate_buffers().expect("transform buffers");
    let mut out = vec![0.0; analyzer.bin_count()];

    c.bench_function("spectrum_512_stereo", |b| {
        b.iter(|| analyzer.spectrum(black_box(&snapshot), &mut out))
    });
    c.bench_function("amplitude_512_stereo", |b| {
        b.iter(|| analyzer.amplitude(black_box(&snapshot), &mut out))
    });
}

fn bench_append(c: &mut Criterion) {
    let chunk = window_of_noise();
    let mut window = CaptureWindow::new(DEFAULT_WINDOW_SAMPLES);

    c.bench_function("append_quarter_window", |b| {
        b.iter(|| window.append(black_box(&chunk[..DEFAULT_WINDOW_SAMPLES / 4])))
    });
}

criterion_group!(benches, bench_snapshot, bench_append);
criterion_main!(benches);
