//! Loopmeter Core - capture window, snapshot engine, and spectrum analysis
//!
//! This library listens to the monitor (loopback) source of a playback device,
//! keeps a fixed window of the most recent interleaved PCM samples, and turns
//! the last complete window into either a per-frame loudness vector or a
//! calibrated magnitude spectrum for light and LED drivers.

pub mod audio;
pub mod config;

pub use audio::{
    analyzer::Analyzer,
    calibration::CalibrationTable,
    capture::CaptureWindow,
    engine::{CaptureEngine, EngineError, Startup},
    rolling::PeakHold,
    types::{EngineState, SampleFormat, SampleSpec, SnapshotMode, SourceInfo},
};
pub use config::EngineConfig;

/// Application version from Cargo.toml
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Build date stamped by build.rs
pub const BUILD_DATE: &str = env!("BUILD_DATE");

/// Default sample rate requested from the audio subsystem
pub const DEFAULT_SAMPLE_RATE: u32 = 44100;

/// Default interleaved channel count
pub const DEFAULT_CHANNELS: u16 = 2;

/// Default capture window in samples (1024 bytes of S16 audio)
pub const DEFAULT_WINDOW_SAMPLES: usize = 512;

/// Normalization divisor for signed 16-bit samples
pub const MAX_AMPLITUDE: f32 = 32768.0;
