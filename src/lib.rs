//! Loopmeter - monitor-source audio capture for light and LED drivers
//!
//! This library re-exports the capture engine, analysis, and configuration
//! from `loopmeter-core`.

pub use loopmeter_core::audio;
pub use loopmeter_core::config;

pub use loopmeter_core::{
    CalibrationTable, CaptureEngine, EngineConfig, EngineError, EngineState, PeakHold,
    SampleSpec, SnapshotMode, SourceInfo, Startup,
};
pub use loopmeter_core::{
    BUILD_DATE, DEFAULT_CHANNELS, DEFAULT_SAMPLE_RATE, DEFAULT_WINDOW_SAMPLES, MAX_AMPLITUDE,
    VERSION,
};
