//! Shared value types for the capture engine

use serde::{Deserialize, Serialize};

/// Capture engine lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum EngineState {
    /// Nothing allocated, no connection
    #[default]
    Stopped,
    /// Negotiating with the audio subsystem
    Connecting,
    /// Recording from a monitor source
    Active,
    /// Tearing down stream, connection, and buffers
    Disconnecting,
}

impl EngineState {
    /// True while a start or stop sequence is still in flight
    pub fn is_transitional(self) -> bool {
        matches!(self, Self::Connecting | Self::Disconnecting)
    }
}

/// Sample encoding requested from the audio subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleFormat {
    /// Signed 16-bit little endian
    #[default]
    S16le,
}

impl SampleFormat {
    /// Size of one sample in bytes
    pub fn bytes_per_sample(self) -> usize {
        match self {
            Self::S16le => 2,
        }
    }
}

/// Stream format, fixed for the lifetime of a connection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleSpec {
    /// Sample rate in Hz
    pub rate: u32,
    /// Interleaved channel count
    pub channels: u16,
    /// Sample encoding
    #[serde(default)]
    pub format: SampleFormat,
}

impl SampleSpec {
    /// Interleave stride in samples
    pub fn stride(&self) -> usize {
        self.channels as usize
    }

    /// Number of raw bytes for `samples` interleaved samples
    pub fn bytes_for(&self, samples: usize) -> usize {
        samples * self.format.bytes_per_sample()
    }
}

impl Default for SampleSpec {
    fn default() -> Self {
        Self {
            rate: crate::DEFAULT_SAMPLE_RATE,
            channels: crate::DEFAULT_CHANNELS,
            format: SampleFormat::S16le,
        }
    }
}

/// A capture source reported by the audio subsystem
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SourceInfo {
    /// Source name used to open a record stream
    pub name: String,
    /// Human readable description, if the subsystem provides one
    pub description: Option<String>,
    /// Name of the playback device this source monitors, if any
    pub monitor_of_sink: Option<String>,
}

impl SourceInfo {
    /// A plain capture source (microphone, line in)
    pub fn input(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            monitor_of_sink: None,
        }
    }

    /// A loopback source that hears what `sink` plays
    pub fn monitor(name: impl Into<String>, sink: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            description: None,
            monitor_of_sink: Some(sink.into()),
        }
    }

    /// Attach a human readable description
    pub fn with_description(mut self, description: impl Into<String>) -> Self {
        self.description = Some(description.into());
        self
    }

    /// Description if present, the source name otherwise
    pub fn label(&self) -> &str {
        self.description.as_deref().unwrap_or(&self.name)
    }

    /// Whether this source is the monitor of a playback device
    pub fn is_monitor(&self) -> bool {
        self.monitor_of_sink.is_some()
    }
}

/// Which view of the frozen window a snapshot returns
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SnapshotMode {
    /// Per-frame mean absolute loudness
    Amplitude,
    /// Calibrated magnitude spectrum
    #[default]
    Spectrum,
}

impl SnapshotMode {
    /// Map the boolean "use spectrum" flag used by polling drivers
    pub fn from_spectrum_flag(use_spectrum: bool) -> Self {
        if use_spectrum {
            Self::Spectrum
        } else {
            Self::Amplitude
        }
    }
}
