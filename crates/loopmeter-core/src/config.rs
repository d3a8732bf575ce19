//! Persistent engine configuration
//!
//! Stored as JSON at `<config_dir>/loopmeter/config.json`. Every field is
//! optional in the file; missing fields take their defaults.

use crate::audio::backend::ConnectRequest;
use crate::audio::calibration::CalibrationTable;
use crate::audio::engine::EngineError;
use crate::audio::types::SampleSpec;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors reading or writing the config file
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Config I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] serde_json::Error),

    #[error(transparent)]
    Invalid(#[from] EngineError),
}

fn default_client_name() -> String {
    "loopmeter".to_string()
}

fn default_stream_name() -> String {
    "Monitor capture".to_string()
}

fn default_window_samples() -> usize {
    crate::DEFAULT_WINDOW_SAMPLES
}

fn default_warm_plan() -> bool {
    true
}

fn default_health_poll_ms() -> u64 {
    50
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Sound server to connect to (None = system default)
    #[serde(default)]
    pub server: Option<String>,
    /// Application name shown by the sound server
    #[serde(default = "default_client_name")]
    pub client_name: String,
    /// Stream name shown by the sound server
    #[serde(default = "default_stream_name")]
    pub stream_name: String,
    /// Format requested for the capture stream
    #[serde(default)]
    pub sample_spec: SampleSpec,
    /// Capture window in interleaved samples
    #[serde(default = "default_window_samples")]
    pub window_samples: usize,
    /// Per-bin spectrum maxima (None = built-in table)
    #[serde(default)]
    pub calibration: Option<Vec<f32>>,
    /// Build the transform plan during start instead of on first spectrum
    #[serde(default = "default_warm_plan")]
    pub warm_plan: bool,
    /// How often the event loop checks the connection, in milliseconds
    #[serde(default = "default_health_poll_ms")]
    pub health_poll_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            server: None,
            client_name: default_client_name(),
            stream_name: default_stream_name(),
            sample_spec: SampleSpec::default(),
            window_samples: default_window_samples(),
            calibration: None,
            warm_plan: default_warm_plan(),
            health_poll_ms: default_health_poll_ms(),
        }
    }
}

impl EngineConfig {
    /// Check geometry and timing
    pub fn validate(&self) -> Result<(), EngineError> {
        let channels = self.sample_spec.stride();
        if channels == 0 {
            return Err(EngineError::Config("channel count must be positive".into()));
        }
        if self.sample_spec.rate == 0 {
            return Err(EngineError::Config("sample rate must be positive".into()));
        }
        if self.window_samples == 0 || self.window_samples % channels != 0 {
            return Err(EngineError::Config(format!(
                "window_samples ({}) must be a positive multiple of channels ({})",
                self.window_samples, channels
            )));
        }
        if self.window_samples % 2 != 0 || self.window_samples / channels < self.bin_count() {
            return Err(EngineError::Config(format!(
                "window_samples ({}) must be even and hold at least {} frames of {} channels",
                self.window_samples,
                self.bin_count(),
                channels
            )));
        }
        if self.health_poll_ms == 0 {
            return Err(EngineError::Config("health_poll_ms must be positive".into()));
        }
        Ok(())
    }

    /// Values per snapshot: the transform bins below Nyquist
    pub fn bin_count(&self) -> usize {
        self.window_samples / 2
    }

    /// Calibration table for this geometry
    ///
    /// An explicit table wins; otherwise the built-in table is used when its
    /// length matches the bin count.
    pub fn calibration_table(&self) -> Result<CalibrationTable, EngineError> {
        match &self.calibration {
            Some(maxima) => CalibrationTable::new(maxima.clone()),
            None if self.bin_count() == CalibrationTable::reference_len() => {
                Ok(CalibrationTable::reference())
            }
            None => Err(EngineError::Config(format!(
                "no calibration table for {} bins; the built-in table covers {}",
                self.bin_count(),
                CalibrationTable::reference_len()
            ))),
        }
    }

    /// Connection parameters handed to the audio subsystem
    pub fn connect_request(&self) -> ConnectRequest {
        ConnectRequest {
            server: self.server.clone(),
            client_name: self.client_name.clone(),
            stream_name: self.stream_name.clone(),
            spec: self.sample_spec,
        }
    }

    /// Config file path: `<config_dir>/loopmeter/config.json`
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("loopmeter")
            .join("config.json")
    }

    /// Load and validate a config file
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&contents)?;
        config.validate()?;
        tracing::info!(path = %path.display(), "Loaded config from disk");
        Ok(config)
    }

    /// Load a config file, falling back to defaults on any error
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(ConfigError::Io(e)) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::info!(path = %path.display(), "No config file found, using defaults");
                Self::default()
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "Failed to load config, using defaults");
                Self::default()
            }
        }
    }

    /// Save config to disk, creating parent directories if needed
    pub fn save(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        tracing::info!(path = %path.display(), "Config saved to disk");
        Ok(())
    }
}
