//! Audio processing module
//!
//! This module contains all audio-related functionality including:
//! - Capture lifecycle and event loop ([`engine`])
//! - Fill-and-freeze sample window ([`capture`])
//! - Amplitude and spectrum snapshots ([`analyzer`])
//! - Per-bin normalization constants ([`calibration`])
//! - Start/stop/read serialization ([`gate`])
//! - Audio subsystem interface ([`backend`]) and its implementations
//!   ([`cpal_backend`], [`scripted`])
//! - Consumer-side peak smoothing ([`rolling`])

pub mod analyzer;
pub mod backend;
pub mod calibration;
pub mod capture;
pub mod cpal_backend;
pub mod engine;
pub mod gate;
pub mod rolling;
pub mod scripted;
pub mod types;
