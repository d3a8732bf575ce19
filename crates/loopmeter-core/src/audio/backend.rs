//! Interface to the audio subsystem
//!
//! The engine only needs a handful of operations from whatever actually talks
//! to the sound server: open a connection, list capture sources, record from
//! one of them into a callback, and tear everything down again. A connection
//! is created and dropped on the engine's event loop thread, so it does not
//! have to be `Send` (cpal streams are not on every platform).

use crate::audio::types::{SampleSpec, SourceInfo};
use thiserror::Error;

/// Errors reported by the audio subsystem
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BackendError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Failed to list sources: {0}")]
    SourceList(String),

    #[error("No monitor source available")]
    NoMonitorSource,

    #[error("Failed to create capture stream: {0}")]
    StreamCreation(String),

    #[error("Failed to record from {source_name}: {reason}")]
    RecordConnect { source_name: String, reason: String },

    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    #[error("Connection lost: {0}")]
    ConnectionLost(String),
}

/// Connection state as reported by the audio subsystem
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// Handshake in progress
    Connecting,
    /// Usable
    Ready,
    /// Broken; no further data will arrive
    Failed,
    /// Closed by either side
    Terminated,
}

impl ContextState {
    /// Whether the connection can no longer deliver audio
    pub fn is_gone(self) -> bool {
        matches!(self, Self::Failed | Self::Terminated)
    }
}

/// Everything the audio subsystem needs to set up a capture connection
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConnectRequest {
    /// Server to connect to (`None` = system default)
    pub server: Option<String>,
    /// Application name shown by the sound server
    pub client_name: String,
    /// Stream name shown by the sound server
    pub stream_name: String,
    /// Format the capture stream must deliver
    pub spec: SampleSpec,
}

/// Receives interleaved samples on the audio subsystem's thread
pub type DataCallback = Box<dyn FnMut(&[i16]) + Send + 'static>;

/// Factory for connections to an audio subsystem
pub trait AudioBackend: Send + Sync + 'static {
    /// Live connection type, owned by the engine's event loop thread
    type Connection: BackendConnection;

    /// Open a connection and wait until it is ready or has failed
    fn connect(&self, request: &ConnectRequest) -> Result<Self::Connection, BackendError>;
}

/// A ready connection to the audio subsystem
pub trait BackendConnection {
    /// Current connection state
    fn state(&self) -> ContextState;

    /// Capture sources known to the server
    fn list_sources(&mut self) -> Result<Vec<SourceInfo>, BackendError>;

    /// Start recording `source`, delivering chunks to `on_data`
    ///
    /// Chunks must use the [`SampleSpec`] from the [`ConnectRequest`].
    fn open_record_stream(
        &mut self,
        source: &SourceInfo,
        on_data: DataCallback,
    ) -> Result<(), BackendError>;

    /// Stop and release the record stream; no callback fires afterwards
    fn disconnect(&mut self);

    /// Close the connection itself
    fn teardown(self)
    where
        Self: Sized;
}

/// First source that monitors a playback device
pub fn pick_monitor(sources: &[SourceInfo]) -> Option<&SourceInfo> {
    sources.iter().find(|s| s.is_monitor())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_pick_monitor_skips_plain_inputs() {
        let sources = vec![
            SourceInfo::input("mic"),
            SourceInfo::monitor("speakers.monitor", "speakers"),
            SourceInfo::monitor("hdmi.monitor", "hdmi"),
        ];
        assert_eq!(pick_monitor(&sources).unwrap().name, "speakers.monitor");
    }

    #[test]
    fn test_pick_monitor_none() {
        assert!(pick_monitor(&[SourceInfo::input("mic")]).is_none());
        assert!(pick_monitor(&[]).is_none());
    }

    #[test]
    fn test_gone_states() {
        assert!(ContextState::Failed.is_gone());
        assert!(ContextState::Terminated.is_gone());
        assert!(!ContextState::Ready.is_gone());
        assert!(!ContextState::Connecting.is_gone());
    }
}
