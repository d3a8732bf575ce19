//! In-memory audio subsystem driven by the caller
//!
//! Stands in for a sound server in tests. Chunks are pushed with
//! [`ScriptedBackend::deliver`] from any thread; failures and a slow
//! handshake can be injected at fixed points of the negotiation.

use crate::audio::backend::{
    AudioBackend, BackendConnection, BackendError, ConnectRequest, ContextState, DataCallback,
};
use crate::audio::types::SourceInfo;
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Negotiation step that should fail
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailPoint {
    Connect,
    ListSources,
    RecordConnect,
}

/// Backend calls observed, in order
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptEvent {
    Connected,
    SourcesListed,
    Recording(String),
    StreamDisconnected,
    TornDown,
}

struct Script {
    sources: Vec<SourceInfo>,
    fail_at: Option<FailPoint>,
    state: ContextState,
    callback: Option<DataCallback>,
    events: Vec<ScriptEvent>,
    requests: Vec<ConnectRequest>,
    connect_held: bool,
}

/// Scripted audio subsystem; clones share the same script
#[derive(Clone)]
pub struct ScriptedBackend {
    script: Arc<Mutex<Script>>,
    connect_released: Arc<Condvar>,
}

impl ScriptedBackend {
    /// Backend advertising `sources`
    pub fn new(sources: Vec<SourceInfo>) -> Self {
        Self {
            script: Arc::new(Mutex::new(Script {
                sources,
                fail_at: None,
                state: ContextState::Terminated,
                callback: None,
                events: Vec::new(),
                requests: Vec::new(),
                connect_held: false,
            })),
            connect_released: Arc::new(Condvar::new()),
        }
    }

    /// Backend with a microphone and one monitor of `speakers`
    pub fn with_default_monitor() -> Self {
        Self::new(vec![
            SourceInfo::input("mic"),
            SourceInfo::monitor("speakers.monitor", "speakers")
                .with_description("Monitor of Speakers"),
        ])
    }

    /// Make a negotiation step fail (`None` clears it)
    pub fn fail_at(&self, point: Option<FailPoint>) {
        self.script.lock().fail_at = point;
    }

    /// Block every `connect` until [`Self::release_connect`]
    pub fn hold_connect(&self) {
        self.script.lock().connect_held = true;
    }

    /// Let held and future `connect` calls proceed
    pub fn release_connect(&self) {
        self.script.lock().connect_held = false;
        self.connect_released.notify_all();
    }

    /// Push one chunk through the recording callback
    ///
    /// Returns `false` when nothing is recording. Holding the script lock
    /// during the call means `disconnect` waits for an in-flight chunk.
    pub fn deliver(&self, chunk: &[i16]) -> bool {
        let mut script = self.script.lock();
        match script.callback.as_mut() {
            Some(callback) => {
                callback(chunk);
                true
            }
            None => false,
        }
    }

    /// Simulate the server going away
    pub fn drop_connection(&self) {
        let mut script = self.script.lock();
        script.state = ContextState::Failed;
        script.callback = None;
    }

    /// Calls observed so far
    pub fn events(&self) -> Vec<ScriptEvent> {
        self.script.lock().events.clone()
    }

    /// Requests passed to `connect`
    pub fn requests(&self) -> Vec<ConnectRequest> {
        self.script.lock().requests.clone()
    }

    /// Whether a recording callback is installed
    pub fn is_recording(&self) -> bool {
        self.script.lock().callback.is_some()
    }
}

impl Default for ScriptedBackend {
    fn default() -> Self {
        Self::with_default_monitor()
    }
}

impl AudioBackend for ScriptedBackend {
    type Connection = ScriptedConnection;

    fn connect(&self, request: &ConnectRequest) -> Result<Self::Connection, BackendError> {
        let mut script = self.script.lock();
        while script.connect_held {
            self.connect_released.wait(&mut script);
        }
        script.requests.push(request.clone());

        if script.fail_at == Some(FailPoint::Connect) {
            script.state = ContextState::Failed;
            return Err(BackendError::ConnectionFailed("connection refused".to_string()));
        }

        script.state = ContextState::Ready;
        script.events.push(ScriptEvent::Connected);
        Ok(ScriptedConnection {
            script: Arc::clone(&self.script),
        })
    }
}

/// Live connection of a [`ScriptedBackend`]
pub struct ScriptedConnection {
    script: Arc<Mutex<Script>>,
}

impl BackendConnection for ScriptedConnection {
    fn state(&self) -> ContextState {
        self.script.lock().state
    }

    fn list_sources(&mut self) -> Result<Vec<SourceInfo>, BackendError> {
        let mut script = self.script.lock();
        if script.fail_at == Some(FailPoint::ListSources) {
            return Err(BackendError::SourceList("query rejected".to_string()));
        }
        script.events.push(ScriptEvent::SourcesListed);
        Ok(script.sources.clone())
    }

    fn open_record_stream(
        &mut self,
        source: &SourceInfo,
        on_data: DataCallback,
    ) -> Result<(), BackendError> {
        let mut script = self.script.lock();
        if script.fail_at == Some(FailPoint::RecordConnect) {
            return Err(BackendError::RecordConnect {
                source_name: source.name.clone(),
                reason: "stream rejected".to_string(),
            });
        }
        script.callback = Some(on_data);
        script.events.push(ScriptEvent::Recording(source.name.clone()));
        Ok(())
    }

    fn disconnect(&mut self) {
        let mut script = self.script.lock();
        if script.callback.take().is_some() {
            script.events.push(ScriptEvent::StreamDisconnected);
        }
    }

    fn teardown(self) {
        let mut script = self.script.lock();
        script.state = ContextState::Terminated;
        script.events.push(ScriptEvent::TornDown);
    }
}
