//! Capture engine lifecycle and event loop
//!
//! Provides the public surface of the crate:
//! - `start()` begins negotiating with the audio subsystem and returns at once
//! - `stop()` tears the capture down and frees every buffer it allocated
//! - `snapshot()` turns the last frozen window into amplitude or spectrum
//!
//! ## Threads
//!
//! Each `start()` spawns an event loop thread that owns the backend
//! connection. It connects, lists sources, and starts recording from the
//! first monitor source while holding the [`Gate`] that `start()` acquired,
//! so no snapshot or stop can run during negotiation. Once recording (or
//! once negotiation failed) it releases the gate and completes the
//! [`Startup`] handle. Audio chunks arrive on the backend's own thread and go
//! straight into the [`CaptureSink`], which has its own lock.
//!
//! `stop()` takes the gate, disables chunk acceptance, tells the event loop
//! to disconnect the stream and close the connection, and joins it. Buffers
//! are only freed after the join, so no late callback can touch them.

use crate::audio::analyzer::Analyzer;
use crate::audio::backend::{
    pick_monitor, AudioBackend, BackendConnection, BackendError, ConnectRequest,
};
use crate::audio::calibration::CalibrationTable;
use crate::audio::capture::{CaptureSink, CaptureStats, CaptureWindow};
use crate::audio::gate::{Gate, OwnedGatePass};
use crate::audio::types::{EngineState, SampleSpec, SnapshotMode, SourceInfo};
use crate::config::EngineConfig;
use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use parking_lot::{Condvar, Mutex};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// Errors that can occur during capture engine operations
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum EngineError {
    #[error(transparent)]
    Backend(#[from] BackendError),

    #[error("Cannot {operation} while engine is {state:?}")]
    InvalidState {
        operation: &'static str,
        state: EngineState,
    },

    #[error("Failed to allocate {requested} transform samples")]
    ResourceExhausted { requested: usize },

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("Calibration table has {actual} bins, analyzer produces {expected}")]
    CalibrationMismatch { expected: usize, actual: usize },

    #[error("Snapshot size mismatch: expected {expected}, got {actual}")]
    SnapshotSize { expected: usize, actual: usize },

    #[error("Failed to spawn event loop thread: {0}")]
    Thread(String),
}

struct StartupSignal {
    outcome: Mutex<Option<Result<(), EngineError>>>,
    done: Condvar,
}

/// Completion handle for an asynchronous `start()`
///
/// Resolves to `Ok(())` once the engine is recording, or to the error that
/// ended negotiation.
#[derive(Clone)]
pub struct Startup {
    signal: Arc<StartupSignal>,
}

impl Startup {
    fn pending() -> Self {
        Self {
            signal: Arc::new(StartupSignal {
                outcome: Mutex::new(None),
                done: Condvar::new(),
            }),
        }
    }

    fn resolved(result: Result<(), EngineError>) -> Self {
        let startup = Self::pending();
        startup.complete(result);
        startup
    }

    fn complete(&self, result: Result<(), EngineError>) {
        *self.signal.outcome.lock() = Some(result);
        self.signal.done.notify_all();
    }

    /// Outcome if negotiation has finished
    pub fn try_result(&self) -> Option<Result<(), EngineError>> {
        self.signal.outcome.lock().clone()
    }

    /// Whether negotiation has finished
    pub fn is_complete(&self) -> bool {
        self.signal.outcome.lock().is_some()
    }

    /// Block until negotiation finishes
    pub fn wait(&self) -> Result<(), EngineError> {
        let mut outcome = self.signal.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return result.clone();
            }
            self.signal.done.wait(&mut outcome);
        }
    }

    /// Block until negotiation finishes or `timeout` passes
    pub fn wait_timeout(&self, timeout: Duration) -> Option<Result<(), EngineError>> {
        let deadline = Instant::now() + timeout;
        let mut outcome = self.signal.outcome.lock();
        loop {
            if let Some(result) = outcome.as_ref() {
                return Some(result.clone());
            }
            if self.signal.done.wait_until(&mut outcome, deadline).timed_out() {
                return outcome.clone();
            }
        }
    }
}

impl std::fmt::Debug for Startup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Startup")
            .field("outcome", &self.try_result())
            .finish()
    }
}

/// State shared between caller threads and the event loop
struct Shared {
    gate: Arc<Gate>,
    state: Mutex<EngineState>,
    analyzer: Mutex<Analyzer>,
    sink: CaptureSink,
    /// Copy of the frozen window taken under the gate
    scratch: Mutex<Vec<i16>>,
    /// Returned while not recording
    last_output: Mutex<Vec<f32>>,
    last_error: Mutex<Option<EngineError>>,
    pending: Mutex<Option<Startup>>,
}

impl Shared {
    fn state(&self) -> EngineState {
        *self.state.lock()
    }

    fn set_state(&self, next: EngineState) {
        let prev = std::mem::replace(&mut *self.state.lock(), next);
        tracing::debug!(from = ?prev, to = ?next, "Engine state changed");
    }

    fn record_error(&self, error: &EngineError) {
        *self.last_error.lock() = Some(error.clone());
    }

    /// Free what `start()` allocated; the caller holds the gate and the
    /// event loop no longer delivers
    fn release_resources(&self) {
        self.sink.set_accepting(false);
        self.sink.reset();
        self.analyzer.lock().release_buffers();
        self.last_output.lock().fill(0.0);
    }
}

enum LoopCommand {
    Shutdown,
}

struct Worker {
    commands: Sender<LoopCommand>,
    thread: JoinHandle<()>,
}

impl Worker {
    fn join(self) {
        drop(self.commands);
        if self.thread.join().is_err() {
            tracing::error!("Capture event loop panicked");
        }
    }
}

/// Monitor-source capture engine
///
/// All methods take `&self`; share the engine between threads with an `Arc`.
pub struct CaptureEngine<B: AudioBackend> {
    backend: Arc<B>,
    request: ConnectRequest,
    window_samples: usize,
    warm_plan: bool,
    health_poll: Duration,
    shared: Arc<Shared>,
    worker: Mutex<Option<Worker>>,
}

impl<B: AudioBackend> CaptureEngine<B> {
    /// Create a stopped engine, resolving the calibration table from `config`
    pub fn new(backend: B, config: EngineConfig) -> Result<Self, EngineError> {
        let calibration = config.calibration_table()?;
        Self::with_calibration(backend, config, calibration)
    }

    /// Create a stopped engine with an explicit calibration table
    pub fn with_calibration(
        backend: B,
        config: EngineConfig,
        calibration: CalibrationTable,
    ) -> Result<Self, EngineError> {
        config.validate()?;
        let analyzer = Analyzer::new(
            config.window_samples,
            config.sample_spec.channels,
            calibration,
        )?;
        let bins = analyzer.bin_count();
        let window = Arc::new(Mutex::new(CaptureWindow::new(config.window_samples)));

        let shared = Arc::new(Shared {
            gate: Arc::new(Gate::new()),
            state: Mutex::new(EngineState::Stopped),
            analyzer: Mutex::new(analyzer),
            sink: CaptureSink::new(window),
            scratch: Mutex::new(Vec::with_capacity(config.window_samples)),
            last_output: Mutex::new(vec![0.0; bins]),
            last_error: Mutex::new(None),
            pending: Mutex::new(None),
        });

        Ok(Self {
            backend: Arc::new(backend),
            request: config.connect_request(),
            window_samples: config.window_samples,
            warm_plan: config.warm_plan,
            health_poll: Duration::from_millis(config.health_poll_ms),
            shared,
            worker: Mutex::new(None),
        })
    }

    /// Current lifecycle state
    pub fn state(&self) -> EngineState {
        self.shared.state()
    }

    /// Whether the engine is recording
    pub fn is_active(&self) -> bool {
        self.state() == EngineState::Active
    }

    /// Length of every snapshot
    pub fn bin_count(&self) -> usize {
        self.shared.last_output.lock().len()
    }

    /// Capture window size in samples
    pub fn window_samples(&self) -> usize {
        self.window_samples
    }

    /// Stream format requested from the audio subsystem
    pub fn sample_spec(&self) -> SampleSpec {
        self.request.spec
    }

    /// Capture counters since the last start
    pub fn stats(&self) -> CaptureStats {
        self.shared.sink.stats()
    }

    /// Error that ended the most recent negotiation or connection
    pub fn last_error(&self) -> Option<EngineError> {
        self.shared.last_error.lock().clone()
    }

    /// Whether the transform working buffers are allocated
    pub fn has_transform_buffers(&self) -> bool {
        self.shared.analyzer.lock().has_buffers()
    }

    /// Whether the transform plan has been built
    pub fn has_transform_plan(&self) -> bool {
        self.shared.analyzer.lock().has_plan()
    }

    /// Begin capturing from the first monitor source
    ///
    /// Returns as soon as the event loop is running; use the returned
    /// [`Startup`] to wait for the outcome. Calling `start()` while already
    /// connecting or recording changes nothing.
    ///
    /// # Errors
    /// - [`EngineError::ResourceExhausted`] if transform buffers cannot be
    ///   allocated
    /// - [`EngineError::Thread`] if the event loop cannot be spawned
    /// - [`EngineError::InvalidState`] if a transition is observed mid-flight
    pub fn start(&self) -> Result<Startup, EngineError> {
        match self.shared.state() {
            EngineState::Active => return Ok(Startup::resolved(Ok(()))),
            EngineState::Connecting => {
                if let Some(pending) = self.shared.pending.lock().clone() {
                    return Ok(pending);
                }
            }
            _ => {}
        }

        let pass = self.shared.gate.acquire_owned();
        let state = self.shared.state();
        if state.is_transitional() {
            return Err(EngineError::InvalidState {
                operation: "start",
                state,
            });
        }
        if state == EngineState::Active {
            return Ok(Startup::resolved(Ok(())));
        }

        // A loop that closed itself after losing its connection
        self.reap_worker();

        self.shared.set_state(EngineState::Connecting);
        if let Err(e) = self.shared.analyzer.lock().allocate_buffers() {
            tracing::error!(error = %e, "Failed to allocate transform buffers");
            self.shared.set_state(EngineState::Stopped);
            return Err(e);
        }
        self.shared.sink.reset();
        *self.shared.last_error.lock() = None;

        let startup = Startup::pending();
        *self.shared.pending.lock() = Some(startup.clone());

        let (command_tx, command_rx) = crossbeam_channel::bounded(1);
        let (pass_tx, pass_rx) = crossbeam_channel::bounded::<OwnedGatePass>(1);
        let event_loop = EventLoop {
            backend: Arc::clone(&self.backend),
            request: self.request.clone(),
            shared: Arc::clone(&self.shared),
            commands: command_rx,
            startup: startup.clone(),
            warm_plan: self.warm_plan,
            health_poll: self.health_poll,
        };

        let spawned = thread::Builder::new()
            .name("capture-loop".to_string())
            .spawn(move || {
                // The gate pass arrives only once the spawn has succeeded
                if let Ok(pass) = pass_rx.recv() {
                    event_loop.run(pass);
                }
            });

        let thread = match spawned {
            Ok(thread) => thread,
            Err(e) => {
                let error = EngineError::Thread(e.to_string());
                tracing::error!(error = %error, "Capture start failed");
                self.shared.release_resources();
                self.shared.set_state(EngineState::Stopped);
                self.shared.record_error(&error);
                self.shared.pending.lock().take();
                startup.complete(Err(error.clone()));
                return Err(error);
            }
        };

        *self.worker.lock() = Some(Worker {
            commands: command_tx,
            thread,
        });
        if pass_tx.send(pass).is_err() {
            tracing::error!("Capture event loop exited before setup");
        }

        tracing::info!(
            window = self.window_samples,
            rate = self.request.spec.rate,
            channels = self.request.spec.channels,
            "Capture engine starting"
        );
        Ok(startup)
    }

    /// End capture and free every buffer `start()` allocated
    ///
    /// Blocks behind an in-flight negotiation. Calling `stop()` while stopped
    /// or stopping changes nothing.
    pub fn stop(&self) -> Result<(), EngineError> {
        if matches!(
            self.shared.state(),
            EngineState::Stopped | EngineState::Disconnecting
        ) {
            return Ok(());
        }

        let _pass = self.shared.gate.enter();
        let state = self.shared.state();
        if state.is_transitional() {
            return Err(EngineError::InvalidState {
                operation: "stop",
                state,
            });
        }
        if state == EngineState::Stopped {
            self.reap_worker();
            return Ok(());
        }

        self.shared.set_state(EngineState::Disconnecting);
        self.shared.sink.set_accepting(false);

        if let Some(worker) = self.worker.lock().take() {
            if worker.commands.send(LoopCommand::Shutdown).is_err() {
                tracing::warn!("Capture event loop already gone");
            }
            worker.join();
        }

        self.shared.release_resources();
        self.shared.set_state(EngineState::Stopped);
        tracing::info!("Capture engine stopped");
        Ok(())
    }

    /// Analyze the last frozen window
    ///
    /// While not recording this returns the zeroed output without touching
    /// any capture buffer. The result always has [`Self::bin_count`] values
    /// in `[0, 1]`.
    pub fn snapshot(&self, mode: SnapshotMode) -> Vec<f32> {
        if self.shared.state() != EngineState::Active {
            return self.shared.last_output.lock().clone();
        }

        let _pass = self.shared.gate.enter();
        if self.shared.state() != EngineState::Active {
            return self.shared.last_output.lock().clone();
        }

        let mut scratch = self.shared.scratch.lock();
        self.shared.sink.copy_snapshot(&mut scratch);

        let mut out = vec![0.0; self.bin_count()];
        let mut analyzer = self.shared.analyzer.lock();
        let result = match mode {
            SnapshotMode::Amplitude => analyzer.amplitude(&scratch, &mut out),
            SnapshotMode::Spectrum => analyzer.spectrum(&scratch, &mut out),
        };
        drop(analyzer);

        match result {
            Ok(()) => {
                self.shared.last_output.lock().copy_from_slice(&out);
                out
            }
            Err(e) => {
                tracing::warn!(error = %e, mode = ?mode, "Snapshot analysis failed");
                self.shared.last_output.lock().clone()
            }
        }
    }

    /// Snapshot selected by the "use spectrum" flag polling drivers pass
    pub fn get_snapshot(&self, use_spectrum: bool) -> Vec<f32> {
        self.snapshot(SnapshotMode::from_spectrum_flag(use_spectrum))
    }

    /// Ask the audio subsystem for its capture sources
    ///
    /// Opens a short-lived connection independent of the capture lifecycle.
    pub fn list_sources(&self) -> Result<Vec<SourceInfo>, EngineError> {
        let mut connection = self.backend.connect(&self.request)?;
        let sources = connection.list_sources();
        connection.teardown();
        Ok(sources?)
    }

    fn reap_worker(&self) {
        if let Some(worker) = self.worker.lock().take() {
            worker.join();
        }
    }
}

impl<B: AudioBackend> Drop for CaptureEngine<B> {
    fn drop(&mut self) {
        if let Err(e) = self.stop() {
            tracing::warn!(error = %e, "Failed to stop capture engine on drop");
        }
        let _pass = self.shared.gate.enter();
        self.reap_worker();
    }
}

/// Everything the event loop thread needs, moved in at spawn
struct EventLoop<B: AudioBackend> {
    backend: Arc<B>,
    request: ConnectRequest,
    shared: Arc<Shared>,
    commands: Receiver<LoopCommand>,
    startup: Startup,
    warm_plan: bool,
    health_poll: Duration,
}

/// Why the event loop stopped serving
enum Exit {
    /// `stop()` asked; it holds the gate and finishes the teardown
    Shutdown,
    /// The connection died and the loop took the gate to stop itself
    Lost(OwnedGatePass),
}

impl<B: AudioBackend> EventLoop<B> {
    fn run(self, pass: OwnedGatePass) {
        if self.warm_plan {
            self.shared.analyzer.lock().warm_plan();
        }

        let mut connection = match self.negotiate() {
            Ok(connection) => connection,
            Err(e) => {
                tracing::error!(error = %e, "Capture setup failed");
                self.shared.release_resources();
                self.shared.set_state(EngineState::Stopped);
                self.shared.record_error(&e);
                self.shared.pending.lock().take();
                drop(pass);
                self.startup.complete(Err(e));
                return;
            }
        };

        self.shared.sink.set_accepting(true);
        self.shared.set_state(EngineState::Active);
        self.shared.pending.lock().take();
        drop(pass);
        self.startup.complete(Ok(()));
        tracing::info!("Capture engine active");

        let exit = self.serve(&connection);

        self.shared.sink.set_accepting(false);
        connection.disconnect();
        connection.teardown();
        tracing::debug!("Capture connection closed");

        if let Exit::Lost(pass) = exit {
            self.shared.release_resources();
            self.shared.set_state(EngineState::Stopped);
            drop(pass);
            tracing::warn!("Capture engine stopped after losing its connection");
        }
    }

    /// Connect and start recording from the first monitor source
    fn negotiate(&self) -> Result<B::Connection, EngineError> {
        tracing::info!(
            server = self.request.server.as_deref().unwrap_or("default"),
            client = %self.request.client_name,
            "Connecting to audio server"
        );
        let mut connection = self.backend.connect(&self.request)?;

        if let Err(e) = self.record_from_monitor(&mut connection) {
            connection.disconnect();
            connection.teardown();
            return Err(e);
        }
        Ok(connection)
    }

    fn record_from_monitor(&self, connection: &mut B::Connection) -> Result<(), EngineError> {
        let sources = connection.list_sources()?;
        tracing::debug!(count = sources.len(), "Listed capture sources");

        let source = pick_monitor(&sources).ok_or(BackendError::NoMonitorSource)?;
        tracing::info!(
            source = %source.name,
            sink = source.monitor_of_sink.as_deref().unwrap_or("unknown"),
            "Recording from monitor source"
        );

        let sink = self.shared.sink.clone();
        connection.open_record_stream(
            source,
            Box::new(move |chunk: &[i16]| {
                sink.deliver(chunk);
            }),
        )?;
        Ok(())
    }

    /// Wait for a shutdown command while watching the connection
    fn serve(&self, connection: &B::Connection) -> Exit {
        let mut lost = false;
        loop {
            match self.commands.recv_timeout(self.health_poll) {
                Ok(LoopCommand::Shutdown) | Err(RecvTimeoutError::Disconnected) => {
                    return Exit::Shutdown
                }
                Err(RecvTimeoutError::Timeout) => {}
            }

            if !lost {
                let state = connection.state();
                if state.is_gone() {
                    lost = true;
                    self.shared.sink.set_accepting(false);
                    let error = EngineError::Backend(BackendError::ConnectionLost(format!(
                        "server reported {:?}",
                        state
                    )));
                    tracing::error!(error = %error, "Audio connection lost");
                    self.shared.record_error(&error);
                }
            }

            // If stop() holds the gate it is about to send Shutdown
            if lost {
                if let Some(pass) = self.shared.gate.try_acquire_owned() {
                    self.shared.set_state(EngineState::Disconnecting);
                    return Exit::Lost(pass);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::scripted::ScriptedBackend;
    use crate::audio::types::SampleFormat;

    const WAIT: Duration = Duration::from_secs(5);

    fn mono_engine(backend: ScriptedBackend) -> CaptureEngine<ScriptedBackend> {
        let config = EngineConfig {
            window_samples: 8,
            sample_spec: SampleSpec {
                rate: 8000,
                channels: 1,
                format: SampleFormat::S16le,
            },
            health_poll_ms: 5,
            ..EngineConfig::default()
        };
        CaptureEngine::with_calibration(
            backend,
            config,
            CalibrationTable::uniform(4, 1.0).unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn test_engine_creation() {
        let engine = mono_engine(ScriptedBackend::with_default_monitor());
        assert_eq!(engine.state(), EngineState::Stopped);
        assert_eq!(engine.bin_count(), 4);
        assert_eq!(engine.window_samples(), 8);
        assert!(!engine.has_transform_buffers());
        assert!(engine.last_error().is_none());
    }

    #[test]
    fn test_start_then_stop() {
        let backend = ScriptedBackend::with_default_monitor();
        let engine = mono_engine(backend.clone());

        engine.start().unwrap().wait().unwrap();
        assert_eq!(engine.state(), EngineState::Active);
        assert!(engine.has_transform_buffers());
        assert!(backend.is_recording());

        engine.stop().unwrap();
        assert_eq!(engine.state(), EngineState::Stopped);
        assert!(!engine.has_transform_buffers());
        assert!(!backend.is_recording());
    }

    #[test]
    fn test_startup_resolves_for_repeat_start() {
        let engine = mono_engine(ScriptedBackend::with_default_monitor());
        engine.start().unwrap().wait().unwrap();

        let again = engine.start().unwrap();
        assert!(again.is_complete());
        assert_eq!(again.try_result(), Some(Ok(())));
    }

    #[test]
    fn test_wait_timeout_while_connect_held() {
        let backend = ScriptedBackend::with_default_monitor();
        backend.hold_connect();
        let engine = mono_engine(backend.clone());

        let startup = engine.start().unwrap();
        assert_eq!(startup.wait_timeout(Duration::from_millis(20)), None);
        assert_eq!(engine.state(), EngineState::Connecting);

        backend.release_connect();
        assert_eq!(startup.wait_timeout(WAIT), Some(Ok(())));
    }

    #[test]
    fn test_snapshot_while_stopped_is_zeroed() {
        let engine = mono_engine(ScriptedBackend::with_default_monitor());
        assert_eq!(engine.snapshot(SnapshotMode::Amplitude), vec![0.0; 4]);
        assert_eq!(engine.get_snapshot(true), vec![0.0; 4]);
        assert_eq!(engine.stats(), CaptureStats::default());
    }
}
