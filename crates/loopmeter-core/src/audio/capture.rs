//! Fill-and-freeze capture window
//!
//! Incoming chunks are appended to an active buffer until it is full. The
//! full buffer is then copied into the snapshot buffer in one step and the
//! active buffer starts over from zero. Whatever part of the filling chunk
//! did not fit is dropped rather than carried into the next window, so a
//! snapshot is always one contiguous run of samples but consecutive
//! snapshots are not guaranteed to be adjacent.
//!
//! ```
//! use loopmeter_core::audio::capture::CaptureWindow;
//!
//! let mut window = CaptureWindow::new(8);
//! window.append(&[1, 2, 3, 4]);
//! let outcome = window.append(&[5, 6, 7, 8, 9, 10]);
//!
//! assert!(outcome.froze);
//! assert_eq!(outcome.dropped, 2);
//! assert_eq!(window.snapshot(), &[1, 2, 3, 4, 5, 6, 7, 8]);
//! assert_eq!(window.cursor(), 0);
//! ```

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

/// Result of appending one chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct AppendOutcome {
    /// Samples copied into the active buffer
    pub accepted: usize,
    /// Samples discarded because the window filled
    pub dropped: usize,
    /// Whether the window was frozen into the snapshot
    pub froze: bool,
}

/// Fixed-capacity active buffer plus the last frozen snapshot
#[derive(Debug, Clone)]
pub struct CaptureWindow {
    active: Vec<i16>,
    cursor: usize,
    snapshot: Vec<i16>,
    freezes: u64,
    delivered: u64,
    dropped: u64,
}

impl CaptureWindow {
    /// Create a zeroed window holding `capacity` interleaved samples
    pub fn new(capacity: usize) -> Self {
        Self {
            active: vec![0; capacity],
            cursor: 0,
            snapshot: vec![0; capacity],
            freezes: 0,
            delivered: 0,
            dropped: 0,
        }
    }

    /// Window size in samples
    pub fn capacity(&self) -> usize {
        self.active.len()
    }

    /// Fill level of the active buffer
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Last frozen window (zeros until the first freeze)
    pub fn snapshot(&self) -> &[i16] {
        &self.snapshot
    }

    /// Number of freezes since the last reset
    pub fn freeze_count(&self) -> u64 {
        self.freezes
    }

    /// Samples handed to [`Self::append`] since the last reset
    pub fn delivered_samples(&self) -> u64 {
        self.delivered
    }

    /// Samples discarded at freeze boundaries since the last reset
    pub fn dropped_samples(&self) -> u64 {
        self.dropped
    }

    /// Append a chunk, freezing the window when it becomes full
    pub fn append(&mut self, chunk: &[i16]) -> AppendOutcome {
        let capacity = self.capacity();
        let incoming = chunk.len();
        self.delivered += incoming as u64;

        if capacity == 0 {
            self.dropped += incoming as u64;
            return AppendOutcome {
                accepted: 0,
                dropped: incoming,
                froze: false,
            };
        }

        let overflow = (self.cursor + incoming).saturating_sub(capacity);
        let accepted = incoming - overflow;

        self.active[self.cursor..self.cursor + accepted].copy_from_slice(&chunk[..accepted]);
        self.cursor += accepted;

        let froze = self.cursor == capacity;
        if froze {
            self.snapshot.copy_from_slice(&self.active);
            self.cursor = 0;
            self.freezes += 1;
        }
        self.dropped += overflow as u64;

        AppendOutcome {
            accepted,
            dropped: overflow,
            froze,
        }
    }

    /// Zero both buffers and all counters
    pub fn reset(&mut self) {
        self.active.fill(0);
        self.snapshot.fill(0);
        self.cursor = 0;
        self.freezes = 0;
        self.delivered = 0;
        self.dropped = 0;
    }
}

/// Counters exposed by the engine
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CaptureStats {
    /// Chunks received from the audio subsystem while accepting
    pub chunks: u64,
    /// Samples received while accepting
    pub delivered_samples: u64,
    /// Samples dropped at freeze boundaries
    pub dropped_samples: u64,
    /// Completed windows
    pub freezes: u64,
    /// Current fill level of the active buffer
    pub cursor: usize,
}

/// Delivery target handed to the audio subsystem's data callback
///
/// Appends run under the window lock, the same lock the snapshot reader
/// takes to copy the frozen window, so a reader never sees a half-written
/// freeze. Deliveries are ignored unless the engine has enabled acceptance.
#[derive(Debug, Clone)]
pub struct CaptureSink {
    window: Arc<Mutex<CaptureWindow>>,
    accepting: Arc<AtomicBool>,
    chunks: Arc<AtomicU64>,
}

impl CaptureSink {
    /// Wrap a shared window; acceptance starts disabled
    pub fn new(window: Arc<Mutex<CaptureWindow>>) -> Self {
        Self {
            window,
            accepting: Arc::new(AtomicBool::new(false)),
            chunks: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Start or stop accepting deliveries
    pub fn set_accepting(&self, accepting: bool) {
        self.accepting.store(accepting, Ordering::Release);
    }

    /// Whether deliveries are currently appended
    pub fn is_accepting(&self) -> bool {
        self.accepting.load(Ordering::Acquire)
    }

    /// Append a chunk from the audio subsystem
    ///
    /// Returns `None` when acceptance is disabled.
    pub fn deliver(&self, chunk: &[i16]) -> Option<AppendOutcome> {
        if !self.is_accepting() {
            return None;
        }

        let outcome = self.window.lock().append(chunk);
        let prev = self.chunks.fetch_add(1, Ordering::Relaxed);
        if prev == 0 {
            tracing::info!(samples = chunk.len(), "First capture chunk received");
        }
        tracing::trace!(
            accepted = outcome.accepted,
            dropped = outcome.dropped,
            froze = outcome.froze,
            "Capture chunk appended"
        );
        Some(outcome)
    }

    /// Copy the frozen window into `out`
    pub fn copy_snapshot(&self, out: &mut Vec<i16>) {
        let window = self.window.lock();
        out.clear();
        out.extend_from_slice(window.snapshot());
    }

    /// Zero the window and the chunk counter
    pub fn reset(&self) {
        self.window.lock().reset();
        self.chunks.store(0, Ordering::Relaxed);
    }

    /// Current counters
    pub fn stats(&self) -> CaptureStats {
        let window = self.window.lock();
        CaptureStats {
            chunks: self.chunks.load(Ordering::Relaxed),
            delivered_samples: window.delivered_samples(),
            dropped_samples: window.dropped_samples(),
            freezes: window.freeze_count(),
            cursor: window.cursor(),
        }
    }
}
