//! Binary gate serializing start, stop, and snapshot reads
//!
//! Unlike a mutex guard, an [`OwnedGatePass`] can be moved to another thread
//! and released there. `start()` takes the gate on the caller's thread and
//! hands it to the event loop, which releases it once negotiation with the
//! audio subsystem has finished one way or the other.

use parking_lot::{Condvar, Mutex};
use std::sync::Arc;

/// Binary semaphore; acquire blocks until the holder releases, no timeout
#[derive(Debug, Default)]
pub struct Gate {
    held: Mutex<bool>,
    released: Condvar,
}

impl Gate {
    /// Create an open gate
    pub fn new() -> Self {
        Self::default()
    }

    fn acquire(&self) {
        let mut held = self.held.lock();
        while *held {
            self.released.wait(&mut held);
        }
        *held = true;
    }

    fn try_acquire(&self) -> bool {
        let mut held = self.held.lock();
        if *held {
            return false;
        }
        *held = true;
        true
    }

    fn release(&self) {
        let mut held = self.held.lock();
        debug_assert!(*held, "gate released while open");
        *held = false;
        drop(held);
        self.released.notify_one();
    }

    /// Whether someone currently holds the gate
    pub fn is_held(&self) -> bool {
        *self.held.lock()
    }

    /// Block until the gate is free and hold it for the returned scope
    pub fn enter(&self) -> GatePass<'_> {
        self.acquire();
        GatePass { gate: self }
    }

    /// Block until the gate is free and hold it with a movable pass
    pub fn acquire_owned(self: &Arc<Self>) -> OwnedGatePass {
        self.acquire();
        OwnedGatePass {
            gate: Arc::clone(self),
        }
    }

    /// Take the gate only if nobody holds it
    pub fn try_acquire_owned(self: &Arc<Self>) -> Option<OwnedGatePass> {
        self.try_acquire().then(|| OwnedGatePass {
            gate: Arc::clone(self),
        })
    }
}

/// Scoped hold on a [`Gate`], released on drop
#[derive(Debug)]
pub struct GatePass<'a> {
    gate: &'a Gate,
}

impl Drop for GatePass<'_> {
    fn drop(&mut self) {
        self.gate.release();
    }
}

/// Hold on a [`Gate`] that may cross threads, released on drop
#[derive(Debug)]
pub struct OwnedGatePass {
    gate: Arc<Gate>,
}

impl Drop for OwnedGatePass {
    fn drop(&mut self) {
        self.gate.release();
    }
}
