//! Rolling peak hold over a stream of snapshots
//!
//! Light drivers poll snapshots much faster than the eye can follow. Holding
//! each bin's maximum over a short window keeps brief peaks visible for a few
//! frames without making the output sluggish.

use std::collections::VecDeque;
use std::time::{Duration, Instant};

/// Default interval between history rolls
pub const DEFAULT_ROLL_INTERVAL: Duration = Duration::from_millis(10);

/// Default span of history kept
pub const DEFAULT_HOLD_WINDOW: Duration = Duration::from_millis(50);

/// Element-wise maximum of recent snapshots
#[derive(Debug, Clone)]
pub struct PeakHold {
    interval: Duration,
    depth: usize,
    buffered: Vec<f32>,
    history: VecDeque<Vec<f32>>,
    last_roll: Option<Instant>,
}

impl PeakHold {
    /// Hold `len` values with the default 10 ms / 50 ms timing
    pub fn new(len: usize) -> Self {
        Self::with_timing(len, DEFAULT_ROLL_INTERVAL, DEFAULT_HOLD_WINDOW)
    }

    /// Hold `len` values, rolling every `interval` and keeping `window` of history
    pub fn with_timing(len: usize, interval: Duration, window: Duration) -> Self {
        let interval = interval.max(Duration::from_micros(1));
        let depth = (window.as_nanos() / interval.as_nanos()).max(1) as usize;
        Self {
            interval,
            depth,
            buffered: vec![0.0; len],
            history: VecDeque::with_capacity(depth),
            last_roll: None,
        }
    }

    /// Number of values per snapshot
    pub fn len(&self) -> usize {
        self.buffered.len()
    }

    /// Whether the hold tracks zero values
    pub fn is_empty(&self) -> bool {
        self.buffered.is_empty()
    }

    /// Rolled vectors kept at most
    pub fn depth(&self) -> usize {
        self.depth
    }

    /// Rolled vectors currently kept
    pub fn history_len(&self) -> usize {
        self.history.len()
    }

    /// Fold a snapshot in using the current time
    pub fn push(&mut self, values: &[f32]) {
        self.push_at(values, Instant::now());
    }

    /// Fold a snapshot in as of `now`
    pub fn push_at(&mut self, values: &[f32], now: Instant) {
        for (held, &value) in self.buffered.iter_mut().zip(values) {
            *held = held.max(value);
        }

        let last = *self.last_roll.get_or_insert(now);
        if now.saturating_duration_since(last) >= self.interval {
            if self.history.len() == self.depth {
                self.history.pop_front();
            }
            let fresh = vec![0.0; self.buffered.len()];
            let rolled = std::mem::replace(&mut self.buffered, fresh);
            self.history.push_back(rolled);
            self.last_roll = Some(now);
        }
    }

    /// Element-wise maximum of the accumulator and the history
    pub fn current(&self) -> Vec<f32> {
        let mut out = self.buffered.clone();
        for rolled in &self.history {
            for (value, &held) in out.iter_mut().zip(rolled) {
                *value = value.max(held);
            }
        }
        out
    }

    /// Forget everything held
    pub fn clear(&mut self) {
        self.buffered.fill(0.0);
        self.history.clear();
        self.last_roll = None;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MS: Duration = Duration::from_millis(1);

    #[test]
    fn test_holds_maximum_between_rolls() {
        let mut hold = PeakHold::new(3);
        let t0 = Instant::now();
        hold.push_at(&[0.2, 0.9, 0.1], t0);
        hold.push_at(&[0.5, 0.1, 0.0], t0 + MS);

        assert_eq!(hold.current(), vec![0.5, 0.9, 0.1]);
        assert_eq!(hold.history_len(), 0);
    }

    #[test]
    fn test_peak_expires_after_window() {
        let mut hold = PeakHold::new(1);
        assert_eq!(hold.depth(), 5);
        let t0 = Instant::now();

        hold.push_at(&[1.0], t0);
        // Rolls at 10, 20, ... ms push the peak through the history
        for step in 1..=5 {
            hold.push_at(&[0.1], t0 + MS * (10 * step));
            assert_eq!(hold.current(), vec![1.0], "step {}", step);
        }
        hold.push_at(&[0.1], t0 + MS * 60);
        assert_eq!(hold.history_len(), 5);
        assert_eq!(hold.current(), vec![0.1]);
    }

    #[test]
    fn test_clear() {
        let mut hold = PeakHold::new(2);
        let t0 = Instant::now();
        hold.push_at(&[0.7, 0.7], t0);
        hold.push_at(&[0.7, 0.7], t0 + MS * 20);
        hold.clear();

        assert_eq!(hold.current(), vec![0.0, 0.0]);
        assert_eq!(hold.history_len(), 0);
    }
}
