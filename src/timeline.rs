//! Session timeline: the reference instant every sample is measured against.

use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Source of monotonic instants.
pub trait Clock {
    /// Current instant.
    fn now(&self) -> Instant;
}

/// The process monotonic clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    fn now(&self) -> Instant {
        Instant::now()
    }
}

/// A clock that only moves when told to.
///
/// Clones share the same offset, so a test can keep one handle and advance
/// time while the interpreter owns another.
#[derive(Debug, Clone)]
pub struct ManualClock {
    base: Instant,
    offset: Arc<Mutex<Duration>>,
}

impl Default for ManualClock {
    fn default() -> Self {
        Self::new()
    }
}

impl ManualClock {
    /// Creates a clock frozen at the current instant.
    pub fn new() -> Self {
        Self {
            base: Instant::now(),
            offset: Arc::new(Mutex::new(Duration::ZERO)),
        }
    }

    /// Moves the clock forward by `step`.
    pub fn advance(&self, step: Duration) {
        let mut offset = self.offset.lock().unwrap_or_else(|e| e.into_inner());
        *offset += step;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Instant {
        let offset = *self.offset.lock().unwrap_or_else(|e| e.into_inner());
        self.base + offset
    }
}

/// Tracks the start instant of one session.
#[derive(Debug, Clone)]
pub struct Timeline<C: Clock = MonotonicClock> {
    clock: C,
    start: Option<Instant>,
}

impl Default for Timeline<MonotonicClock> {
    fn default() -> Self {
        Self::new(MonotonicClock)
    }
}

impl<C: Clock> Timeline<C> {
    /// Creates an unstarted timeline reading from `clock`.
    pub fn new(clock: C) -> Self {
        Self { clock, start: None }
    }

    /// Records the reference instant.
    ///
    /// Only the first call has an effect; returns whether this call set it.
    pub fn mark_start(&mut self) -> bool {
        if self.start.is_some() {
            return false;
        }
        self.start = Some(self.clock.now());
        true
    }

    /// Time since the reference instant, or `None` before `mark_start`.
    pub fn elapsed(&self) -> Option<Duration> {
        self.start
            .map(|start| self.clock.now().saturating_duration_since(start))
    }
}
