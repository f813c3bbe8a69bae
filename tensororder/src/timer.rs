//! Wall-clock budgets for the planning and execution phases.
//!
//! The core is single-threaded, so a [`Timer`] is polled cooperatively with
//! [`Timer::check`] rather than interrupting work from a signal handler.

use std::cell::Cell;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};

/// A cooperative deadline for one phase.
#[derive(Debug)]
pub struct Timer {
    phase: String,
    start: Instant,
    deadline: Cell<Option<Instant>>,
}

impl Timer {
    /// Start a timer for `phase`. `None` (or a zero duration) never expires.
    pub fn new(phase: impl Into<String>, timeout: Option<Duration>) -> Self {
        let start = Instant::now();
        Self {
            phase: phase.into(),
            start,
            deadline: Cell::new(timeout.filter(|t| !t.is_zero()).map(|t| start + t)),
        }
    }

    /// A timer that never expires.
    pub fn unbounded(phase: impl Into<String>) -> Self {
        Self::new(phase, None)
    }

    /// Name of the phase this timer governs.
    pub fn phase(&self) -> &str {
        &self.phase
    }

    /// Time since the timer started.
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Time left before expiry, `None` if unbounded.
    pub fn remaining(&self) -> Option<Duration> {
        self.deadline
            .get()
            .map(|d| d.saturating_duration_since(Instant::now()))
    }

    pub fn expired(&self) -> bool {
        matches!(self.deadline.get(), Some(d) if Instant::now() >= d)
    }

    /// Fail with [`Error::Timeout`] once the deadline has passed.
    pub fn check(&self) -> Result<()> {
        if self.expired() {
            Err(Error::timeout(self.phase.clone()))
        } else {
            Ok(())
        }
    }

    /// Move the deadline to `seconds` after the start, if that is sooner.
    ///
    /// Fails immediately when the new deadline has already passed.
    pub fn recap_timeout(&self, seconds: f64) -> Result<()> {
        let new_deadline = self.start + duration_from_secs(seconds);
        match self.deadline.get() {
            Some(current) if current <= new_deadline => {}
            _ => self.deadline.set(Some(new_deadline)),
        }
        if Instant::now() >= new_deadline {
            return Err(Error::timeout(self.phase.clone()));
        }
        Ok(())
    }

    /// Set the deadline to `seconds` after the start, later or sooner.
    pub fn reset_timeout(&self, seconds: f64) -> Result<()> {
        let new_deadline = self.start + duration_from_secs(seconds);
        self.deadline.set(Some(new_deadline));
        self.check()
    }

    /// Drop the deadline entirely.
    pub fn cancel(&self) {
        self.deadline.set(None);
    }
}

// Estimates far beyond any real budget saturate here instead of overflowing `Instant`.
const FAR_FUTURE: Duration = Duration::from_secs(100 * 365 * 24 * 3600);

fn duration_from_secs(seconds: f64) -> Duration {
    if seconds.is_nan() || seconds <= 0.0 {
        Duration::ZERO
    } else {
        Duration::try_from_secs_f64(seconds)
            .unwrap_or(FAR_FUTURE)
            .min(FAR_FUTURE)
    }
}

/// Measures elapsed time, optionally split into named intervals.
#[derive(Debug, Clone)]
pub struct Stopwatch {
    start: Instant,
    interval_start: Instant,
    records: Vec<(String, Duration)>,
}

impl Default for Stopwatch {
    fn default() -> Self {
        Self::new()
    }
}

impl Stopwatch {
    pub fn new() -> Self {
        let now = Instant::now();
        Self {
            start: now,
            interval_start: now,
            records: Vec::new(),
        }
    }

    /// Record the time since the end of the last interval under `name`.
    pub fn record_interval(&mut self, name: impl Into<String>) {
        let now = Instant::now();
        self.records.push((name.into(), now - self.interval_start));
        self.interval_start = now;
    }

    /// Record the time since creation under `name`.
    pub fn record_total(&mut self, name: impl Into<String>) {
        self.records.push((name.into(), self.start.elapsed()));
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn records(&self) -> &[(String, Duration)] {
        &self.records
    }
}
