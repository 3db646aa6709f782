//! Wall-clock abstraction
//!
//! The scheduler reasons about urgency and event windows in wall-clock
//! seconds. Routing every read through [`Clock`] lets tests drive
//! overdue states and sliding windows deterministically instead of
//! sleeping.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

/// Source of wall-clock seconds
pub trait Clock: Send + Sync {
    /// Current time in seconds since the Unix epoch
    fn now(&self) -> f64;
}

/// System wall clock
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> f64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_secs_f64())
            .unwrap_or(0.0)
    }
}

/// Manually advanced clock for tests and simulation
#[derive(Debug, Default)]
pub struct ManualClock {
    // microsecond resolution keeps the counter atomic
    micros: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at `start` seconds
    pub fn new(start: f64) -> Self {
        Self {
            micros: AtomicU64::new((start * 1e6) as u64),
        }
    }

    /// Create a shared handle starting at `start` seconds
    pub fn shared(start: f64) -> Arc<Self> {
        Arc::new(Self::new(start))
    }

    /// Advance the clock by `secs` seconds
    pub fn advance(&self, secs: f64) {
        self.micros.fetch_add((secs * 1e6) as u64, Ordering::SeqCst);
    }

    /// Set the clock to an absolute time in seconds
    pub fn set(&self, secs: f64) {
        self.micros.store((secs * 1e6) as u64, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> f64 {
        self.micros.load(Ordering::SeqCst) as f64 / 1e6
    }
}
