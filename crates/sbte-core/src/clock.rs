//! Sources of "now"
//!
//! Everything that defaults to the current time reads it from a [`Clock`], so
//! tests can pin the time and hosts can supply their own.

use std::sync::atomic::{AtomicI64, Ordering};

/// Current wall-clock time
pub trait Clock: Send + Sync {
    /// Unix time in milliseconds
    fn now_millis(&self) -> i64;
}

/// The operating system clock
#[derive(Clone, Copy, Debug, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }
}

/// A clock that only moves when told to
#[derive(Debug, Default)]
pub struct FixedClock {
    millis: AtomicI64,
}

impl FixedClock {
    pub fn new(unix_millis: i64) -> Self {
        FixedClock {
            millis: AtomicI64::new(unix_millis),
        }
    }

    pub fn set(&self, unix_millis: i64) {
        self.millis.store(unix_millis, Ordering::SeqCst);
    }

    pub fn advance_millis(&self, millis: i64) {
        self.millis.fetch_add(millis, Ordering::SeqCst);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::SeqCst)
    }
}
