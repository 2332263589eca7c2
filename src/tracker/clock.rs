//! Wall-clock access for the controller.

#![allow(missing_docs)]

use std::sync::atomic::{AtomicI64, AtomicU32, Ordering};

use chrono::Timelike;

pub trait Clock: Send + Sync {
    /// Epoch milliseconds.
    fn now_millis(&self) -> i64;

    /// Local hour of day, 0-23.
    fn local_hour(&self) -> u32;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_millis(&self) -> i64 {
        chrono::Utc::now().timestamp_millis()
    }

    fn local_hour(&self) -> u32 {
        chrono::Local::now().hour()
    }
}

/// Manually driven clock.
#[derive(Debug)]
pub struct FixedClock {
    millis: AtomicI64,
    hour: AtomicU32,
}

impl FixedClock {
    #[must_use]
    pub const fn new(millis: i64, hour: u32) -> Self {
        Self {
            millis: AtomicI64::new(millis),
            hour: AtomicU32::new(hour),
        }
    }

    pub fn set_millis(&self, millis: i64) {
        self.millis.store(millis, Ordering::Relaxed);
    }

    pub fn advance_millis(&self, delta: i64) {
        self.millis.fetch_add(delta, Ordering::Relaxed);
    }

    pub fn set_hour(&self, hour: u32) {
        self.hour.store(hour % 24, Ordering::Relaxed);
    }
}

impl Clock for FixedClock {
    fn now_millis(&self) -> i64 {
        self.millis.load(Ordering::Relaxed)
    }

    fn local_hour(&self) -> u32 {
        self.hour.load(Ordering::Relaxed)
    }
}
