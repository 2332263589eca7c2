//! Remote store wrapper that injects seeded latency and failures.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::Value;

use crate::core::errors::{Result, TtError};
use crate::status::record::StatusRecord;
use crate::sync::remote::RemoteStore;

/// Latency and failure profile for [`SimulatedRemoteStore`].
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SimulationProfile {
    pub seed: u64,
    pub min_latency: Duration,
    pub max_latency: Duration,
    /// Probability in `[0, 1]` that a write fails.
    pub failure_rate: f64,
}

impl Default for SimulationProfile {
    fn default() -> Self {
        Self {
            seed: 0x5eed,
            min_latency: Duration::ZERO,
            max_latency: Duration::from_millis(5),
            failure_rate: 0.0,
        }
    }
}

pub struct SimulatedRemoteStore {
    inner: Arc<dyn RemoteStore>,
    profile: SimulationProfile,
    rng: Mutex<StdRng>,
    offline: AtomicBool,
    injected_failures: AtomicU64,
}

impl SimulatedRemoteStore {
    #[must_use]
    pub fn new(inner: Arc<dyn RemoteStore>, profile: SimulationProfile) -> Self {
        Self {
            inner,
            rng: Mutex::new(StdRng::seed_from_u64(profile.seed)),
            profile,
            offline: AtomicBool::new(false),
            injected_failures: AtomicU64::new(0),
        }
    }

    /// While offline every operation fails without reaching the inner store.
    pub fn set_offline(&self, offline: bool) {
        self.offline.store(offline, Ordering::Relaxed);
    }

    #[must_use]
    pub fn injected_failures(&self) -> u64 {
        self.injected_failures.load(Ordering::Relaxed)
    }

    fn disturb(&self, path: &str, can_fail: bool) -> Result<()> {
        if self.offline.load(Ordering::Relaxed) {
            self.injected_failures.fetch_add(1, Ordering::Relaxed);
            return Err(TtError::remote(path, "simulated network unreachable"));
        }

        let (delay, fail) = {
            let mut rng = self.rng.lock();
            let delay = if self.profile.max_latency > self.profile.min_latency {
                rng.random_range(self.profile.min_latency..=self.profile.max_latency)
            } else {
                self.profile.min_latency
            };
            let rate = if self.profile.failure_rate.is_finite() {
                self.profile.failure_rate.clamp(0.0, 1.0)
            } else {
                0.0
            };
            (delay, can_fail && rng.random_bool(rate))
        };

        if !delay.is_zero() {
            thread::sleep(delay);
        }
        if fail {
            self.injected_failures.fetch_add(1, Ordering::Relaxed);
            return Err(TtError::remote(path, "simulated write failure"));
        }
        Ok(())
    }
}

impl RemoteStore for SimulatedRemoteStore {
    fn write_index(&self, path: &str, index: usize, record: &StatusRecord) -> Result<()> {
        self.disturb(path, true)?;
        self.inner.write_index(path, index, record)
    }

    fn replace_all(&self, path: &str, history: &[StatusRecord]) -> Result<()> {
        self.disturb(path, true)?;
        self.inner.replace_all(path, history)
    }

    fn read_all(&self, path: &str) -> Result<Option<Value>> {
        self.disturb(path, false)?;
        self.inner.read_all(path)
    }

    fn describe(&self) -> String {
        format!(
            "simulated(seed={}, failure_rate={}):{}",
            self.profile.seed,
            self.profile.failure_rate,
            self.inner.describe()
        )
    }
}
