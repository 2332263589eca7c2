//! One tracking run: entity, history, remote address, status, keep-alive.

#![allow(missing_docs)]

use std::time::{Duration, Instant};

use crate::core::errors::Result;
use crate::daemon::notifications::TrackingStatus;
use crate::status::store::StatusStore;
use crate::tracker::host::{KeepAlive, KeepAliveLease};

pub struct TrackingSession {
    entity_id: String,
    remote_path: String,
    history: StatusStore,
    status: TrackingStatus,
    started_at: Instant,
    fixes_processed: u64,
    lease: Option<Box<dyn KeepAliveLease>>,
}

impl TrackingSession {
    /// Open a session, acquiring the keep-alive for its lifetime.
    pub fn open(entity_id: &str, remote_path: String, keep_alive: &dyn KeepAlive) -> Result<Self> {
        let lease = keep_alive.acquire(entity_id)?;
        Ok(Self {
            entity_id: entity_id.to_string(),
            remote_path,
            history: StatusStore::new(),
            status: TrackingStatus::Connecting,
            started_at: Instant::now(),
            fixes_processed: 0,
            lease: Some(lease),
        })
    }

    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    #[must_use]
    pub fn remote_path(&self) -> &str {
        &self.remote_path
    }

    #[must_use]
    pub const fn history(&self) -> &StatusStore {
        &self.history
    }

    pub const fn history_mut(&mut self) -> &mut StatusStore {
        &mut self.history
    }

    #[must_use]
    pub const fn status(&self) -> TrackingStatus {
        self.status
    }

    /// Set the status; true if it changed.
    pub fn set_status(&mut self, status: TrackingStatus) -> bool {
        let changed = self.status != status;
        self.status = status;
        changed
    }

    #[must_use]
    pub const fn fixes_processed(&self) -> u64 {
        self.fixes_processed
    }

    pub const fn record_fix(&mut self) {
        self.fixes_processed += 1;
    }

    #[must_use]
    pub fn uptime(&self) -> Duration {
        self.started_at.elapsed()
    }

    #[must_use]
    pub const fn is_torn_down(&self) -> bool {
        self.lease.is_none()
    }

    /// Release the keep-alive. Only the first call does anything; returns
    /// whether this call released it.
    pub fn teardown(&mut self) -> bool {
        match self.lease.take() {
            Some(lease) => {
                lease.release();
                true
            }
            None => false,
        }
    }
}

impl Drop for TrackingSession {
    fn drop(&mut self) {
        self.teardown();
    }
}
