//! Per-entity ordered outbound queue.
//!
//! One worker thread drains a bounded FIFO channel and applies each push to
//! the remote store in submission order, so a later push can never land
//! before an earlier one. Submission never blocks: a full queue rejects the
//! push and flags the entity for resync, which upgrades the next push to a
//! full-list replacement. Failed pushes are not retried; they flip the
//! entity's reachability flag and also flag a resync.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};
use parking_lot::{Condvar, Mutex};

use crate::core::errors::{Result, TtError};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::status::record::StatusRecord;
use crate::sync::remote::RemoteStore;

/// One remote write.
#[derive(Debug, Clone, PartialEq)]
pub enum SyncOp {
    PushSingle { index: usize, record: StatusRecord },
    PushAll { history: Vec<StatusRecord> },
}

impl SyncOp {
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::PushSingle { .. } => "push_single",
            Self::PushAll { .. } => "push_all",
        }
    }
}

/// What happened to a submitted op.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Enqueued {
    Queued,
    /// Queue full or closed; the entity is now flagged for resync.
    Rejected,
}

/// Counters for one queue.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct QueueStats {
    pub submitted: u64,
    pub rejected: u64,
    pub succeeded: u64,
    pub failed: u64,
}

#[derive(Default)]
struct Shared {
    reachable: AtomicBool,
    needs_resync: AtomicBool,
    submitted: AtomicU64,
    rejected: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    in_flight: Mutex<usize>,
    drained: Condvar,
}

impl Shared {
    fn finish_one(&self) {
        let mut in_flight = self.in_flight.lock();
        *in_flight = in_flight.saturating_sub(1);
        if *in_flight == 0 {
            self.drained.notify_all();
        }
    }
}

pub struct OutboundQueue {
    entity_id: String,
    tx: Option<Sender<SyncOp>>,
    worker: Option<JoinHandle<()>>,
    shared: Arc<Shared>,
}

impl OutboundQueue {
    /// Start the worker for `entity_id`, writing to `path` on `store`.
    pub fn spawn(
        entity_id: &str,
        path: String,
        store: Arc<dyn RemoteStore>,
        capacity: usize,
        logger: ActivityLoggerHandle,
    ) -> Result<Self> {
        let (tx, rx) = bounded::<SyncOp>(capacity.max(1));
        let shared = Arc::new(Shared {
            reachable: AtomicBool::new(true),
            ..Shared::default()
        });

        let worker_shared = Arc::clone(&shared);
        let worker_entity = entity_id.to_string();
        let worker = thread::Builder::new()
            .name(format!("tt-sync-{entity_id}"))
            .spawn(move || {
                worker_main(
                    &rx,
                    &worker_entity,
                    &path,
                    store.as_ref(),
                    &worker_shared,
                    &logger,
                );
            })
            .map_err(|e| TtError::Runtime {
                details: format!("failed to spawn outbound worker for {entity_id}: {e}"),
            })?;

        Ok(Self {
            entity_id: entity_id.to_string(),
            tx: Some(tx),
            worker: Some(worker),
            shared,
        })
    }

    #[must_use]
    pub fn entity_id(&self) -> &str {
        &self.entity_id
    }

    /// Queue `op` without blocking.
    pub fn submit(&self, op: SyncOp) -> Enqueued {
        let Some(tx) = self.tx.as_ref() else {
            self.reject();
            return Enqueued::Rejected;
        };

        // Count before sending so flush() can't miss an op the worker
        // finishes immediately.
        *self.shared.in_flight.lock() += 1;
        match tx.try_send(op) {
            Ok(()) => {
                self.shared.submitted.fetch_add(1, Ordering::Relaxed);
                Enqueued::Queued
            }
            Err(TrySendError::Full(_) | TrySendError::Disconnected(_)) => {
                self.shared.finish_one();
                self.reject();
                Enqueued::Rejected
            }
        }
    }

    fn reject(&self) {
        self.shared.rejected.fetch_add(1, Ordering::Relaxed);
        self.shared.needs_resync.store(true, Ordering::Release);
        eprintln!(
            "[TT-SYNC] outbound queue for {} rejected a push, next push will resync",
            self.entity_id
        );
    }

    #[must_use]
    pub fn needs_resync(&self) -> bool {
        self.shared.needs_resync.load(Ordering::Acquire)
    }

    /// Clear the resync flag once a full push has been queued.
    pub fn mark_resynced(&self) {
        self.shared.needs_resync.store(false, Ordering::Release);
    }

    /// Outcome of the most recently completed push.
    #[must_use]
    pub fn is_reachable(&self) -> bool {
        self.shared.reachable.load(Ordering::Acquire)
    }

    #[must_use]
    pub fn stats(&self) -> QueueStats {
        QueueStats {
            submitted: self.shared.submitted.load(Ordering::Relaxed),
            rejected: self.shared.rejected.load(Ordering::Relaxed),
            succeeded: self.shared.succeeded.load(Ordering::Relaxed),
            failed: self.shared.failed.load(Ordering::Relaxed),
        }
    }

    /// Wait until every queued op has been applied. False on timeout.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut in_flight = self.shared.in_flight.lock();
        while *in_flight > 0 {
            if self
                .shared
                .drained
                .wait_until(&mut in_flight, deadline)
                .timed_out()
            {
                return *in_flight == 0;
            }
        }
        true
    }

    /// Close the queue, let the worker drain it, and join.
    pub fn shutdown(&mut self) {
        self.tx = None;
        if let Some(worker) = self.worker.take()
            && worker.join().is_err()
        {
            eprintln!("[TT-SYNC] outbound worker for {} panicked", self.entity_id);
        }
    }
}

impl Drop for OutboundQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_main(
    rx: &Receiver<SyncOp>,
    entity_id: &str,
    path: &str,
    store: &dyn RemoteStore,
    shared: &Shared,
    logger: &ActivityLoggerHandle,
) {
    for op in rx {
        let result = match &op {
            SyncOp::PushSingle { index, record } => store.write_index(path, *index, record),
            SyncOp::PushAll { history } => store.replace_all(path, history),
        };
        match result {
            Ok(()) => {
                shared.succeeded.fetch_add(1, Ordering::Relaxed);
                shared.reachable.store(true, Ordering::Release);
            }
            Err(error) => {
                shared.failed.fetch_add(1, Ordering::Relaxed);
                shared.reachable.store(false, Ordering::Release);
                shared.needs_resync.store(true, Ordering::Release);
                eprintln!("[TT-SYNC] {} for {entity_id} failed: {error}", op.name());
                logger.send(ActivityEvent::PushFailed {
                    entity_id: entity_id.to_string(),
                    operation: op.name(),
                    code: error.code().to_string(),
                    message: error.to_string(),
                });
            }
        }
        shared.finish_one();
    }
}
