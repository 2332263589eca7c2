//! Remote sync client: addresses entities, orders their pushes, arms restarts.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

use crate::core::config::RemoteConfig;
use crate::core::errors::{Result, TtError};
use crate::logger::activity::ActivityLoggerHandle;
use crate::status::record::{StatusRecord, decode_snapshot};
use crate::status::store::StatusStore;
use crate::sync::outbound::{Enqueued, OutboundQueue, QueueStats, SyncOp};
use crate::sync::remote::{RemoteStore, validate_entity_id};
use crate::sync::scheduler::{DeferredJob, DeferredTaskScheduler, RESTART_TAG};

/// How a push request was turned into queue work.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushOutcome {
    Single,
    Full,
    /// A single-index push replaced by a full push to repair remote state.
    UpgradedToFull,
    /// Not queued; the next push will carry the full list.
    Rejected,
}

pub struct RemoteSyncClient {
    store: Arc<dyn RemoteStore>,
    scheduler: Arc<dyn DeferredTaskScheduler>,
    base_path: String,
    queue_capacity: usize,
    logger: ActivityLoggerHandle,
    queues: Mutex<HashMap<String, OutboundQueue>>,
}

impl RemoteSyncClient {
    #[must_use]
    pub fn new(
        store: Arc<dyn RemoteStore>,
        scheduler: Arc<dyn DeferredTaskScheduler>,
        config: &RemoteConfig,
        logger: ActivityLoggerHandle,
    ) -> Self {
        Self {
            store,
            scheduler,
            base_path: config.base_path.clone(),
            queue_capacity: config.outbound_queue_capacity,
            logger,
            queues: Mutex::new(HashMap::new()),
        }
    }

    /// Remote path of `entity_id`'s status list.
    pub fn remote_path(&self, entity_id: &str) -> Result<String> {
        validate_entity_id(entity_id)?;
        Ok(format!("{}{entity_id}", self.base_path))
    }

    #[must_use]
    pub fn store(&self) -> &Arc<dyn RemoteStore> {
        &self.store
    }

    /// One-shot read of the entity's stored history. Missing data is an
    /// empty history; only transport failures are errors.
    pub fn fetch_initial_snapshot(&self, entity_id: &str) -> Result<Vec<StatusRecord>> {
        let path = self.remote_path(entity_id)?;
        Ok(self
            .store
            .read_all(&path)?
            .map(|doc| decode_snapshot(&doc))
            .unwrap_or_default())
    }

    /// Queue a write of `history[index]` alone.
    pub fn push_single(
        &self,
        entity_id: &str,
        index: usize,
        history: &StatusStore,
    ) -> Result<PushOutcome> {
        let record = *history.peek(index).ok_or(TtError::IndexOutOfBounds {
            index,
            len: history.len(),
        })?;
        self.with_queue(entity_id, |queue| {
            if queue.needs_resync() {
                return Self::submit_full(queue, history, PushOutcome::UpgradedToFull);
            }
            match queue.submit(SyncOp::PushSingle { index, record }) {
                Enqueued::Queued => PushOutcome::Single,
                Enqueued::Rejected => PushOutcome::Rejected,
            }
        })
    }

    /// Queue a replacement of the whole remote list.
    pub fn push_all(&self, entity_id: &str, history: &StatusStore) -> Result<PushOutcome> {
        self.with_queue(entity_id, |queue| {
            Self::submit_full(queue, history, PushOutcome::Full)
        })
    }

    fn submit_full(queue: &OutboundQueue, history: &StatusStore, ok: PushOutcome) -> PushOutcome {
        match queue.submit(SyncOp::PushAll {
            history: history.to_vec(),
        }) {
            Enqueued::Queued => {
                queue.mark_resynced();
                ok
            }
            Enqueued::Rejected => PushOutcome::Rejected,
        }
    }

    fn with_queue<T>(&self, entity_id: &str, f: impl FnOnce(&OutboundQueue) -> T) -> Result<T> {
        let path = self.remote_path(entity_id)?;
        let mut queues = self.queues.lock();
        if !queues.contains_key(entity_id) {
            let queue = OutboundQueue::spawn(
                entity_id,
                path,
                Arc::clone(&self.store),
                self.queue_capacity,
                self.logger.clone(),
            )?;
            queues.insert(entity_id.to_string(), queue);
        }
        let queue = queues
            .get(entity_id)
            .ok_or_else(|| TtError::Runtime {
                details: format!("outbound queue for {entity_id} vanished"),
            })?;
        Ok(f(queue))
    }

    /// Ask the host to restart tracking for `entity_id` no earlier than
    /// `after` from `now_ms`. Supersedes any pending restart.
    pub fn schedule_deferred_restart(
        &self,
        entity_id: &str,
        now_ms: i64,
        after: Duration,
    ) -> Result<DeferredJob> {
        validate_entity_id(entity_id)?;
        let job = DeferredJob::restart(entity_id, now_ms, after);
        self.scheduler.schedule(job.clone())?;
        Ok(job)
    }

    /// Drop a pending restart for `entity_id`; true if one was armed.
    pub fn cancel_deferred_restart(&self, entity_id: &str) -> Result<bool> {
        validate_entity_id(entity_id)?;
        self.scheduler.clear(RESTART_TAG, entity_id)
    }

    pub fn pending_restart(&self, entity_id: &str) -> Result<Option<DeferredJob>> {
        Ok(self
            .scheduler
            .pending()?
            .into_iter()
            .find(|job| job.tag == RESTART_TAG && job.entity_id == entity_id))
    }

    /// Whether the most recent push for `entity_id` succeeded. True until a
    /// push has been attempted.
    #[must_use]
    pub fn is_reachable(&self, entity_id: &str) -> bool {
        self.queues
            .lock()
            .get(entity_id)
            .is_none_or(OutboundQueue::is_reachable)
    }

    #[must_use]
    pub fn stats(&self, entity_id: &str) -> Option<QueueStats> {
        self.queues.lock().get(entity_id).map(OutboundQueue::stats)
    }

    /// Wait for every queue to drain. False if `timeout` elapsed first.
    pub fn flush(&self, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let queues = self.queues.lock();
        queues
            .values()
            .all(|q| q.flush(deadline.saturating_duration_since(Instant::now())))
    }

    /// Drain and stop the queue for one entity.
    pub fn release(&self, entity_id: &str) {
        let queue = self.queues.lock().remove(entity_id);
        if let Some(mut queue) = queue {
            queue.shutdown();
        }
    }

    /// Drain and stop every queue.
    pub fn shutdown(&self) {
        let drained: Vec<OutboundQueue> = self.queues.lock().drain().map(|(_, q)| q).collect();
        for mut queue in drained {
            queue.shutdown();
        }
    }
}

impl Drop for RemoteSyncClient {
    fn drop(&mut self) {
        self.shutdown();
    }
}
