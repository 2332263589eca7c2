//! Deferred one-off jobs, used to restart tracking after quiet hours.
//!
//! A job is keyed by `(tag, entity_id)`. Scheduling the same key again
//! replaces the pending job, so only the latest request survives. A job is
//! due from `not_before_ms` on; the host should run it at least once, no
//! earlier than that, whatever the network state.

#![allow(missing_docs)]

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::core::errors::{Result, TtError};
use crate::sync::remote::validate_entity_id;

/// Tag of the quiet-hours restart job.
pub const RESTART_TAG: &str = "tracker-restart";

/// Slack after `not_before_ms` within which the job should run.
pub const EXECUTION_WINDOW: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DeferredJob {
    pub tag: String,
    pub entity_id: String,
    pub scheduled_at_ms: i64,
    pub not_before_ms: i64,
    pub window_end_ms: i64,
}

impl DeferredJob {
    /// Restart job for `entity_id`, due `after` from `now_ms`.
    #[must_use]
    pub fn restart(entity_id: &str, now_ms: i64, after: Duration) -> Self {
        let after_ms = i64::try_from(after.as_millis()).unwrap_or(i64::MAX);
        let window_ms = i64::try_from(EXECUTION_WINDOW.as_millis()).unwrap_or(i64::MAX);
        let not_before_ms = now_ms.saturating_add(after_ms);
        Self {
            tag: RESTART_TAG.to_string(),
            entity_id: entity_id.to_string(),
            scheduled_at_ms: now_ms,
            not_before_ms,
            window_end_ms: not_before_ms.saturating_add(window_ms),
        }
    }

    #[must_use]
    pub const fn is_due(&self, now_ms: i64) -> bool {
        now_ms >= self.not_before_ms
    }

    /// Milliseconds until due; zero once due.
    #[must_use]
    pub fn remaining(&self, now_ms: i64) -> Duration {
        let ms = self.not_before_ms.saturating_sub(now_ms).max(0);
        Duration::from_millis(u64::try_from(ms).unwrap_or(0))
    }
}

pub trait DeferredTaskScheduler: Send + Sync {
    /// Arm `job`, superseding any pending job with the same key.
    fn schedule(&self, job: DeferredJob) -> Result<()>;

    /// All pending jobs, soonest first.
    fn pending(&self) -> Result<Vec<DeferredJob>>;

    /// Remove and return the jobs due at `now_ms`.
    fn take_due(&self, now_ms: i64) -> Result<Vec<DeferredJob>>;

    /// Cancel the job for `(tag, entity_id)`; true if one was pending.
    fn clear(&self, tag: &str, entity_id: &str) -> Result<bool>;
}

// ──────────────────── memory ────────────────────

#[derive(Debug, Default)]
pub struct MemoryTaskScheduler {
    jobs: Mutex<HashMap<(String, String), DeferredJob>>,
}

impl MemoryTaskScheduler {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn sorted(mut jobs: Vec<DeferredJob>) -> Vec<DeferredJob> {
    jobs.sort_by(|a, b| {
        a.not_before_ms
            .cmp(&b.not_before_ms)
            .then_with(|| a.entity_id.cmp(&b.entity_id))
    });
    jobs
}

impl DeferredTaskScheduler for MemoryTaskScheduler {
    fn schedule(&self, job: DeferredJob) -> Result<()> {
        self.jobs
            .lock()
            .insert((job.tag.clone(), job.entity_id.clone()), job);
        Ok(())
    }

    fn pending(&self) -> Result<Vec<DeferredJob>> {
        Ok(sorted(self.jobs.lock().values().cloned().collect()))
    }

    fn take_due(&self, now_ms: i64) -> Result<Vec<DeferredJob>> {
        let mut jobs = self.jobs.lock();
        let due_keys: Vec<(String, String)> = jobs
            .iter()
            .filter(|(_, job)| job.is_due(now_ms))
            .map(|(key, _)| key.clone())
            .collect();
        let due = due_keys
            .into_iter()
            .filter_map(|key| jobs.remove(&key))
            .collect();
        Ok(sorted(due))
    }

    fn clear(&self, tag: &str, entity_id: &str) -> Result<bool> {
        Ok(self
            .jobs
            .lock()
            .remove(&(tag.to_string(), entity_id.to_string()))
            .is_some())
    }
}

// ──────────────────── file ────────────────────

/// One JSON file per job under `dir`, written via tmp + rename.
#[derive(Debug, Clone)]
pub struct FileTaskScheduler {
    dir: PathBuf,
}

impl FileTaskScheduler {
    #[must_use]
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn job_path(&self, tag: &str, entity_id: &str) -> Result<PathBuf> {
        validate_entity_id(tag)?;
        validate_entity_id(entity_id)?;
        Ok(self.dir.join(format!("{tag}--{entity_id}.json")))
    }

    fn load_all(&self) -> Result<Vec<(PathBuf, DeferredJob)>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }
        let entries = fs::read_dir(&self.dir).map_err(|source| TtError::io(&self.dir, source))?;
        let mut jobs = Vec::new();
        for entry in entries {
            let path = entry.map_err(|source| TtError::io(&self.dir, source))?.path();
            if path.extension().is_none_or(|ext| ext != "json") {
                continue;
            }
            let raw = fs::read_to_string(&path).map_err(|source| TtError::io(&path, source))?;
            match serde_json::from_str::<DeferredJob>(&raw) {
                Ok(job) => jobs.push((path, job)),
                Err(error) => {
                    eprintln!(
                        "[TT-SCHED] ignoring unreadable job {}: {error}",
                        path.display()
                    );
                }
            }
        }
        Ok(jobs)
    }
}

impl DeferredTaskScheduler for FileTaskScheduler {
    fn schedule(&self, job: DeferredJob) -> Result<()> {
        let path = self.job_path(&job.tag, &job.entity_id)?;
        fs::create_dir_all(&self.dir).map_err(|source| TtError::io(&self.dir, source))?;
        let tmp = path.with_extension("json.tmp");
        let data = serde_json::to_vec_pretty(&job)?;
        fs::write(&tmp, data).map_err(|source| TtError::io(&tmp, source))?;
        fs::rename(&tmp, &path).map_err(|source| TtError::io(&path, source))?;
        Ok(())
    }

    fn pending(&self) -> Result<Vec<DeferredJob>> {
        Ok(sorted(
            self.load_all()?.into_iter().map(|(_, job)| job).collect(),
        ))
    }

    fn take_due(&self, now_ms: i64) -> Result<Vec<DeferredJob>> {
        let mut due = Vec::new();
        for (path, job) in self.load_all()? {
            if job.is_due(now_ms) {
                fs::remove_file(&path).map_err(|source| TtError::io(&path, source))?;
                due.push(job);
            }
        }
        Ok(sorted(due))
    }

    fn clear(&self, tag: &str, entity_id: &str) -> Result<bool> {
        let path = self.job_path(tag, entity_id)?;
        match fs::remove_file(&path) {
            Ok(()) => Ok(true),
            Err(error) if error.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(source) => Err(TtError::io(&path, source)),
        }
    }
}
