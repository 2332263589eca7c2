//! Activity logger thread.
//!
//! A dedicated thread owns the [`JsonlWriter`]. Everything else sends
//! [`ActivityEvent`]s through a bounded crossbeam channel with `try_send`,
//! so fix processing is never blocked by logging back-pressure.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, Sender, TrySendError, bounded};

use crate::core::errors::{Result, TtError};
use crate::logger::jsonl::{EventType, JsonlConfig, JsonlWriter, LogEntry, Severity, WriterState};
use crate::status::record::StatusRecord;

const RECOVER_INTERVAL: Duration = Duration::from_secs(60);

/// Events recorded in the activity log.
#[derive(Debug, Clone)]
pub enum ActivityEvent {
    SessionStarted {
        entity_id: String,
        version: String,
        config_hash: String,
    },
    SessionStopped {
        entity_id: String,
        reason: String,
        uptime_secs: u64,
        fixes_processed: u64,
    },
    SnapshotLoaded {
        entity_id: String,
        records: usize,
        /// Set when the fetch failed and tracking started from empty.
        error: Option<String>,
    },
    StatusMerged {
        entity_id: String,
        record: StatusRecord,
    },
    StatusAppended {
        entity_id: String,
        record: StatusRecord,
        history_len: usize,
        evicted: usize,
    },
    PushFailed {
        entity_id: String,
        operation: &'static str,
        code: String,
        message: String,
    },
    QuietHours {
        entity_id: String,
        hour: u32,
        restart_after_secs: u64,
    },
    ParamsRefreshed {
        details: String,
    },
    AuthFailed {
        entity_id: String,
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
    /// Ask the logger thread to flush and exit.
    Shutdown,
}

/// Cloneable, non-blocking sender for activity events.
#[derive(Clone)]
pub struct ActivityLoggerHandle {
    tx: Sender<ActivityEvent>,
    dropped_events: Arc<AtomicU64>,
}

impl ActivityLoggerHandle {
    /// A handle whose events go nowhere.
    #[must_use]
    pub fn disabled() -> Self {
        let (tx, _rx) = bounded(1);
        Self {
            tx,
            dropped_events: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Queue an event; counts it as dropped if the channel is full.
    pub fn send(&self, event: ActivityEvent) {
        if let Err(TrySendError::Full(_)) = self.tx.try_send(event) {
            self.dropped_events.fetch_add(1, Ordering::Relaxed);
        }
    }

    #[must_use]
    pub fn dropped_events(&self) -> u64 {
        self.dropped_events.load(Ordering::Relaxed)
    }

    /// Request a graceful stop. Blocks only if the channel is full.
    pub fn shutdown(&self) {
        let _ = self.tx.send(ActivityEvent::Shutdown);
    }
}

pub struct ActivityLoggerConfig {
    pub jsonl: JsonlConfig,
    pub channel_capacity: usize,
}

/// Spawn the logger thread.
///
/// The thread exits on [`ActivityLoggerHandle::shutdown`] or once every
/// handle has been dropped.
pub fn spawn_logger(
    config: ActivityLoggerConfig,
) -> Result<(ActivityLoggerHandle, thread::JoinHandle<()>)> {
    let (tx, rx) = bounded::<ActivityEvent>(config.channel_capacity.max(1));
    let dropped = Arc::new(AtomicU64::new(0));
    let handle = ActivityLoggerHandle {
        tx,
        dropped_events: Arc::clone(&dropped),
    };

    let jsonl = config.jsonl;
    let join = thread::Builder::new()
        .name("tt-logger".to_string())
        .spawn(move || logger_thread_main(&rx, jsonl, &dropped))
        .map_err(|e| TtError::Runtime {
            details: format!("failed to spawn logger thread: {e}"),
        })?;

    Ok((handle, join))
}

fn logger_thread_main(rx: &Receiver<ActivityEvent>, config: JsonlConfig, dropped: &AtomicU64) {
    let mut jsonl = JsonlWriter::open(config);
    let mut last_recover = Instant::now();

    while let Ok(event) = rx.recv() {
        let lost = dropped.swap(0, Ordering::Relaxed);
        if lost > 0 {
            let mut warn = LogEntry::new(EventType::Error, Severity::Warning);
            warn.details = Some(format!("{lost} log events dropped due to back-pressure"));
            jsonl.write_entry(&warn);
        }

        if matches!(event, ActivityEvent::Shutdown) {
            break;
        }
        jsonl.write_entry(&to_log_entry(&event));

        if jsonl.state() != WriterState::Primary && last_recover.elapsed() >= RECOVER_INTERVAL {
            jsonl.try_recover();
            last_recover = Instant::now();
        }
    }

    jsonl.flush();
    jsonl.fsync();
}

fn with_record(mut entry: LogEntry, record: &StatusRecord) -> LogEntry {
    entry.lat = Some(record.latitude());
    entry.lng = Some(record.longitude());
    entry.time = Some(record.timestamp());
    entry.power = Some(record.power_level());
    entry
}

fn to_log_entry(event: &ActivityEvent) -> LogEntry {
    match event {
        ActivityEvent::SessionStarted {
            entity_id,
            version,
            config_hash,
        } => {
            let mut e = LogEntry::new(EventType::SessionStart, Severity::Info).for_entity(entity_id);
            e.details = Some(format!("version={version} config_hash={config_hash}"));
            e.ok = Some(true);
            e
        }
        ActivityEvent::SessionStopped {
            entity_id,
            reason,
            uptime_secs,
            fixes_processed,
        } => {
            let mut e = LogEntry::new(EventType::SessionStop, Severity::Info).for_entity(entity_id);
            e.details = Some(format!(
                "reason={reason} uptime={uptime_secs}s fixes={fixes_processed}"
            ));
            e
        }
        ActivityEvent::SnapshotLoaded {
            entity_id,
            records,
            error,
        } => {
            let severity = if error.is_some() {
                Severity::Warning
            } else {
                Severity::Info
            };
            let mut e = LogEntry::new(EventType::SnapshotLoaded, severity).for_entity(entity_id);
            e.history_len = Some(*records);
            e.ok = Some(error.is_none());
            e.error_message.clone_from(error);
            e
        }
        ActivityEvent::StatusMerged { entity_id, record } => with_record(
            LogEntry::new(EventType::StatusMerged, Severity::Info).for_entity(entity_id),
            record,
        ),
        ActivityEvent::StatusAppended {
            entity_id,
            record,
            history_len,
            evicted,
        } => {
            let mut e = with_record(
                LogEntry::new(EventType::StatusAppended, Severity::Info).for_entity(entity_id),
                record,
            );
            e.history_len = Some(*history_len);
            e.evicted = Some(*evicted);
            e
        }
        ActivityEvent::PushFailed {
            entity_id,
            operation,
            code,
            message,
        } => {
            let mut e = LogEntry::new(EventType::PushFailed, Severity::Warning).for_entity(entity_id);
            e.ok = Some(false);
            e.details = Some(format!("operation={operation}"));
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::QuietHours {
            entity_id,
            hour,
            restart_after_secs,
        } => {
            let mut e = LogEntry::new(EventType::QuietHours, Severity::Info).for_entity(entity_id);
            e.details = Some(format!("hour={hour} restart_after={restart_after_secs}s"));
            e
        }
        ActivityEvent::ParamsRefreshed { details } => {
            let mut e = LogEntry::new(EventType::ParamsRefresh, Severity::Info);
            e.details = Some(details.clone());
            e.ok = Some(true);
            e
        }
        ActivityEvent::AuthFailed { entity_id, message } => {
            let mut e = LogEntry::new(EventType::AuthFailure, Severity::Critical).for_entity(entity_id);
            e.ok = Some(false);
            e.error_code = Some("TT-3001".to_string());
            e.error_message = Some(message.clone());
            e
        }
        ActivityEvent::Error { code, message } => {
            let mut e = LogEntry::new(EventType::Error, Severity::Critical);
            e.ok = Some(false);
            e.error_code = Some(code.clone());
            e.error_message = Some(message.clone());
            e
        }
        // Consumed by the thread loop before conversion.
        ActivityEvent::Shutdown => LogEntry::new(EventType::SessionStop, Severity::Info),
    }
}
