//! Tracking-status notifications: the UI collaborator's view of a session.
//!
//! Events fan out to configured channels with min-level filtering. Every
//! channel is fire-and-forget; a failing channel never blocks tracking.

#![allow(missing_docs)]

use std::fmt;
use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

// ──────────────────── tracking status ────────────────────

/// Coarse status shown to the user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TrackingStatus {
    Connecting,
    Tracking,
    NotTracking,
}

impl fmt::Display for TrackingStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Connecting => "connecting",
            Self::Tracking => "tracking",
            Self::NotTracking => "not_tracking",
        })
    }
}

// ──────────────────── level ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum NotificationLevel {
    Info,
    Warning,
    Critical,
}

impl fmt::Display for NotificationLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

// ──────────────────── events ────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum NotificationEvent {
    StatusChanged {
        entity_id: String,
        status: TrackingStatus,
    },
    QuietHours {
        entity_id: String,
        /// Epoch millis after which tracking restarts.
        resume_at_ms: i64,
    },
    TrackingStopped {
        entity_id: String,
        reason: String,
    },
    AuthFailed {
        entity_id: String,
        message: String,
    },
    Error {
        code: String,
        message: String,
    },
}

impl NotificationEvent {
    #[must_use]
    pub const fn level(&self) -> NotificationLevel {
        match self {
            Self::StatusChanged {
                status: TrackingStatus::NotTracking,
                ..
            }
            | Self::Error { .. } => NotificationLevel::Warning,
            Self::StatusChanged { .. } | Self::QuietHours { .. } | Self::TrackingStopped { .. } => {
                NotificationLevel::Info
            }
            Self::AuthFailed { .. } => NotificationLevel::Critical,
        }
    }

    #[must_use]
    pub fn summary(&self) -> String {
        match self {
            Self::StatusChanged { entity_id, status } => format!("{entity_id}: {status}"),
            Self::QuietHours {
                entity_id,
                resume_at_ms,
            } => {
                let resume = chrono::DateTime::from_timestamp_millis(*resume_at_ms)
                    .map_or_else(|| resume_at_ms.to_string(), |t| t.to_rfc3339());
                format!("{entity_id}: quiet hours, tracking resumes at {resume}")
            }
            Self::TrackingStopped { entity_id, reason } => {
                format!("{entity_id}: tracking stopped ({reason})")
            }
            Self::AuthFailed { entity_id, message } => {
                format!("{entity_id}: authentication failed: {message}")
            }
            Self::Error { code, message } => format!("[{code}] {message}"),
        }
    }
}

/// The UI collaborator. Consumers must tolerate redundant events.
pub trait Notifier: Send + Sync {
    fn notify(&self, event: &NotificationEvent);
}

// ──────────────────── configuration ────────────────────

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct NotificationConfig {
    pub enabled: bool,
    /// Active channel names: `journal`, `file`.
    pub channels: Vec<String>,
    pub journal_min_level: NotificationLevel,
    pub file_min_level: NotificationLevel,
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            channels: vec!["journal".to_string(), "file".to_string()],
            journal_min_level: NotificationLevel::Info,
            file_min_level: NotificationLevel::Info,
        }
    }
}

// ──────────────────── channels ────────────────────

trait Channel: Send + Sync {
    fn name(&self) -> &'static str;
    fn send(&self, event: &NotificationEvent);
}

#[derive(Debug, Serialize)]
struct NotificationRecord<'a> {
    ts: String,
    level: NotificationLevel,
    summary: String,
    #[serde(flatten)]
    event: &'a NotificationEvent,
}

/// Append-only JSONL, one record per event.
struct FileChannel {
    path: PathBuf,
    min_level: NotificationLevel,
}

impl Channel for FileChannel {
    fn name(&self) -> &'static str {
        "file"
    }

    fn send(&self, event: &NotificationEvent) {
        if event.level() < self.min_level {
            return;
        }
        let record = NotificationRecord {
            ts: chrono::Utc::now().to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
            level: event.level(),
            summary: event.summary(),
            event,
        };
        let Ok(json) = serde_json::to_string(&record) else {
            return;
        };
        if let Some(parent) = self.path.parent() {
            let _ = fs::create_dir_all(parent);
        }

        let file = {
            let mut opts = OpenOptions::new();
            opts.create(true).append(true);
            #[cfg(unix)]
            {
                use std::os::unix::fs::OpenOptionsExt as _;
                opts.mode(0o600);
            }
            opts.open(&self.path)
        };
        if let Ok(mut f) = file {
            let _ = writeln!(f, "{json}");
        }
    }
}

/// stderr lines for the service journal.
struct JournalChannel {
    min_level: NotificationLevel,
}

impl Channel for JournalChannel {
    fn name(&self) -> &'static str {
        "journal"
    }

    fn send(&self, event: &NotificationEvent) {
        let level = event.level();
        if level < self.min_level {
            return;
        }
        let priority = match level {
            NotificationLevel::Critical => "CRIT",
            NotificationLevel::Warning => "WARNING",
            NotificationLevel::Info => "INFO",
        };
        eprintln!("[TT-NOTIFY] [{priority}] {}", event.summary());
    }
}

// ──────────────────── manager ────────────────────

/// Dispatches events to every configured channel.
pub struct NotificationManager {
    channels: Vec<Box<dyn Channel>>,
}

impl NotificationManager {
    #[must_use]
    pub fn from_config(config: &NotificationConfig, file_path: &Path) -> Self {
        if !config.enabled {
            return Self::disabled();
        }
        let mut channels: Vec<Box<dyn Channel>> = Vec::new();
        for name in &config.channels {
            match name.as_str() {
                "journal" => channels.push(Box::new(JournalChannel {
                    min_level: config.journal_min_level,
                })),
                "file" => channels.push(Box::new(FileChannel {
                    path: file_path.to_path_buf(),
                    min_level: config.file_min_level,
                })),
                other => eprintln!("[TT-NOTIFY] ignoring unknown channel {other:?}"),
            }
        }
        Self { channels }
    }

    #[must_use]
    pub fn disabled() -> Self {
        Self {
            channels: Vec::new(),
        }
    }

    #[must_use]
    pub fn channel_names(&self) -> Vec<&'static str> {
        self.channels.iter().map(|c| c.name()).collect()
    }
}

impl Notifier for NotificationManager {
    fn notify(&self, event: &NotificationEvent) {
        for channel in &self.channels {
            channel.send(event);
        }
    }
}

/// Keeps every event in memory, in delivery order.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    events: Mutex<Vec<NotificationEvent>>,
}

impl RecordingNotifier {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn events(&self) -> Vec<NotificationEvent> {
        self.events.lock().clone()
    }

    /// Status values from `StatusChanged` events only.
    #[must_use]
    pub fn statuses(&self) -> Vec<TrackingStatus> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                NotificationEvent::StatusChanged { status, .. } => Some(*status),
                _ => None,
            })
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, event: &NotificationEvent) {
        self.events.lock().push(event.clone());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn changed(status: TrackingStatus) -> NotificationEvent {
        NotificationEvent::StatusChanged {
            entity_id: "bus-7".to_string(),
            status,
        }
    }

    #[test]
    fn status_display_matches_wire_names() {
        assert_eq!(TrackingStatus::Connecting.to_string(), "connecting");
        assert_eq!(TrackingStatus::Tracking.to_string(), "tracking");
        assert_eq!(TrackingStatus::NotTracking.to_string(), "not_tracking");
        assert_eq!(
            serde_json::to_value(TrackingStatus::NotTracking).unwrap(),
            "not_tracking"
        );
    }

    #[test]
    fn event_levels() {
        assert_eq!(changed(TrackingStatus::Tracking).level(), NotificationLevel::Info);
        assert_eq!(
            changed(TrackingStatus::NotTracking).level(),
            NotificationLevel::Warning
        );
        let auth = NotificationEvent::AuthFailed {
            entity_id: "bus-7".to_string(),
            message: "bad password".to_string(),
        };
        assert_eq!(auth.level(), NotificationLevel::Critical);
        assert!(auth.summary().contains("bad password"));
    }

    #[test]
    fn quiet_hours_summary_formats_resume_time() {
        let event = NotificationEvent::QuietHours {
            entity_id: "bus-7".to_string(),
            resume_at_ms: 0,
        };
        assert!(event.summary().contains("1970-01-01T00:00:00"));
    }

    #[test]
    fn disabled_manager_has_no_channels() {
        let config = NotificationConfig {
            enabled: false,
            ..NotificationConfig::default()
        };
        let manager = NotificationManager::from_config(&config, Path::new("/unused"));
        assert!(manager.channel_names().is_empty());
        manager.notify(&changed(TrackingStatus::Tracking));
    }

    #[test]
    fn file_channel_writes_tagged_jsonl() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("notifications.jsonl");
        let config = NotificationConfig {
            channels: vec!["file".to_string(), "pager".to_string()],
            file_min_level: NotificationLevel::Warning,
            ..NotificationConfig::default()
        };
        let manager = NotificationManager::from_config(&config, &path);
        assert_eq!(manager.channel_names(), vec!["file"]);

        manager.notify(&changed(TrackingStatus::Tracking));
        manager.notify(&changed(TrackingStatus::NotTracking));

        let contents = fs::read_to_string(&path).unwrap();
        let lines: Vec<serde_json::Value> = contents
            .lines()
            .map(|l| serde_json::from_str(l).unwrap())
            .collect();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["type"], "status_changed");
        assert_eq!(lines[0]["status"], "not_tracking");
        assert_eq!(lines[0]["level"], "warning");
    }

    #[test]
    fn recording_notifier_keeps_order() {
        let notifier = RecordingNotifier::new();
        notifier.notify(&changed(TrackingStatus::Connecting));
        notifier.notify(&NotificationEvent::Error {
            code: "TT-3004".to_string(),
            message: "offline".to_string(),
        });
        notifier.notify(&changed(TrackingStatus::Tracking));
        assert_eq!(
            notifier.statuses(),
            vec![TrackingStatus::Connecting, TrackingStatus::Tracking]
        );
        assert_eq!(notifier.events().len(), 3);
    }
}
