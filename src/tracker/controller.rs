//! Tracking controller: turns location fixes into status-history mutations
//! and remote pushes.
//!
//! States run `Idle -> Connecting -> LoadingHistory -> Tracking`, leaving
//! `Tracking` either for `QuietHoursSuspended` (a restart is armed) or for
//! `Stopped`. Fixes are processed one at a time by whoever owns the
//! controller; see [`crate::tracker::runtime`] for the single-writer loop.

#![allow(missing_docs)]

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::core::errors::{Result, TtError};
use crate::core::params::{ParamsProvider, RefreshOutcome, TrackingParams};
use crate::daemon::notifications::{NotificationEvent, Notifier, TrackingStatus};
use crate::logger::activity::{ActivityEvent, ActivityLoggerHandle};
use crate::logger::status_log::StatusLog;
use crate::status::geo::distance_m;
use crate::status::record::{LocationFix, StatusRecord};
use crate::status::store::StatusStore;
use crate::sync::client::{PushOutcome, RemoteSyncClient};
use crate::sync::scheduler::DeferredJob;
use crate::tracker::clock::Clock;
use crate::tracker::host::{Authenticator, Credentials, DeviceState, KeepAlive};
use crate::tracker::session::TrackingSession;

// ──────────────────── states ────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ControllerState {
    Idle,
    Connecting,
    LoadingHistory,
    Tracking,
    QuietHoursSuspended,
    Stopped,
}

impl ControllerState {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Connecting => "connecting",
            Self::LoadingHistory => "loading_history",
            Self::Tracking => "tracking",
            Self::QuietHoursSuspended => "quiet_hours_suspended",
            Self::Stopped => "stopped",
        }
    }

    /// Whether `start` may be called from this state.
    #[must_use]
    pub const fn can_start(self) -> bool {
        matches!(self, Self::Idle | Self::QuietHoursSuspended | Self::Stopped)
    }
}

impl fmt::Display for ControllerState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a session ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    User,
    QuietHours,
    AuthFailed,
    HostShutdown,
    Error,
}

impl fmt::Display for StopReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::User => "user",
            Self::QuietHours => "quiet_hours",
            Self::AuthFailed => "auth_failed",
            Self::HostShutdown => "host_shutdown",
            Self::Error => "error",
        })
    }
}

/// What one accepted fix did.
#[derive(Debug, Clone, PartialEq)]
pub enum FixOutcome {
    /// Stationary: history[0] was replaced.
    Merged {
        record: StatusRecord,
        push: Option<PushOutcome>,
    },
    /// Movement: the record was prepended.
    Appended {
        record: StatusRecord,
        evicted: usize,
        push: Option<PushOutcome>,
    },
    /// Quiet hour reached; the session ended and nothing was recorded.
    QuietHours { job: Option<DeferredJob> },
}

impl FixOutcome {
    /// Push issued for this fix, if any was queued or rejected.
    #[must_use]
    pub const fn push(&self) -> Option<PushOutcome> {
        match self {
            Self::Merged { push, .. } | Self::Appended { push, .. } => *push,
            Self::QuietHours { .. } => None,
        }
    }
}

/// True when both of the two most recent records lie strictly within
/// `threshold_m` of `candidate`. Histories shorter than two never merge.
#[must_use]
pub fn is_stationary(history: &StatusStore, candidate: &StatusRecord, threshold_m: f64) -> bool {
    match (history.peek(0), history.peek(1)) {
        (Some(latest), Some(previous)) => [latest, previous]
            .iter()
            .all(|r| distance_m(r.position(), candidate.position()) < threshold_m),
        _ => false,
    }
}

// ──────────────────── controller ────────────────────

/// Everything the controller calls out to.
pub struct ControllerDeps {
    pub params: Arc<ParamsProvider>,
    pub sync: Arc<RemoteSyncClient>,
    pub device: Arc<dyn DeviceState>,
    pub auth: Arc<dyn Authenticator>,
    pub keep_alive: Arc<dyn KeepAlive>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn Notifier>,
    pub logger: ActivityLoggerHandle,
    pub status_log: StatusLog,
    /// Maximum age of cached parameters before a fix triggers a refetch.
    pub params_max_age: Duration,
    /// Identifies the effective configuration in session logs.
    pub config_hash: String,
}

pub struct TrackingController {
    deps: ControllerDeps,
    state: ControllerState,
    session: Option<TrackingSession>,
    entity_id: Option<String>,
    last_stop: Option<StopReason>,
}

impl TrackingController {
    #[must_use]
    pub fn new(deps: ControllerDeps) -> Self {
        Self {
            deps,
            state: ControllerState::Idle,
            session: None,
            entity_id: None,
            last_stop: None,
        }
    }

    #[must_use]
    pub const fn state(&self) -> ControllerState {
        self.state
    }

    #[must_use]
    pub const fn session(&self) -> Option<&TrackingSession> {
        self.session.as_ref()
    }

    #[must_use]
    pub fn history(&self) -> Option<&StatusStore> {
        self.session.as_ref().map(TrackingSession::history)
    }

    #[must_use]
    pub fn status(&self) -> Option<TrackingStatus> {
        self.session.as_ref().map(TrackingSession::status)
    }

    /// Entity of the current or most recent session.
    #[must_use]
    pub fn entity_id(&self) -> Option<&str> {
        self.entity_id.as_deref()
    }

    #[must_use]
    pub const fn last_stop(&self) -> Option<StopReason> {
        self.last_stop
    }

    #[must_use]
    pub const fn deps(&self) -> &ControllerDeps {
        &self.deps
    }

    // ──────────────────── start ────────────────────

    /// Authenticate, hydrate history from the remote snapshot, and begin
    /// tracking `entity_id`.
    ///
    /// Authentication failure stops the controller and is returned. A
    /// failed snapshot fetch is not an error: tracking starts from an empty
    /// history with status `not_tracking`.
    pub fn start(&mut self, entity_id: &str, credentials: &Credentials) -> Result<()> {
        if !self.state.can_start() {
            return Err(TtError::InvalidState {
                expected: "idle, stopped or suspended",
                actual: self.state.as_str(),
            });
        }
        let remote_path = self.deps.sync.remote_path(entity_id)?;
        self.entity_id = Some(entity_id.to_string());
        self.last_stop = None;

        self.state = ControllerState::Connecting;
        self.notify_status(entity_id, TrackingStatus::Connecting);

        if let Err(error) = self.deps.auth.authenticate(entity_id, credentials) {
            eprintln!("[TT-TRACKER] authentication failed for {entity_id}: {error}");
            self.deps.logger.send(ActivityEvent::AuthFailed {
                entity_id: entity_id.to_string(),
                message: error.to_string(),
            });
            self.deps.notifier.notify(&NotificationEvent::AuthFailed {
                entity_id: entity_id.to_string(),
                message: error.to_string(),
            });
            self.state = ControllerState::Stopped;
            self.last_stop = Some(StopReason::AuthFailed);
            return Err(error);
        }

        // A manual start supersedes a quiet-hours restart.
        if let Err(error) = self.deps.sync.cancel_deferred_restart(entity_id) {
            eprintln!("[TT-TRACKER] could not clear pending restart for {entity_id}: {error}");
        }

        let mut session =
            match TrackingSession::open(entity_id, remote_path, self.deps.keep_alive.as_ref()) {
                Ok(session) => session,
                Err(error) => {
                    self.fail_start(&error);
                    return Err(error);
                }
            };
        self.deps.logger.send(ActivityEvent::SessionStarted {
            entity_id: entity_id.to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            config_hash: self.deps.config_hash.clone(),
        });

        self.state = ControllerState::LoadingHistory;
        self.refresh_params();

        let (snapshot, fetch_error) = match self.deps.sync.fetch_initial_snapshot(entity_id) {
            Ok(snapshot) => (snapshot, None),
            Err(error) => {
                eprintln!(
                    "[TT-TRACKER] snapshot fetch for {entity_id} failed, starting empty: {error}"
                );
                (Vec::new(), Some(error.to_string()))
            }
        };
        let records = snapshot.len();
        if let Err(error) = session.history_mut().load(snapshot) {
            self.fail_start(&error);
            return Err(error);
        }
        self.deps.logger.send(ActivityEvent::SnapshotLoaded {
            entity_id: entity_id.to_string(),
            records,
            error: fetch_error.clone(),
        });

        let status = if fetch_error.is_none() && self.deps.device.is_connected() {
            TrackingStatus::Tracking
        } else {
            TrackingStatus::NotTracking
        };
        session.set_status(status);
        self.session = Some(session);
        self.state = ControllerState::Tracking;
        self.notify_status(entity_id, status);
        eprintln!("[TT-TRACKER] tracking {entity_id} with {records} stored statuses");
        Ok(())
    }

    fn fail_start(&mut self, error: &TtError) {
        eprintln!("[TT-TRACKER] start failed: {error}");
        self.deps.logger.send(ActivityEvent::Error {
            code: error.code().to_string(),
            message: error.to_string(),
        });
        self.state = ControllerState::Stopped;
        self.last_stop = Some(StopReason::Error);
    }

    // ──────────────────── fixes ────────────────────

    /// Process one location fix.
    ///
    /// Invalid fixes are rejected without touching history. Push failures
    /// never fail the fix; they only show up in the tracking status.
    pub fn on_location_fix(&mut self, fix: LocationFix) -> Result<FixOutcome> {
        if self.state != ControllerState::Tracking {
            return Err(TtError::InvalidState {
                expected: "tracking",
                actual: self.state.as_str(),
            });
        }
        fix.validate()?;

        self.refresh_params();
        let params = self.deps.params.snapshot();

        let hour = self.deps.clock.local_hour();
        if params.is_quiet_hour(hour) {
            return Ok(self.suspend_for_quiet_hours(hour, &params));
        }

        let deps = &mut self.deps;
        let session = self.session.as_mut().ok_or(TtError::InvalidState {
            expected: "active session",
            actual: "no session",
        })?;
        let entity_id = session.entity_id().to_string();
        let candidate = StatusRecord::from_fix(&fix, deps.device.battery_percent());

        let outcome = if is_stationary(session.history(), &candidate, params.min_distance_changed_m)
        {
            session.history_mut().replace_at(0, candidate)?;
            let push = Self::issue_push(
                deps,
                &entity_id,
                "push_single",
                deps.sync.push_single(&entity_id, 0, session.history()),
            );
            deps.status_log.append(&entity_id, "merged", &candidate);
            deps.logger.send(ActivityEvent::StatusMerged {
                entity_id: entity_id.clone(),
                record: candidate,
            });
            FixOutcome::Merged {
                record: candidate,
                push,
            }
        } else {
            let evicted = session
                .history_mut()
                .prepend_and_evict(candidate, params.max_statuses);
            let push = Self::issue_push(
                deps,
                &entity_id,
                "push_all",
                deps.sync.push_all(&entity_id, session.history()),
            );
            deps.status_log.append(&entity_id, "appended", &candidate);
            deps.logger.send(ActivityEvent::StatusAppended {
                entity_id: entity_id.clone(),
                record: candidate,
                history_len: session.history().len(),
                evicted,
            });
            FixOutcome::Appended {
                record: candidate,
                evicted,
                push,
            }
        };
        session.record_fix();

        let online = deps.device.is_connected()
            && deps.sync.is_reachable(&entity_id)
            && !matches!(outcome.push(), None | Some(PushOutcome::Rejected));
        let status = if online {
            TrackingStatus::Tracking
        } else {
            TrackingStatus::NotTracking
        };
        if session.set_status(status) {
            self.notify_status(&entity_id, status);
        }
        Ok(outcome)
    }

    fn issue_push(
        deps: &ControllerDeps,
        entity_id: &str,
        operation: &'static str,
        result: Result<PushOutcome>,
    ) -> Option<PushOutcome> {
        match result {
            Ok(outcome) => Some(outcome),
            Err(error) => {
                eprintln!("[TT-TRACKER] {operation} for {entity_id} not queued: {error}");
                deps.logger.send(ActivityEvent::PushFailed {
                    entity_id: entity_id.to_string(),
                    operation,
                    code: error.code().to_string(),
                    message: error.to_string(),
                });
                None
            }
        }
    }

    fn suspend_for_quiet_hours(&mut self, hour: u32, params: &TrackingParams) -> FixOutcome {
        let Some(session) = self.session.take() else {
            self.state = ControllerState::QuietHoursSuspended;
            return FixOutcome::QuietHours { job: None };
        };
        let entity_id = session.entity_id().to_string();
        let after = params.quiet_duration();
        let now_ms = self.deps.clock.now_millis();

        let job = match self
            .deps
            .sync
            .schedule_deferred_restart(&entity_id, now_ms, after)
        {
            Ok(job) => Some(job),
            Err(error) => {
                eprintln!("[TT-TRACKER] failed to arm restart for {entity_id}: {error}");
                self.deps.logger.send(ActivityEvent::Error {
                    code: error.code().to_string(),
                    message: error.to_string(),
                });
                None
            }
        };
        self.deps.logger.send(ActivityEvent::QuietHours {
            entity_id: entity_id.clone(),
            hour,
            restart_after_secs: after.as_secs(),
        });
        eprintln!(
            "[TT-TRACKER] quiet hour {hour} reached, suspending {entity_id} for {}s",
            after.as_secs()
        );

        self.finish_session(session, StopReason::QuietHours);
        self.state = ControllerState::QuietHoursSuspended;

        let resume_at_ms = job.as_ref().map_or_else(
            || now_ms.saturating_add(i64::try_from(after.as_millis()).unwrap_or(i64::MAX)),
            |job| job.not_before_ms,
        );
        self.deps.notifier.notify(&NotificationEvent::QuietHours {
            entity_id,
            resume_at_ms,
        });
        FixOutcome::QuietHours { job }
    }

    // ──────────────────── stop ────────────────────

    /// End tracking. Idempotent: returns false when there was no session
    /// to tear down. A user stop also cancels a pending quiet-hours restart.
    pub fn stop(&mut self, reason: StopReason) -> bool {
        if reason == StopReason::User
            && let Some(entity_id) = self.entity_id.as_deref()
            && let Err(error) = self.deps.sync.cancel_deferred_restart(entity_id)
        {
            eprintln!("[TT-TRACKER] could not clear pending restart for {entity_id}: {error}");
        }

        let Some(session) = self.session.take() else {
            if self.state != ControllerState::Stopped {
                self.state = ControllerState::Stopped;
                self.last_stop = Some(reason);
            }
            return false;
        };
        let entity_id = session.entity_id().to_string();
        self.finish_session(session, reason);
        self.state = ControllerState::Stopped;
        self.deps.notifier.notify(&NotificationEvent::TrackingStopped {
            entity_id,
            reason: reason.to_string(),
        });
        true
    }

    fn finish_session(&mut self, mut session: TrackingSession, reason: StopReason) {
        session.teardown();
        // Drain so no push from this session lands after the next one starts.
        self.deps.sync.release(session.entity_id());
        self.deps.logger.send(ActivityEvent::SessionStopped {
            entity_id: session.entity_id().to_string(),
            reason: reason.to_string(),
            uptime_secs: session.uptime().as_secs(),
            fixes_processed: session.fixes_processed(),
        });
        self.last_stop = Some(reason);
    }

    // ──────────────────── parameters ────────────────────

    /// Best-effort refresh honoring the cache age.
    pub fn refresh_params(&self) -> RefreshOutcome {
        let outcome = self.deps.params.refresh(self.deps.params_max_age);
        self.log_refresh(&outcome);
        outcome
    }

    /// Refresh ignoring the cache age.
    pub fn force_refresh_params(&self) -> RefreshOutcome {
        let outcome = self.deps.params.force_refresh();
        self.log_refresh(&outcome);
        outcome
    }

    fn log_refresh(&self, outcome: &RefreshOutcome) {
        let details = match outcome {
            RefreshOutcome::Applied { changed: true } => {
                format!("applied {:?}", self.deps.params.snapshot())
            }
            RefreshOutcome::Failed { details } => {
                format!("failed, keeping last-known-good: {details}")
            }
            _ => return,
        };
        self.deps.logger.send(ActivityEvent::ParamsRefreshed { details });
    }

    fn notify_status(&self, entity_id: &str, status: TrackingStatus) {
        self.deps.notifier.notify(&NotificationEvent::StatusChanged {
            entity_id: entity_id.to_string(),
            status,
        });
    }
}

impl Drop for TrackingController {
    fn drop(&mut self) {
        if self.session.is_some() {
            self.stop(StopReason::HostShutdown);
        }
    }
}
