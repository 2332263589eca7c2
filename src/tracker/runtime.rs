//! Single-writer runtime: one named thread owns the controller and applies
//! control messages in arrival order.
//!
//! ```text
//!   TrackerHandle ──(bounded crossbeam)──▶ tt-tracker thread ──▶ TrackingController
//!   (fix / refresh / stop)                                      └─▶ RemoteSyncClient queues
//! ```
//!
//! The loop ends on a stop request, on quiet-hours suspension, or when every
//! handle has been dropped.

#![allow(missing_docs)]

use std::thread::{self, JoinHandle};

use crossbeam_channel::{Receiver, Sender, bounded};

use crate::core::errors::{Result, TtError};
use crate::status::record::LocationFix;
use crate::tracker::controller::{FixOutcome, StopReason, TrackingController};
use crate::tracker::host::Credentials;

/// Fixes arrive at human-scale intervals; this only absorbs bursts.
const CONTROL_CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub enum ControlMsg {
    Fix(LocationFix),
    RefreshParams,
    Stop(StopReason),
}

/// Why the loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunExit {
    Stopped(StopReason),
    /// Tracking suspended; restart no earlier than `resume_at_ms` if set.
    QuietHours { resume_at_ms: Option<i64> },
    HandlesDropped,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub entity_id: String,
    pub fixes_accepted: u64,
    pub fixes_rejected: u64,
    pub merged: u64,
    pub appended: u64,
    pub evicted: u64,
    /// History length when the loop ended.
    pub history_len: usize,
    pub exit: RunExit,
}

/// Cloneable sender into the runtime loop.
#[derive(Clone)]
pub struct TrackerHandle {
    tx: Sender<ControlMsg>,
}

impl TrackerHandle {
    fn send(&self, msg: ControlMsg) -> Result<()> {
        self.tx.send(msg).map_err(|_| TtError::ChannelClosed {
            component: "tracker runtime",
        })
    }

    /// Deliver a fix. Blocks while the control channel is full.
    pub fn submit_fix(&self, fix: LocationFix) -> Result<()> {
        self.send(ControlMsg::Fix(fix))
    }

    pub fn refresh_params(&self) -> Result<()> {
        self.send(ControlMsg::RefreshParams)
    }

    pub fn stop(&self, reason: StopReason) -> Result<()> {
        self.send(ControlMsg::Stop(reason))
    }
}

pub struct TrackerRuntime {
    handle: TrackerHandle,
    join: JoinHandle<Result<RunSummary>>,
}

impl TrackerRuntime {
    /// Start `controller` for `entity_id` on the `tt-tracker` thread.
    ///
    /// Start-up failures (authentication, keep-alive) surface from
    /// [`TrackerRuntime::join`]; sends after that fail with `TT-3003`.
    pub fn spawn(
        controller: TrackingController,
        entity_id: &str,
        credentials: Credentials,
    ) -> Result<Self> {
        let (tx, rx) = bounded::<ControlMsg>(CONTROL_CHANNEL_CAPACITY);
        let entity_id = entity_id.to_string();
        let join = thread::Builder::new()
            .name("tt-tracker".to_string())
            .spawn(move || run_loop(controller, &rx, &entity_id, &credentials))
            .map_err(|e| TtError::Runtime {
                details: format!("failed to spawn tracker thread: {e}"),
            })?;
        Ok(Self {
            handle: TrackerHandle { tx },
            join,
        })
    }

    #[must_use]
    pub fn handle(&self) -> TrackerHandle {
        self.handle.clone()
    }

    #[must_use]
    pub fn is_finished(&self) -> bool {
        self.join.is_finished()
    }

    /// Wait for the loop to end. Drops this runtime's own handle first, so
    /// the loop also ends once every other handle is gone.
    pub fn join(self) -> Result<RunSummary> {
        let Self { handle, join } = self;
        drop(handle);
        join.join().map_err(|_| TtError::Runtime {
            details: "tracker thread panicked".to_string(),
        })?
    }
}

fn run_loop(
    mut controller: TrackingController,
    rx: &Receiver<ControlMsg>,
    entity_id: &str,
    credentials: &Credentials,
) -> Result<RunSummary> {
    controller.start(entity_id, credentials)?;

    let mut summary = RunSummary {
        entity_id: entity_id.to_string(),
        fixes_accepted: 0,
        fixes_rejected: 0,
        merged: 0,
        appended: 0,
        evicted: 0,
        history_len: 0,
        exit: RunExit::HandlesDropped,
    };

    let exit = loop {
        let Ok(msg) = rx.recv() else {
            summary.history_len = controller.history().map_or(0, |h| h.len());
            controller.stop(StopReason::HostShutdown);
            break RunExit::HandlesDropped;
        };
        match msg {
            ControlMsg::Fix(fix) => match controller.on_location_fix(fix) {
                Ok(FixOutcome::Merged { .. }) => {
                    summary.fixes_accepted += 1;
                    summary.merged += 1;
                }
                Ok(FixOutcome::Appended { evicted, .. }) => {
                    summary.fixes_accepted += 1;
                    summary.appended += 1;
                    summary.evicted += evicted as u64;
                }
                Ok(FixOutcome::QuietHours { job }) => {
                    break RunExit::QuietHours {
                        resume_at_ms: job.map(|j| j.not_before_ms),
                    };
                }
                Err(error) => {
                    summary.fixes_rejected += 1;
                    eprintln!("[TT-RUNTIME] fix rejected for {entity_id}: {error}");
                }
            },
            ControlMsg::RefreshParams => {
                controller.force_refresh_params();
            }
            ControlMsg::Stop(reason) => {
                summary.history_len = controller.history().map_or(0, |h| h.len());
                controller.stop(reason);
                break RunExit::Stopped(reason);
            }
        }
    };
    summary.exit = exit;
    Ok(summary)
}
