//! Convenience re-exports for library consumers.
//!
//! ```rust,no_run
//! use transport_tracker::prelude::*;
//! ```

// Core
pub use crate::core::config::Config;
pub use crate::core::errors::{Result, TtError};
pub use crate::core::params::{ParamKey, ParamsProvider, TrackingParams};

// Status
pub use crate::status::record::{LocationFix, StatusRecord};
pub use crate::status::store::StatusStore;

// Sync
pub use crate::sync::client::{PushOutcome, RemoteSyncClient};
pub use crate::sync::remote::{FileRemoteStore, MemoryRemoteStore, RemoteStore};
pub use crate::sync::scheduler::{DeferredJob, DeferredTaskScheduler, FileTaskScheduler};

// Tracker
pub use crate::tracker::controller::{
    ControllerDeps, ControllerState, FixOutcome, StopReason, TrackingController,
};
pub use crate::tracker::host::Credentials;
pub use crate::tracker::runtime::{RunSummary, TrackerHandle, TrackerRuntime};

// Notifications
pub use crate::daemon::notifications::{Notifier, TrackingStatus};
