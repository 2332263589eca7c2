#![forbid(unsafe_code)]

//! Transport tracker (ttrack): status-log compaction and synchronization for
//! a moving vehicle.
//!
//! Each location fix either extends the vehicle's bounded, most-recent-first
//! status history or, when the vehicle is stationary, collapses into the
//! latest entry. The history is mirrored to a remote store keyed by entity id
//! through an ordered, per-entity outbound queue.
//!
//! # Library usage
//!
//! ```rust,no_run
//! use transport_tracker::prelude::*;
//! ```
//!
//! Individual modules can also be imported directly:
//!
//! ```rust,no_run
//! use transport_tracker::core::config::Config;
//! use transport_tracker::tracker::controller::TrackingController;
//! ```

pub mod prelude;

pub mod core;
pub mod daemon;
pub mod logger;
pub mod status;
pub mod sync;
pub mod tracker;
