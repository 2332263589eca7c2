//! Remote sync: stores, per-entity ordered outbound queues, deferred restarts.

pub mod client;
pub mod outbound;
pub mod remote;
pub mod scheduler;
pub mod sim;
#[cfg(feature = "sqlite")]
pub mod sqlite;
