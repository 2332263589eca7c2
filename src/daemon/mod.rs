//! Host integration: UI notifications and signal handling.

pub mod notifications;
#[cfg(feature = "daemon")]
pub mod signals;
