//! Tracking controller, its session, host facilities, and the runtime loop.

pub mod clock;
pub mod controller;
pub mod host;
pub mod runtime;
pub mod session;
