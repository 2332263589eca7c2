//! Signal handling for the tracker host: SIGTERM/SIGINT stop tracking,
//! SIGHUP forces a runtime parameter refresh.
//!
//! Uses `signal-hook` flag registration. The host polls the flags between
//! fixes instead of blocking on signals.

#![allow(missing_docs)]

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use signal_hook::consts::{SIGINT, SIGTERM};

/// Signal state shared between the OS hooks and the host loop.
#[derive(Clone, Default)]
pub struct SignalHandler {
    stop_flag: Arc<AtomicBool>,
    refresh_flag: Arc<AtomicBool>,
}

impl SignalHandler {
    /// Create a handler and register OS hooks. Registration failures are
    /// reported on stderr and otherwise ignored.
    #[must_use]
    pub fn new() -> Self {
        let handler = Self::unregistered();
        handler.register_signals();
        handler
    }

    /// Flags only; nothing is hooked. Requests come from `request_*`.
    #[must_use]
    pub fn unregistered() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn should_stop(&self) -> bool {
        self.stop_flag.load(Ordering::Relaxed)
    }

    /// Check and clear a pending refresh request.
    #[must_use]
    pub fn should_refresh(&self) -> bool {
        self.refresh_flag.swap(false, Ordering::Relaxed)
    }

    pub fn request_stop(&self) {
        self.stop_flag.store(true, Ordering::Relaxed);
    }

    pub fn request_refresh(&self) {
        self.refresh_flag.store(true, Ordering::Relaxed);
    }

    fn register_signals(&self) {
        for (signal, name) in [(SIGTERM, "SIGTERM"), (SIGINT, "SIGINT")] {
            if let Err(e) = signal_hook::flag::register(signal, Arc::clone(&self.stop_flag)) {
                eprintln!("[TT-SIGNAL] failed to register {name}: {e}");
            }
        }

        #[cfg(unix)]
        {
            use signal_hook::consts::SIGHUP;
            if let Err(e) = signal_hook::flag::register(SIGHUP, Arc::clone(&self.refresh_flag)) {
                eprintln!("[TT-SIGNAL] failed to register SIGHUP: {e}");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_start_clear() {
        let handler = SignalHandler::unregistered();
        assert!(!handler.should_stop());
        assert!(!handler.should_refresh());
    }

    #[test]
    fn stop_is_sticky() {
        let handler = SignalHandler::unregistered();
        handler.request_stop();
        assert!(handler.should_stop());
        assert!(handler.should_stop());
    }

    #[test]
    fn refresh_clears_on_read() {
        let handler = SignalHandler::unregistered();
        handler.request_refresh();
        assert!(handler.should_refresh());
        assert!(!handler.should_refresh());
    }

    #[test]
    fn clones_share_state() {
        let handler = SignalHandler::unregistered();
        let clone = handler.clone();
        clone.request_stop();
        assert!(handler.should_stop());
    }

    #[cfg(unix)]
    #[test]
    fn sighup_sets_refresh_flag() {
        let handler = SignalHandler::new();
        signal_hook::low_level::raise(signal_hook::consts::SIGHUP).unwrap();
        assert!(handler.should_refresh());
    }
}
