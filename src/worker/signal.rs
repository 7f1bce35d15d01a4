//! Stop requests for the worker harness.
//!
//! The handler records which signal arrived in a single atomic; the harness
//! checks it between jobs, so an in-flight job always finishes.

use nix::sys::signal::{self, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicI32, Ordering};

/// Signals that ask the worker to stop accepting jobs
pub const STOP_SIGNALS: [Signal; 3] = [Signal::SIGINT, Signal::SIGTERM, Signal::SIGHUP];

/// Last stop signal received, 0 while none
static STOP_SIGNAL: AtomicI32 = AtomicI32::new(0);

extern "C" fn record_stop(signal: libc::c_int) {
    STOP_SIGNAL.store(signal, Ordering::SeqCst);
}

/// Serializes tests that raise signals against the process-wide flag
#[cfg(test)]
pub(crate) static SIGNAL_TEST_LOCK: std::sync::Mutex<()> = std::sync::Mutex::new(());

#[derive(Debug)]
pub struct SignalHandler;

impl SignalHandler {
    /// Install the stop handlers; call before any thread is spawned
    pub fn init() -> Result<Self, String> {
        let action = SigAction::new(
            SigHandler::Handler(record_stop),
            SaFlags::SA_RESTART,
            SigSet::empty(),
        );
        for sig in STOP_SIGNALS {
            // SAFETY: record_stop only stores to an atomic
            unsafe { signal::sigaction(sig, &action) }
                .map_err(|e| format!("cannot install {} handler: {}", sig, e))?;
        }
        log::debug!("stop handlers installed for SIGINT, SIGTERM, SIGHUP");
        Ok(Self)
    }

    pub fn stop_signal(&self) -> Option<Signal> {
        match STOP_SIGNAL.load(Ordering::SeqCst) {
            0 => None,
            raw => Signal::try_from(raw).ok(),
        }
    }

    pub fn shutdown_requested(&self) -> bool {
        STOP_SIGNAL.load(Ordering::SeqCst) != 0
    }

    pub fn signal_name(&self) -> Option<&'static str> {
        self.stop_signal().map(Signal::as_str)
    }

    /// Forget a recorded stop request
    pub fn reset(&self) {
        STOP_SIGNAL.store(0, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_request_follows_signal() {
        let _guard = SIGNAL_TEST_LOCK.lock().unwrap_or_else(|e| e.into_inner());
        let handler = SignalHandler::init().unwrap();
        handler.reset();
        assert!(!handler.shutdown_requested());
        assert_eq!(handler.signal_name(), None);

        signal::raise(Signal::SIGHUP).unwrap();
        assert!(handler.shutdown_requested());
        assert_eq!(handler.stop_signal(), Some(Signal::SIGHUP));
        assert_eq!(handler.signal_name(), Some("SIGHUP"));

        handler.reset();
        assert!(!handler.shutdown_requested());
    }
}
