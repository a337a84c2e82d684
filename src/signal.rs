//! Shutdown Signals
//!
//! Signal plumbing for the runtime's signal-aware entry point: SIGTERM and
//! SIGINT set a process-wide shutdown flag and wake anything blocked in
//! [`SignalHandler::wait_for_shutdown`]. The OS handler itself only stores
//! atomics; everything else happens on ordinary threads.
//!
//! Shutdown can also be requested programmatically, which is what the
//! tests and non-Unix builds use.

use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Condvar, Mutex, OnceLock};
use std::time::Duration;

/// Signals the runtime reacts to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Signal {
    /// No signal received.
    None = 0,
    /// SIGTERM: termination request.
    Term = 1,
    /// SIGINT: Ctrl+C.
    Int = 2,
}

impl Signal {
    fn from_u8(val: u8) -> Self {
        match val {
            1 => Signal::Term,
            2 => Signal::Int,
            _ => Signal::None,
        }
    }

    /// Whether this signal requests shutdown.
    pub fn is_shutdown(&self) -> bool {
        matches!(self, Signal::Term | Signal::Int)
    }
}

static SHUTDOWN_REQUESTED: AtomicBool = AtomicBool::new(false);
static LAST_SIGNAL: AtomicU8 = AtomicU8::new(0);

fn shutdown_notify() -> &'static (Mutex<bool>, Condvar) {
    static NOTIFY: OnceLock<(Mutex<bool>, Condvar)> = OnceLock::new();
    NOTIFY.get_or_init(|| (Mutex::new(false), Condvar::new()))
}

/// Installer and observer for the process-wide shutdown state.
#[derive(Debug, Clone, Default)]
pub struct SignalHandler {
    _private: (),
}

impl SignalHandler {
    /// A handle to the process-wide shutdown state.
    pub fn new() -> Self {
        Self::default()
    }

    /// Install OS handlers for SIGTERM and SIGINT. Idempotent.
    ///
    /// On non-Unix platforms this is a no-op; shutdown can still be
    /// requested programmatically.
    pub fn install(&self) -> bool {
        static INSTALLED: AtomicBool = AtomicBool::new(false);
        if INSTALLED.swap(true, Ordering::SeqCst) {
            return false;
        }
        #[cfg(unix)]
        install_unix_handlers();
        true
    }

    /// Whether a shutdown signal has been received or requested.
    pub fn shutdown_requested(&self) -> bool {
        SHUTDOWN_REQUESTED.load(Ordering::SeqCst)
    }

    /// The most recently received signal.
    pub fn last_signal(&self) -> Signal {
        Signal::from_u8(LAST_SIGNAL.load(Ordering::SeqCst))
    }

    /// Block until shutdown is requested. With `Some(timeout)`, gives up
    /// after that long; returns whether shutdown was requested.
    pub fn wait_for_shutdown(&self, timeout: Option<Duration>) -> bool {
        let (lock, cvar) = shutdown_notify();
        let guard = match lock.lock() {
            Ok(guard) => guard,
            Err(_) => return self.shutdown_requested(),
        };
        match timeout {
            Some(timeout) => cvar
                .wait_timeout_while(guard, timeout, |shutdown| !*shutdown)
                .map(|(guard, result)| *guard && !result.timed_out())
                .unwrap_or(false),
            None => cvar
                .wait_while(guard, |shutdown| !*shutdown)
                .map(|guard| *guard)
                .unwrap_or(false),
        }
    }

    /// Trigger shutdown from code, as if SIGTERM had arrived.
    pub fn request_shutdown(&self) {
        handle_signal(Signal::Term);
    }

    /// Clear the shutdown state. For tests.
    pub fn reset(&self) {
        SHUTDOWN_REQUESTED.store(false, Ordering::SeqCst);
        LAST_SIGNAL.store(0, Ordering::SeqCst);
        let (lock, _) = shutdown_notify();
        if let Ok(mut guard) = lock.lock() {
            *guard = false;
        }
    }
}

fn handle_signal(signal: Signal) {
    LAST_SIGNAL.store(signal as u8, Ordering::SeqCst);
    if signal.is_shutdown() {
        SHUTDOWN_REQUESTED.store(true, Ordering::SeqCst);
        let (lock, cvar) = shutdown_notify();
        if let Ok(mut guard) = lock.lock() {
            *guard = true;
            cvar.notify_all();
        }
    }
}

#[cfg(unix)]
fn install_unix_handlers() {
    use nix::sys::signal::{self, SigHandler, Signal as NixSignal};

    // the handler only touches atomics, so signal::signal is sufficient
    unsafe {
        let _ = signal::signal(NixSignal::SIGTERM, SigHandler::Handler(os_signal_handler));
        let _ = signal::signal(NixSignal::SIGINT, SigHandler::Handler(os_signal_handler));
    }
}

#[cfg(unix)]
extern "C" fn os_signal_handler(sig: i32) {
    let signal = match sig {
        15 => Signal::Term,
        2 => Signal::Int,
        _ => Signal::None,
    };
    handle_signal(signal);
}

/// The global handler used by the runtime entry points.
pub fn global_handler() -> &'static SignalHandler {
    static GLOBAL: OnceLock<SignalHandler> = OnceLock::new();
    GLOBAL.get_or_init(SignalHandler::new)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_shutdown() {
        assert!(Signal::Term.is_shutdown());
        assert!(Signal::Int.is_shutdown());
        assert!(!Signal::None.is_shutdown());
    }

    #[test]
    fn test_request_and_reset() {
        let handler = SignalHandler::new();
        handler.reset();
        assert!(!handler.shutdown_requested());

        handler.request_shutdown();
        assert!(handler.shutdown_requested());
        assert!(handler.last_signal().is_shutdown());

        handler.reset();
        assert!(!handler.shutdown_requested());
    }

    #[test]
    fn test_wait_times_out_without_request() {
        let handler = SignalHandler::new();
        handler.reset();
        assert!(!handler.wait_for_shutdown(Some(Duration::from_millis(10))));
    }

    #[test]
    fn test_wait_returns_when_already_requested() {
        let handler = SignalHandler::new();
        handler.reset();
        handler.request_shutdown();
        assert!(handler.wait_for_shutdown(Some(Duration::from_secs(1))));
        handler.reset();
    }
}
