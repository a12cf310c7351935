//! Host signal handling for the `pipeit` binary.
//!
//! Signals only set atomic flags; the main loop polls them and reacts by
//! stopping the child or resizing its terminal.

use crate::error::{PipeError, Result};
use crate::manager::{ProcessManager, Transport};
use nix::sys::signal::Signal;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Signal flags that can be checked by the main loop
#[derive(Clone, Debug)]
pub struct SignalFlags {
    pub sigwinch_received: Arc<AtomicBool>,
    pub sigterm_received: Arc<AtomicBool>,
    pub sigint_received: Arc<AtomicBool>,
    pub sighup_received: Arc<AtomicBool>,
}

impl SignalFlags {
    /// Create a new set of signal flags
    pub fn new() -> Self {
        Self {
            sigwinch_received: Arc::new(AtomicBool::new(false)),
            sigterm_received: Arc::new(AtomicBool::new(false)),
            sigint_received: Arc::new(AtomicBool::new(false)),
            sighup_received: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Check if SIGWINCH (window resize) was received and clear the flag
    pub fn check_and_clear_sigwinch(&self) -> bool {
        self.sigwinch_received.swap(false, Ordering::SeqCst)
    }

    /// Get the termination signal if any
    pub fn get_term_signal(&self) -> Option<Signal> {
        if self.sigterm_received.load(Ordering::SeqCst) {
            Some(Signal::SIGTERM)
        } else if self.sigint_received.load(Ordering::SeqCst) {
            Some(Signal::SIGINT)
        } else if self.sighup_received.load(Ordering::SeqCst) {
            Some(Signal::SIGHUP)
        } else {
            None
        }
    }
}

impl Default for SignalFlags {
    fn default() -> Self {
        Self::new()
    }
}

/// Register handlers that set the returned flags
pub fn setup_signal_handlers() -> Result<SignalFlags> {
    use signal_hook::consts::signal::*;
    use signal_hook::flag;

    let flags = SignalFlags::new();

    let registrations = [
        (SIGWINCH, &flags.sigwinch_received),
        (SIGTERM, &flags.sigterm_received),
        (SIGINT, &flags.sigint_received),
        (SIGHUP, &flags.sighup_received),
    ];

    for (signal, target) in registrations {
        flag::register(signal, Arc::clone(target)).map_err(PipeError::Io)?;
    }

    Ok(flags)
}

/// Copy the host terminal's size onto the child's PTY. A no-op without a
/// controlling terminal or with the pipe transport.
pub fn handle_window_resize(pm: &ProcessManager) -> Result<()> {
    if pm.transport() != Transport::Pty {
        return Ok(());
    }
    if let Some((rows, cols)) = crate::pty::get_terminal_winsize() {
        pm.set_window_size(rows, cols)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signal_flags_creation() {
        let flags = SignalFlags::new();
        assert_eq!(flags.get_term_signal(), None);
    }

    #[test]
    fn test_signal_flags_check_and_clear() {
        let flags = SignalFlags::new();

        flags.sigwinch_received.store(true, Ordering::SeqCst);
        assert!(flags.check_and_clear_sigwinch());
        // Should be cleared now
        assert!(!flags.check_and_clear_sigwinch());
    }

    #[test]
    fn test_sigterm_takes_precedence() {
        let flags = SignalFlags::new();

        flags.sigint_received.store(true, Ordering::SeqCst);
        assert_eq!(flags.get_term_signal(), Some(Signal::SIGINT));

        flags.sigterm_received.store(true, Ordering::SeqCst);
        assert_eq!(flags.get_term_signal(), Some(Signal::SIGTERM));
    }

    #[test]
    fn test_resize_ignored_for_pipes() {
        let pm = ProcessManager::new("true", Vec::<String>::new());
        handle_window_resize(&pm).unwrap();
    }
}
