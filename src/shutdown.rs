// src/shutdown.rs

//! Shutdown latch set from signal context and polled by the flip scheduler.
//!
//! Lifecycle: `false` at process start, set at most once by a termination
//! signal (repeat sets are no-ops), never cleared. The installed handler does
//! exactly one atomic store; everything else happens on the scheduler path.

use crate::error::DrmError;
use log::debug;
use nix::sys::signal::{sigaction, SaFlags, SigAction, SigHandler, SigSet, Signal};
use std::sync::atomic::{AtomicBool, Ordering};

/// A one-way boolean latch, safe to set from an async-signal handler.
#[derive(Debug)]
pub struct ShutdownLatch {
    requested: AtomicBool,
}

impl ShutdownLatch {
    pub const fn new() -> Self {
        Self {
            requested: AtomicBool::new(false),
        }
    }

    /// Async-signal-safe: no allocation, no locking.
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

impl Default for ShutdownLatch {
    fn default() -> Self {
        Self::new()
    }
}

/// The process-wide latch written by the termination signal handler.
pub static SHUTDOWN: ShutdownLatch = ShutdownLatch::new();

extern "C" fn handle_termination(_signum: libc::c_int) {
    SHUTDOWN.request();
}

/// Routes `SIGINT` and `SIGTERM` to [`SHUTDOWN`].
///
/// No `SA_RESTART`: a poll blocked on the DRM fd must return `EINTR` so the
/// scheduler re-checks the latch.
pub fn install_handlers() -> Result<(), DrmError> {
    let action = SigAction::new(
        SigHandler::Handler(handle_termination),
        SaFlags::empty(),
        SigSet::empty(),
    );
    for (signal, name) in [(Signal::SIGINT, "SIGINT"), (Signal::SIGTERM, "SIGTERM")] {
        // SAFETY: the handler only performs an atomic store on a static.
        unsafe { sigaction(signal, &action) }
            .map_err(|source| DrmError::Signal { signal: name, source })?;
    }
    debug!("Installed SIGINT/SIGTERM shutdown handlers");
    Ok(())
}
