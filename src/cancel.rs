//! Cooperative cancellation shared between a run and the Ctrl+C handler.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// Shared flag checked before each segment and each assembly stage.
///
/// Clones observe the same flag. Work already in flight is not interrupted;
/// the next checkpoint sees the flag and stops.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag {
    inner: Arc<AtomicBool>,
}

impl CancelFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation.
    pub fn cancel(&self) {
        self.inner.store(true, Ordering::SeqCst);
    }

    /// Check whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.inner.load(Ordering::SeqCst)
    }
}

/// Install a Ctrl+C handler that cancels `flag`.
///
/// This should be called once at program startup.
pub fn setup_ctrlc_handler(flag: CancelFlag) -> Result<(), ctrlc::Error> {
    ctrlc::set_handler(move || {
        if !flag.is_cancelled() {
            eprintln!("\nReceived Ctrl+C, stopping after the current step...");
        }
        flag.cancel();
    })
}
