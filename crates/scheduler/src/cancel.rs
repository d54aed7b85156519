//! Cancellation token for cooperative render cancellation
//!
//! A token is shared between the task owner and the worker running it. The
//! owner signals; the worker observes the signal at its checkpoints and the
//! owner discards whatever the worker eventually produces.

use std::sync::{
    atomic::{AtomicBool, Ordering},
    Arc,
};

/// Cancellation token for cooperative task cancellation
///
/// Cloning shares the underlying flag, so a cancel on any clone is visible
/// to all of them.
///
/// # Example
///
/// ```
/// use pagemark_scheduler::CancellationToken;
///
/// let token = CancellationToken::new();
/// let worker_token = token.clone();
///
/// token.cancel();
/// assert!(worker_token.is_cancelled());
/// ```
#[derive(Debug, Clone)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    /// Create a new token in the non-cancelled state.
    pub fn new() -> Self {
        Self {
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Cancel this token. Idempotent.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Release);
    }

    /// Returns `true` once `cancel()` has been called on this token or any clone.
    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Acquire)
    }

    /// Converts the flag into an early-exit checkpoint for workers.
    ///
    /// Returns `Err(Cancelled)` when the token has been cancelled.
    pub fn checkpoint(&self) -> Result<(), Cancelled> {
        if self.is_cancelled() {
            Err(Cancelled)
        } else {
            Ok(())
        }
    }
}

impl Default for CancellationToken {
    fn default() -> Self {
        Self::new()
    }
}

/// Marker returned by [`CancellationToken::checkpoint`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Cancelled;
