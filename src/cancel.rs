//! Cooperative cancellation for long-running operations.
//!
//! `Reader::walk`, `Diagnostics::scan_cancelable`, `Tx::commit_cancelable`
//! and `export_reg_cancelable` poll a [`CancelToken`] at key/list/cell
//! boundaries rather than spawning a thread to interrupt themselves; there
//! is no preemption, only a flag the caller can set from another thread.

use crate::error::{RegistryError, Result};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

/// A shared, settable cancellation flag. Cloning shares the same
/// underlying flag, so a token handed to a worker thread and one kept by
/// the caller observe each other's state.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    /// Creates a fresh, not-yet-cancelled token.
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation. Idempotent.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Relaxed);
    }

    /// Returns whether [`cancel`](Self::cancel) has been called.
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Relaxed)
    }

    /// Returns `Err(RegistryError::Cancelled)` if cancelled, `Ok(())`
    /// otherwise. Intended to be called at loop/recursion boundaries.
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(RegistryError::Cancelled)
        } else {
            Ok(())
        }
    }
}
