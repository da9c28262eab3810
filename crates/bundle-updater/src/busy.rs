//! Single-flight guard for update operations.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::error::{Result, UpdateError};
use crate::events::{UpdateEvent, UpdateListener};

/// The "update in progress" flag of one coordinator.
pub struct BusyState {
    flag: AtomicBool,
    listener: Arc<dyn UpdateListener>,
}

impl BusyState {
    /// Idle state reporting changes to `listener`.
    pub fn new(listener: Arc<dyn UpdateListener>) -> Arc<Self> {
        Arc::new(Self {
            flag: AtomicBool::new(false),
            listener,
        })
    }

    /// Check if an operation holds the flag.
    #[must_use]
    pub fn is_busy(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Take the flag, or fail with [`UpdateError::Busy`] if it is held.
    pub fn acquire(self: &Arc<Self>) -> Result<BusyGuard> {
        if self
            .flag
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            tracing::debug!("Rejecting update operation: already busy");
            return Err(UpdateError::Busy);
        }
        self.listener.on_event(&UpdateEvent::BusyChanged(true));
        Ok(BusyGuard {
            state: Arc::clone(self),
        })
    }
}

impl std::fmt::Debug for BusyState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BusyState")
            .field("busy", &self.is_busy())
            .finish_non_exhaustive()
    }
}

/// Holds the busy flag until dropped. Can be moved to a worker thread.
#[derive(Debug)]
#[must_use = "the busy flag is released when the guard is dropped"]
pub struct BusyGuard {
    state: Arc<BusyState>,
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.state.flag.store(false, Ordering::SeqCst);
        self.state
            .listener
            .on_event(&UpdateEvent::BusyChanged(false));
    }
}
