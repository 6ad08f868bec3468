//! Single-session guard
//!
//! The USB control node and the debug daemon are process-wide. Only one
//! session may toggle them at a time; a guard token is held from setup until
//! the state has been restored (or the handoff has been finished).

use common::{Error, Result};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug, Clone, Default)]
pub struct SessionLock(Arc<AtomicBool>);

impl SessionLock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Take the lock, failing with [`Error::SessionBusy`] if it is held
    pub fn try_acquire(&self) -> Result<SessionGuard> {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .map_err(|_| Error::SessionBusy)?;
        Ok(SessionGuard(self.0.clone()))
    }

    pub fn is_held(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Releases the session lock on drop
#[derive(Debug)]
pub struct SessionGuard(Arc<AtomicBool>);

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
