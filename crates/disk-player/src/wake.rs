//! Wake signal from the realtime callback to the disk thread.
//!
//! The mutex guards nothing but a "wake pending" flag. The realtime side only ever
//! `try_lock`s it and skips the signal when it is contended; the pending flag keeps a wake
//! that arrives while the disk thread is busy reading from being lost.

use std::sync::{Condvar, Mutex, PoisonError, TryLockError};

#[derive(Debug, Default)]
pub struct WakeSignal {
    pending: Mutex<bool>,
    cv: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Non-blocking wake for the realtime thread.
    ///
    /// Returns `false` when the lock was contended and no signal was sent.
    pub fn try_notify(&self) -> bool {
        let mut pending = match self.pending.try_lock() {
            Ok(guard) => guard,
            Err(TryLockError::Poisoned(poisoned)) => poisoned.into_inner(),
            Err(TryLockError::WouldBlock) => return false,
        };
        *pending = true;
        self.cv.notify_one();
        true
    }

    /// Blocking wake for non-realtime callers (session shutdown).
    pub fn notify(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        *pending = true;
        self.cv.notify_one();
    }

    /// Block until a wake is pending, then consume it.
    pub fn wait(&self) {
        let mut pending = self.pending.lock().unwrap_or_else(PoisonError::into_inner);
        while !*pending {
            pending = self.cv.wait(pending).unwrap_or_else(PoisonError::into_inner);
        }
        *pending = false;
    }
}
