//! Wake signal
//!
//! Set by the capture callback after every push so a render thread that went to
//! sleep on prolonged input silence can resume without polling.

use std::sync::{Condvar, Mutex};
use std::time::Duration;

/// A sticky, auto-resetting flag with a condition variable.
#[derive(Debug, Default)]
pub struct WakeSignal {
    pending: Mutex<bool>,
    cond: Condvar,
}

impl WakeSignal {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the flag and wakes one waiter.
    pub fn notify(&self) {
        let mut pending = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        *pending = true;
        self.cond.notify_one();
    }

    /// Waits until the flag is set or `timeout` elapses, then clears it.
    /// Returns whether the flag was set.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        let guard = match self.pending.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut guard = match self.cond.wait_timeout_while(guard, timeout, |pending| !*pending) {
            Ok((guard, _)) => guard,
            Err(poisoned) => poisoned.into_inner().0,
        };
        std::mem::replace(&mut *guard, false)
    }

    /// Clears the flag and returns its previous value without waiting.
    pub fn take(&self) -> bool {
        match self.pending.lock() {
            Ok(mut guard) => std::mem::replace(&mut *guard, false),
            Err(poisoned) => std::mem::replace(&mut *poisoned.into_inner(), false),
        }
    }
}
