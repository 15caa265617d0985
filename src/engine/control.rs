//! Shared control flags.
//!
//! Independent, idempotent toggles set from the control thread and polled by the
//! render thread at the top of each loop iteration. No ordering between flags is
//! needed, so relaxed atomics suffice.

use std::sync::atomic::{AtomicBool, Ordering};

#[derive(Debug)]
pub struct ControlState {
    running: AtomicBool,
    paused: AtomicBool,
    looping: AtomicBool,
}

impl ControlState {
    pub fn new(looping: bool) -> Self {
        Self {
            running: AtomicBool::new(true),
            paused: AtomicBool::new(false),
            looping: AtomicBool::new(looping),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Relaxed)
    }

    /// Asks the render thread to exit after its current iteration.
    pub fn stop(&self) {
        self.running.store(false, Ordering::Relaxed);
    }

    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::Relaxed)
    }

    pub fn set_paused(&self, paused: bool) {
        self.paused.store(paused, Ordering::Relaxed);
    }

    /// Returns the new paused state.
    pub fn toggle_pause(&self) -> bool {
        !self.paused.fetch_xor(true, Ordering::Relaxed)
    }

    pub fn is_looping(&self) -> bool {
        self.looping.load(Ordering::Relaxed)
    }

    pub fn set_looping(&self, looping: bool) {
        self.looping.store(looping, Ordering::Relaxed);
    }
}

impl Default for ControlState {
    fn default() -> Self {
        Self::new(true)
    }
}
