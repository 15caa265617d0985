//! System-exclusive payload queue.
//!
//! Payloads are rare and variable-length, so this queue trades lock-freedom for
//! simplicity: a `VecDeque` behind a mutex that is only held for a push or a pop.

use std::collections::VecDeque;
use std::sync::Mutex;

use crate::midi::SysExPayload;

/// Default number of payloads held before the oldest is discarded.
pub const DEFAULT_SYSEX_CAPACITY: usize = 256;

/// Bounded FIFO of [`SysExPayload`]s shared between a capture callback and the
/// live-input sequence.
#[derive(Debug)]
pub struct SysExQueue {
    inner: Mutex<VecDeque<SysExPayload>>,
    capacity: usize,
}

impl SysExQueue {
    /// Creates a queue holding at most `capacity` payloads (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(VecDeque::with_capacity(capacity)),
            capacity,
        }
    }

    /// Appends a payload. When full, the oldest payload is dropped and `false`
    /// is returned.
    pub fn push(&self, payload: SysExPayload) -> bool {
        let mut queue = match self.inner.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        let mut kept_all = true;
        if queue.len() >= self.capacity {
            queue.pop_front();
            kept_all = false;
        }
        queue.push_back(payload);
        kept_all
    }

    /// Removes the payload numbered `serial`.
    ///
    /// Payloads captured before it belong to placeholders the event ring has
    /// already overwritten and are discarded. Returns `None` when the payload
    /// itself was dropped from this queue.
    pub fn take(&self, serial: u16) -> Option<SysExPayload> {
        let mut queue = match self.inner.lock() {
            Ok(queue) => queue,
            Err(poisoned) => poisoned.into_inner(),
        };
        while queue.front().is_some_and(|p| p.precedes(serial)) {
            queue.pop_front();
        }
        match queue.front() {
            Some(p) if p.serial == serial => queue.pop_front(),
            _ => None,
        }
    }

    /// Discards every queued payload.
    pub fn clear(&self) {
        match self.inner.lock() {
            Ok(mut queue) => queue.clear(),
            Err(poisoned) => poisoned.into_inner().clear(),
        }
    }

    pub fn len(&self) -> usize {
        match self.inner.lock() {
            Ok(queue) => queue.len(),
            Err(poisoned) => poisoned.into_inner().len(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl Default for SysExQueue {
    fn default() -> Self {
        Self::new(DEFAULT_SYSEX_CAPACITY)
    }
}
