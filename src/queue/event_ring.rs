//! Lock-free event ring.
//!
//! Single-producer / single-consumer queue of [`MidiMessage`]s with a fixed
//! power-of-two capacity. The write and read cursors are monotonic counters; they
//! are reduced modulo the capacity only when indexing the slot array, so
//! `write - read` is always the occupancy and "empty" never looks like "full".
//!
//! The producer never blocks and never fails: when the consumer stalls for longer
//! than the ring can absorb, new messages overwrite the oldest unread ones. The
//! consumer detects this and keeps only the most recent `capacity` messages, in
//! push order.
//!
//! Each slot is an `AtomicU64` holding a packed message, so a slot is never torn.
//! Slot accesses are relaxed; ordering comes from the cursors:
//! - `write` is published with release after the slot store and read with acquire
//!   before the slot loads.
//! - `claimed` is bumped before the slot store, so a consumer that re-reads it after
//!   its slot loads knows which slots may have been overwritten under it.

use std::sync::atomic::{fence, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;

use crate::midi::MidiMessage;

/// Default ring capacity.
pub const DEFAULT_EVENT_CAPACITY: usize = 4096;

struct Shared {
    slots: Box<[AtomicU64]>,
    mask: usize,
    /// Number of messages published.
    write: AtomicUsize,
    /// Number of messages the producer has started writing.
    claimed: AtomicUsize,
    /// Number of messages consumed (or skipped as overwritten).
    read: AtomicUsize,
}

impl Shared {
    fn capacity(&self) -> usize {
        self.mask + 1
    }
}

/// Creates a ring and returns its two ends.
///
/// `capacity` is rounded up to the next power of two (minimum 2).
pub fn event_ring(capacity: usize) -> (EventProducer, EventConsumer) {
    let capacity = capacity.max(2).next_power_of_two();
    let slots: Box<[AtomicU64]> = (0..capacity).map(|_| AtomicU64::new(0)).collect();
    let shared = Arc::new(Shared {
        slots,
        mask: capacity - 1,
        write: AtomicUsize::new(0),
        claimed: AtomicUsize::new(0),
        read: AtomicUsize::new(0),
    });

    (
        EventProducer {
            shared: Arc::clone(&shared),
        },
        EventConsumer { shared, dropped: 0 },
    )
}

/// Producer end. Owned by the capture callback.
pub struct EventProducer {
    shared: Arc<Shared>,
}

impl EventProducer {
    /// Publishes a message. Never blocks; overwrites the oldest unread message
    /// when the ring is full.
    #[inline]
    pub fn push(&mut self, msg: MidiMessage) {
        let shared = &*self.shared;
        let w = shared.write.load(Ordering::Relaxed);
        shared.claimed.store(w + 1, Ordering::Relaxed);
        fence(Ordering::Release);
        shared.slots[w & shared.mask].store(msg.pack(), Ordering::Relaxed);
        shared.write.store(w + 1, Ordering::Release);
    }

    /// Ring capacity.
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }
}

/// Consumer end. Owned by the live-input sequence on the render thread.
pub struct EventConsumer {
    shared: Arc<Shared>,
    dropped: u64,
}

impl EventConsumer {
    /// Number of unread messages, capped at the capacity.
    pub fn len(&self) -> usize {
        let w = self.shared.write.load(Ordering::Acquire);
        let r = self.shared.read.load(Ordering::Relaxed);
        w.wrapping_sub(r).min(self.shared.capacity())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Ring capacity.
    #[cfg(test)]
    pub fn capacity(&self) -> usize {
        self.shared.capacity()
    }

    /// Total messages lost to overwrites since creation.
    pub fn dropped(&self) -> u64 {
        self.dropped
    }

    /// Appends every message published so far to `out`, oldest first, and
    /// returns how many were appended. Messages published while this call runs
    /// are left for the next call.
    pub fn drain_into(&mut self, out: &mut Vec<MidiMessage>) -> usize {
        let shared = &*self.shared;
        let capacity = shared.capacity();
        let read = shared.read.load(Ordering::Relaxed);
        let write = shared.write.load(Ordering::Acquire);

        let mut start = read;
        if write.wrapping_sub(start) > capacity {
            start = write - capacity;
        }

        let base = out.len();
        out.extend(
            (start..write)
                .map(|i| MidiMessage::unpack(shared.slots[i & shared.mask].load(Ordering::Relaxed))),
        );

        // Anything the producer claimed while we were copying may have replaced
        // the oldest slots we read; discard those.
        fence(Ordering::Acquire);
        let claimed = shared.claimed.load(Ordering::Relaxed);
        let first_valid = claimed.saturating_sub(capacity).max(start);
        let stale = (first_valid - start).min(write - start);
        if stale > 0 {
            out.drain(base..base + stale);
        }

        self.dropped += (first_valid.min(write) - read) as u64;
        shared.read.store(write, Ordering::Release);
        out.len() - base
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn msg(n: u32) -> MidiMessage {
        MidiMessage::new(0x90, (n % 128) as u8, 100, n)
    }

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let (p, c) = event_ring(3000);
        assert_eq!(p.capacity(), 4096);
        assert_eq!(c.capacity(), 4096);
        let (p, _) = event_ring(0);
        assert_eq!(p.capacity(), 2);
    }

    #[test]
    fn test_drain_in_push_order() {
        let (mut p, mut c) = event_ring(16);
        assert!(c.is_empty());
        for i in 0..10 {
            p.push(msg(i));
        }
        assert_eq!(c.len(), 10);
        let mut out = Vec::new();
        c.drain_into(&mut out);
        assert_eq!(out, (0..10).map(msg).collect::<Vec<_>>());
        assert!(c.is_empty());
    }

    #[test]
    fn test_drain_returns_occupancy_only() {
        let (mut p, mut c) = event_ring(16);
        p.push(msg(1));
        p.push(msg(2));
        let mut out = Vec::new();
        assert_eq!(c.drain_into(&mut out), 2);
        assert_eq!(out, vec![msg(1), msg(2)]);
        assert_eq!(c.drain_into(&mut out), 0);
        assert!(c.is_empty());
    }

    #[test]
    fn test_overflow_keeps_most_recent() {
        let (mut p, mut c) = event_ring(DEFAULT_EVENT_CAPACITY);
        for i in 0..5000 {
            p.push(msg(i));
        }
        assert_eq!(c.len(), 4096);

        let mut out = Vec::new();
        c.drain_into(&mut out);
        assert_eq!(out.len(), 4096);
        let stamps: Vec<u32> = out.iter().map(|m| m.timestamp_ms).collect();
        let expected: Vec<u32> = (904..5000).collect();
        assert_eq!(stamps, expected);
        assert_eq!(c.dropped(), 904);
    }

    #[test]
    fn test_drain_appends_after_overflow() {
        let (mut p, mut c) = event_ring(4);
        for i in 0..6 {
            p.push(msg(i));
        }
        let mut out = vec![msg(99)];
        assert_eq!(c.drain_into(&mut out), 4);
        let stamps: Vec<u32> = out.iter().map(|m| m.timestamp_ms).collect();
        assert_eq!(stamps, vec![99, 2, 3, 4, 5]);
        assert_eq!(c.dropped(), 2);
    }

    #[test]
    fn test_concurrent_order_preserved() {
        let (mut p, mut c) = event_ring(64);
        const COUNT: u32 = 200_000;

        let producer = thread::spawn(move || {
            for i in 1..=COUNT {
                p.push(msg(i));
            }
        });

        let mut received = Vec::new();
        let mut last = 0u32;
        let mut out = Vec::new();
        loop {
            out.clear();
            c.drain_into(&mut out);
            for m in &out {
                assert!(m.timestamp_ms > last, "out of order: {} after {}", m.timestamp_ms, last);
                last = m.timestamp_ms;
                received.push(m.timestamp_ms);
            }
            if last == COUNT {
                break;
            }
            if producer.is_finished() && c.is_empty() {
                break;
            }
        }
        producer.join().unwrap();
        out.clear();
        c.drain_into(&mut out);
        for m in &out {
            assert!(m.timestamp_ms > last);
            last = m.timestamp_ms;
            received.push(m.timestamp_ms);
        }

        assert_eq!(last, COUNT);
        assert_eq!(received.len() as u64 + c.dropped(), COUNT as u64);
    }

    #[test]
    fn test_handles_are_send() {
        fn assert_send<T: Send>() {}
        assert_send::<EventProducer>();
        assert_send::<EventConsumer>();
    }
}
