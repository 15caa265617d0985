//! Capture Queues
//!
//! The producer/consumer pair that carries live input from a platform callback to
//! the render thread. The callback side only ever enqueues; every decision about
//! what to do with a message is made by the consumer.

use std::sync::Arc;

use super::event_ring::{event_ring, EventConsumer, EventProducer};
use super::sysex_queue::{SysExQueue, DEFAULT_SYSEX_CAPACITY};
use super::wake::WakeSignal;
use crate::midi::{MidiMessage, SysExPayload, SYSEX_START};

/// Creates a connected sink/source pair that signals an existing wake
/// condition, so waiters survive the queues being recreated.
///
/// `event_capacity` is the event ring size (rounded up to a power of two).
pub fn capture_queues_with_wake(
    event_capacity: usize,
    wake: Arc<WakeSignal>,
) -> (CaptureSink, CaptureSource) {
    let (producer, consumer) = event_ring(event_capacity);
    let sysex = Arc::new(SysExQueue::new(DEFAULT_SYSEX_CAPACITY));

    (
        CaptureSink {
            events: producer,
            sysex: Arc::clone(&sysex),
            wake: Arc::clone(&wake),
            next_serial: 0,
        },
        CaptureSource {
            events: consumer,
            sysex,
            wake,
        },
    )
}

/// Producer side, handed to an input port's callback.
pub struct CaptureSink {
    events: EventProducer,
    sysex: Arc<SysExQueue>,
    wake: Arc<WakeSignal>,
    next_serial: u16,
}

impl CaptureSink {
    /// Enqueues one raw message as delivered by an input port.
    ///
    /// A message starting with 0xF0 goes to the system-exclusive queue and a
    /// placeholder with the same serial goes to the event ring, so its position
    /// relative to short messages is kept. Empty messages are ignored.
    pub fn deliver(&mut self, timestamp_ms: u32, bytes: &[u8]) {
        match bytes.first() {
            None => return,
            Some(&SYSEX_START) => {
                let serial = self.next_serial;
                self.next_serial = serial.wrapping_add(1);
                self.sysex
                    .push(SysExPayload::new(bytes.to_vec(), timestamp_ms, serial));
                self.events.push(MidiMessage::sysex_marker(serial, timestamp_ms));
            }
            Some(_) => {
                if let Some(msg) = MidiMessage::from_bytes(bytes, timestamp_ms) {
                    self.events.push(msg);
                }
            }
        }
        self.wake.notify();
    }
}

/// Consumer side, owned by the live-input sequence.
pub struct CaptureSource {
    pub events: EventConsumer,
    pub sysex: Arc<SysExQueue>,
    pub wake: Arc<WakeSignal>,
}

impl CaptureSource {
    /// Discards everything queued so far.
    pub fn discard_pending(&mut self) {
        let mut scratch = Vec::with_capacity(self.events.len());
        self.events.drain_into(&mut scratch);
        self.sysex.clear();
        self.wake.take();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn queues(capacity: usize) -> (CaptureSink, CaptureSource) {
        capture_queues_with_wake(capacity, Arc::new(WakeSignal::new()))
    }

    fn drain(source: &mut CaptureSource) -> Vec<MidiMessage> {
        let mut out = Vec::new();
        source.events.drain_into(&mut out);
        out
    }

    #[test]
    fn test_short_message_goes_to_ring() {
        let (mut sink, mut source) = queues(16);
        sink.deliver(5, &[0x90, 60, 100]);

        assert_eq!(drain(&mut source), vec![MidiMessage::new(0x90, 60, 100, 5)]);
        assert!(source.sysex.is_empty());
        assert!(source.wake.wait_timeout(Duration::from_millis(1)));
    }

    #[test]
    fn test_sysex_keeps_position() {
        let (mut sink, mut source) = queues(16);
        sink.deliver(1, &[0x90, 60, 100]);
        sink.deliver(2, &[0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7]);
        sink.deliver(3, &[0x80, 60, 0]);

        let out = drain(&mut source);
        let statuses: Vec<u8> = out.iter().map(|m| m.status).collect();
        assert_eq!(statuses, vec![0x90, 0xF0, 0x80]);

        let payload = source.sysex.take(out[1].sysex_serial()).unwrap();
        assert_eq!(payload.timestamp_ms, 2);
        assert_eq!(payload.body(), &[0x7E, 0x7F, 0x09, 0x01]);
    }

    #[test]
    fn test_sysex_serials_increase() {
        let (mut sink, mut source) = queues(16);
        for i in 0..3u8 {
            sink.deliver(0, &[0xF0, i, 0xF7]);
        }
        let serials: Vec<u16> = drain(&mut source).iter().map(|m| m.sysex_serial()).collect();
        assert_eq!(serials, vec![0, 1, 2]);
        assert_eq!(source.sysex.take(2).map(|p| p.body().to_vec()), Some(vec![2]));
    }

    #[test]
    fn test_empty_message_ignored() {
        let (mut sink, source) = queues(16);
        sink.deliver(0, &[]);
        assert!(source.events.is_empty());
        assert!(!source.wake.take());
    }

    #[test]
    fn test_discard_pending() {
        let (mut sink, mut source) = queues(16);
        sink.deliver(0, &[0x90, 60, 100]);
        sink.deliver(0, &[0xF0, 0x01, 0xF7]);
        source.discard_pending();
        assert!(source.events.is_empty());
        assert!(source.sysex.is_empty());
        assert!(!source.wake.take());
    }
}
