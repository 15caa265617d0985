//! Live MIDI input as a sequence.
//!
//! The `//MIDIIN<port>` pseudo path selects this variant. Instead of decoding a
//! file it drains the capture queues filled by an [`InputPort`] callback and
//! dispatches whatever arrived since the last call. It never ends; when nothing is
//! pending it returns [`Advance::Idle`] with a poll interval that grows with the
//! length of the silence, and [`Advance::Sleep`] once the silence is long enough
//! for the render thread to stop polling altogether.

use std::sync::Arc;

use tracing::{debug, error, info, warn};

use super::{Advance, Sequence, SequenceFormat};
use crate::engine::{MidiError, INTERNAL_SAMPLE_RATE};
use crate::midi::{MessageKind, MidiMessage, SYSEX_START};
use crate::queue::{capture_queues_with_wake, CaptureSink, CaptureSource, WakeSignal};
use crate::synth::Synth;

/// Path prefix that selects live input.
pub const MARKER: &[u8] = b"//MIDIIN";

/// Delay after a batch of dispatched input.
const DISPATCH_DELAY_MS: u32 = 1;

const IDLE_MIN_MS: u32 = 1;
const IDLE_MAX_MS: u32 = 100;

/// Silence after which the sequence reports [`Advance::Sleep`].
const SLEEP_AFTER_MS: u32 = 5_000;

/// Does `data` start with the live-input marker (any case)?
pub fn has_marker(data: &[u8]) -> bool {
    data.len() >= MARKER.len() && data[..MARKER.len()].eq_ignore_ascii_case(MARKER)
}

/// The marker plus at least one byte, so a bare marker is not a valid buffer.
pub fn recognize(data: &[u8]) -> bool {
    data.len() > MARKER.len() && has_marker(data)
}

/// Port number following the marker; 0 when absent.
pub fn port_number(data: &[u8]) -> usize {
    data.get(MARKER.len()..)
        .unwrap_or_default()
        .iter()
        .take_while(|b| b.is_ascii_digit())
        .fold(0usize, |n, &d| n.saturating_mul(10).saturating_add((d - b'0') as usize))
}

/// A live input source.
///
/// `open` hands the port a [`CaptureSink`]; the port's callback only ever calls
/// [`CaptureSink::deliver`]. After `close` returns, the callback must not run
/// again.
pub trait InputPort: Send {
    fn open(&mut self, port: usize, sink: CaptureSink) -> Result<(), MidiError>;
    fn close(&mut self);
}

#[cfg(test)]
type SharedSink = Arc<std::sync::Mutex<Option<CaptureSink>>>;

/// In-memory input port. Messages sent through the paired [`LoopbackSender`]
/// arrive as if they came from hardware.
#[cfg(test)]
pub struct LoopbackPort {
    shared: SharedSink,
    available: usize,
}

/// Sending half of a [`LoopbackPort`].
#[cfg(test)]
#[derive(Clone)]
pub struct LoopbackSender {
    shared: SharedSink,
}

#[cfg(test)]
impl LoopbackPort {
    /// A port that accepts any port number.
    pub fn new() -> (Self, LoopbackSender) {
        Self::with_ports(usize::MAX)
    }

    /// A port that fails to open port numbers `>= available`.
    pub fn with_ports(available: usize) -> (Self, LoopbackSender) {
        let shared = Arc::new(std::sync::Mutex::new(None));
        (
            Self {
                shared: Arc::clone(&shared),
                available,
            },
            LoopbackSender { shared },
        )
    }
}

#[cfg(test)]
impl InputPort for LoopbackPort {
    fn open(&mut self, port: usize, sink: CaptureSink) -> Result<(), MidiError> {
        if self.available == 0 {
            return Err(MidiError::NoDevices);
        }
        if port >= self.available {
            return Err(MidiError::DeviceNotFound(port));
        }
        if let Ok(mut guard) = self.shared.lock() {
            *guard = Some(sink);
        }
        Ok(())
    }

    fn close(&mut self) {
        if let Ok(mut guard) = self.shared.lock() {
            guard.take();
        }
    }
}

#[cfg(test)]
impl LoopbackSender {
    /// Delivers raw bytes. Returns false if the port is closed.
    pub fn send(&self, timestamp_ms: u32, bytes: &[u8]) -> bool {
        match self.shared.lock() {
            Ok(mut guard) => match guard.as_mut() {
                Some(sink) => {
                    sink.deliver(timestamp_ms, bytes);
                    true
                }
                None => false,
            },
            Err(_) => false,
        }
    }

    pub fn is_open(&self) -> bool {
        self.shared.lock().map(|g| g.is_some()).unwrap_or(false)
    }
}

/// Live-input sequence.
pub struct LiveInputSequence {
    port: Box<dyn InputPort>,
    port_number: usize,
    event_capacity: usize,
    source: Option<CaptureSource>,
    wake: Arc<WakeSignal>,
    sample_rate: u32,
    /// Time since input last produced a dispatch, in samples.
    silence: u64,
    reported_drops: u64,
    scratch: Vec<MidiMessage>,
}

impl LiveInputSequence {
    /// Creates the sequence. The port is opened by [`Sequence::reset`].
    pub fn new(port: Box<dyn InputPort>, port_number: usize, event_capacity: usize) -> Self {
        Self {
            port,
            port_number,
            event_capacity,
            source: None,
            wake: Arc::new(WakeSignal::new()),
            sample_rate: INTERNAL_SAMPLE_RATE,
            silence: 0,
            reported_drops: 0,
            scratch: Vec::with_capacity(event_capacity),
        }
    }

    /// Is the input port currently open?
    #[cfg(test)]
    fn is_open(&self) -> bool {
        self.source.is_some()
    }

    fn ms_to_samples(&self, ms: u32) -> u32 {
        ((self.sample_rate as u64 * ms as u64) / 1000).max(1) as u32
    }

    fn idle(&mut self) -> Advance {
        let silence_ms = self.silence * 1000 / self.sample_rate.max(1) as u64;
        if silence_ms >= SLEEP_AFTER_MS as u64 {
            return Advance::Sleep;
        }
        let wait_ms = ((silence_ms / 10) as u32).clamp(IDLE_MIN_MS, IDLE_MAX_MS);
        let wait = self.ms_to_samples(wait_ms);
        self.silence += wait as u64;
        Advance::Idle(wait)
    }
}

impl Sequence for LiveInputSequence {
    fn format(&self) -> SequenceFormat {
        SequenceFormat::MidiIn
    }

    fn reset(&mut self) {
        self.port.close();
        self.source = None;
        self.wake.take();

        let (sink, source) = capture_queues_with_wake(self.event_capacity, Arc::clone(&self.wake));
        match self.port.open(self.port_number, sink) {
            Ok(()) => {
                info!(port = self.port_number, "live input opened");
                self.source = Some(source);
            }
            Err(e) => error!(port = self.port_number, error = %e, "failed to open live input"),
        }
        self.silence = 0;
        self.reported_drops = 0;
    }

    fn advance(&mut self, synth: &mut dyn Synth) -> Advance {
        let Some(source) = self.source.as_mut() else {
            return self.idle();
        };

        self.scratch.clear();
        source.events.drain_into(&mut self.scratch);

        let dropped = source.events.dropped();
        if dropped > self.reported_drops {
            warn!(
                dropped = dropped - self.reported_drops,
                "live input overflow, oldest messages discarded"
            );
            self.reported_drops = dropped;
        }

        let mut dispatched = false;
        for msg in &self.scratch {
            match msg.kind() {
                MessageKind::NoteOn | MessageKind::TwoData => {
                    synth.channel_event(msg.status, msg.data1, msg.data2);
                    dispatched = true;
                }
                MessageKind::OneData => {
                    synth.channel_event(msg.status, msg.data1, 0);
                    dispatched = true;
                }
                MessageKind::System if msg.status == SYSEX_START => {
                    if let Some(payload) = source.sysex.take(msg.sysex_serial()) {
                        synth.system_exclusive(payload.body());
                        dispatched = true;
                    }
                }
                // Realtime and common messages carry nothing for the synth
                MessageKind::System | MessageKind::Data => {}
            }
        }

        if dispatched {
            self.silence = 0;
            Advance::Delay(self.ms_to_samples(DISPATCH_DELAY_MS))
        } else {
            self.idle()
        }
    }

    fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate > 0 && sample_rate != self.sample_rate {
            self.silence = self.silence * sample_rate as u64 / self.sample_rate as u64;
            self.sample_rate = sample_rate;
        }
    }

    fn set_looping(&mut self, _looping: bool) {}

    fn has_pending_input(&self) -> bool {
        self.source.as_ref().is_some_and(|s| !s.events.is_empty())
    }

    fn wake_signal(&self) -> Option<Arc<WakeSignal>> {
        Some(Arc::clone(&self.wake))
    }
}

impl Drop for LiveInputSequence {
    fn drop(&mut self) {
        if self.source.take().is_some() {
            self.port.close();
            debug!(port = self.port_number, "live input closed");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::DEFAULT_SYSEX_CAPACITY;
    use crate::synth::testing::{Dispatch, RecordingSynth};

    const RATE: u32 = 50_000;

    fn live(capacity: usize) -> (LiveInputSequence, LoopbackSender) {
        let (port, sender) = LoopbackPort::new();
        let mut seq = LiveInputSequence::new(Box::new(port), 0, capacity);
        seq.set_sample_rate(RATE);
        seq.reset();
        (seq, sender)
    }

    #[test]
    fn test_marker_recognition() {
        assert!(recognize(b"//MIDIIN0"));
        assert!(recognize(b"//midiin12"));
        assert!(!recognize(b"//MIDIIN"));
        assert!(!recognize(b"MThd"));
        assert_eq!(port_number(b"//MIDIIN12"), 12);
        assert_eq!(port_number(b"//MIDIIN"), 0);
        assert_eq!(port_number(b"//MIDIINx"), 0);
    }

    #[test]
    fn test_dispatch_by_kind() {
        let (mut seq, sender) = live(64);
        assert!(sender.send(0, &[0x90, 60, 100]));
        sender.send(1, &[0xB0, 7, 90]);
        sender.send(2, &[0xC3, 12]);
        sender.send(3, &[0xF8]);
        sender.send(4, &[0xF0, 0x7E, 0x7F, 0x09, 0x01, 0xF7]);
        assert!(seq.has_pending_input());

        let mut synth = RecordingSynth::new();
        assert_eq!(seq.advance(&mut synth), Advance::Delay(50));
        assert_eq!(
            synth.channel_events(),
            vec![(0x90, 60, 100), (0xB0, 7, 90), (0xC3, 12, 0)]
        );
        assert_eq!(
            synth.events.last().map(|r| r.dispatch.clone()),
            Some(Dispatch::SysEx(vec![0x7E, 0x7F, 0x09, 0x01]))
        );
        assert!(!seq.has_pending_input());
    }

    #[test]
    fn test_idle_grows_then_sleeps() {
        let (mut seq, _sender) = live(64);
        let mut synth = RecordingSynth::new();

        assert_eq!(seq.advance(&mut synth), Advance::Idle(50));
        let mut longest = 0;
        let mut steps = 0;
        loop {
            match seq.advance(&mut synth) {
                Advance::Idle(n) => {
                    assert!(n >= longest);
                    longest = n;
                }
                Advance::Sleep => break,
                other => panic!("unexpected {:?}", other),
            }
            steps += 1;
            assert!(steps < 10_000);
        }
        assert_eq!(longest, RATE / 10);
        assert_eq!(seq.advance(&mut synth), Advance::Sleep);
    }

    #[test]
    fn test_input_wakes_from_sleep() {
        let (mut seq, sender) = live(64);
        let mut synth = RecordingSynth::new();
        while seq.advance(&mut synth) != Advance::Sleep {}

        let wake = seq.wake_signal().unwrap();
        wake.take();
        sender.send(0, &[0x91, 64, 80]);
        assert!(wake.take());
        assert_eq!(seq.advance(&mut synth), Advance::Delay(50));
        assert_eq!(synth.channel_events(), vec![(0x91, 64, 80)]);
        assert_eq!(seq.advance(&mut synth), Advance::Idle(50));
    }

    #[test]
    fn test_realtime_messages_do_not_reset_silence() {
        let (mut seq, sender) = live(64);
        let mut synth = RecordingSynth::new();
        while seq.advance(&mut synth) != Advance::Sleep {}
        sender.send(0, &[0xFE]);
        assert_eq!(seq.advance(&mut synth), Advance::Sleep);
    }

    #[test]
    fn test_overflow_keeps_most_recent() {
        let (mut seq, sender) = live(16);
        for i in 0..40u8 {
            sender.send(i as u32, &[0x90, i, 100]);
        }
        let mut synth = RecordingSynth::new();
        seq.advance(&mut synth);
        let notes: Vec<u8> = synth.note_ons().iter().map(|&(_, _, n)| n).collect();
        assert_eq!(notes, (24..40).collect::<Vec<u8>>());
    }

    fn sysex_bodies(synth: &RecordingSynth) -> Vec<Vec<u8>> {
        synth
            .events
            .iter()
            .filter_map(|r| match &r.dispatch {
                Dispatch::SysEx(body) => Some(body.clone()),
                _ => None,
            })
            .collect()
    }

    #[test]
    fn test_sysex_stays_paired_after_ring_overflow() {
        let (mut seq, sender) = live(16);
        for i in 0..20u8 {
            sender.send(i as u32, &[0xF0, 0x41, i, 0xF7]);
        }
        let mut synth = RecordingSynth::new();
        seq.advance(&mut synth);
        let expected: Vec<Vec<u8>> = (4..20u8).map(|i| vec![0x41, i]).collect();
        assert_eq!(sysex_bodies(&synth), expected);

        sender.send(20, &[0xF0, 0x42, 0x7F, 0xF7]);
        let mut synth = RecordingSynth::new();
        seq.advance(&mut synth);
        assert_eq!(sysex_bodies(&synth), vec![vec![0x42, 0x7F]]);
    }

    #[test]
    fn test_sysex_queue_overflow_skips_lost_payloads() {
        let (mut seq, sender) = live(1024);
        let count = DEFAULT_SYSEX_CAPACITY as u16 + 44;
        for i in 0..count {
            sender.send(0, &[0xF0, 0x41, (i >> 7) as u8, (i & 0x7F) as u8, 0xF7]);
        }
        let mut synth = RecordingSynth::new();
        seq.advance(&mut synth);

        let bodies = sysex_bodies(&synth);
        assert_eq!(bodies.len(), DEFAULT_SYSEX_CAPACITY);
        let serial = |body: &Vec<u8>| (body[1] as u16) << 7 | body[2] as u16;
        assert_eq!(bodies.first().map(serial), Some(44));
        assert_eq!(bodies.last().map(serial), Some(count - 1));

        sender.send(0, &[0xF0, 0x42, 0x7F, 0xF7]);
        let mut synth = RecordingSynth::new();
        seq.advance(&mut synth);
        assert_eq!(sysex_bodies(&synth), vec![vec![0x42, 0x7F]]);
    }

    #[test]
    fn test_reset_reopens_and_discards() {
        let (mut seq, sender) = live(64);
        sender.send(0, &[0x90, 60, 100]);
        seq.reset();
        assert!(sender.is_open());
        assert!(!seq.has_pending_input());
        sender.send(0, &[0x90, 62, 100]);
        let mut synth = RecordingSynth::new();
        seq.advance(&mut synth);
        assert_eq!(synth.channel_events(), vec![(0x90, 62, 100)]);
    }

    #[test]
    fn test_missing_port_idles() {
        let (port, sender) = LoopbackPort::with_ports(1);
        let mut seq = LiveInputSequence::new(Box::new(port), 3, 64);
        seq.reset();
        assert!(!seq.is_open());
        assert!(!sender.send(0, &[0x90, 60, 100]));
        let mut synth = RecordingSynth::new();
        assert_eq!(seq.advance(&mut synth), Advance::Idle(50));
    }

    #[test]
    fn test_drop_closes_port() {
        let (seq, sender) = live(64);
        assert!(sender.is_open());
        drop(seq);
        assert!(!sender.is_open());
    }

    #[test]
    fn test_sender_from_another_thread() {
        let (mut seq, sender) = live(4096);
        let handle = std::thread::spawn(move || {
            for i in 0..100u8 {
                sender.send(0, &[0x90, i, 1]);
            }
        });
        handle.join().unwrap();
        let mut synth = RecordingSynth::new();
        seq.advance(&mut synth);
        assert_eq!(synth.note_ons().len(), 100);
    }
}
