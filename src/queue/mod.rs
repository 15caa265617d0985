//! Queue module
//!
//! Cross-thread queues for live input: a lock-free ring for short messages, a
//! mutex-guarded queue for system-exclusive payloads, and the wake signal that
//! lets a sleeping render thread resume when input arrives.

pub mod capture;
pub mod event_ring;
pub mod sysex_queue;
pub mod wake;

pub use capture::{capture_queues_with_wake, CaptureSink, CaptureSource};
pub use event_ring::{event_ring, EventConsumer, EventProducer, DEFAULT_EVENT_CAPACITY};
pub use sysex_queue::{SysExQueue, DEFAULT_SYSEX_CAPACITY};
pub use wake::WakeSignal;
