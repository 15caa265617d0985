//! Player Commands and Events
//!
//! Defines the messages that flow between the control thread and the render thread.
//! All types here must be Send + 'static for safe cross-thread communication.
//!
//! Simple toggles (pause, loop, stop) are not commands: they live in
//! [`ControlState`](super::ControlState) as atomics.

/// Intents sent from the control thread to the render thread.
/// These are consumed at the top of each render loop iteration.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerCommand {
    /// Rewind the current song and play it from the start.
    Restart,

    /// Switch to the next song. Ignored on the last one.
    NextSong,

    /// Switch to the previous song. Ignored on the first one.
    PreviousSong,

    /// Switch to a specific song (0-based, clamped).
    SelectSong(usize),

    /// Set the output gain (linear).
    SetGain(f32),

    /// Set the output highpass cutoff in Hz (0 disables the filter).
    SetFilter(f32),
}

/// Notifications sent from the render thread to the control thread.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum PlayerEvent {
    /// The output device is open and rendering.
    Started {
        /// Negotiated device sample rate.
        sample_rate: u32,
        /// Output channels.
        channels: u16,
    },

    /// A new song was selected.
    SongChanged {
        /// 0-based index.
        index: usize,
        /// Total songs in the sequence.
        count: usize,
    },

    /// The sequence ended and is not looping.
    Ended,

    /// Live input has been silent long enough that rendering was suspended.
    Asleep,

    /// Rendering resumed after input arrived.
    Awake,

    /// The output device failed; a restart is scheduled.
    DeviceLost {
        /// Consecutive failed attempt number (1-based).
        attempt: u32,
    },

    /// The render thread exited.
    Stopped,
}
