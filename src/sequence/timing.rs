//! Tick-to-sample conversion.
//!
//! Sequence time is counted in format-defined ticks. The clock converts tick
//! deltas to sample counts at the current sample rate with exact integer
//! arithmetic, carrying the fractional remainder into the next conversion so
//! rounding never accumulates into drift.

/// Default MIDI tempo: 120 BPM.
pub const DEFAULT_USEC_PER_BEAT: u32 = 500_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ClockMode {
    /// Ticks per quarter note, scaled by a tempo in microseconds per quarter.
    Metrical {
        ticks_per_beat: u32,
        usec_per_beat: u32,
    },
    /// A fixed number of ticks per second (SMPTE division, MUS, XMI).
    Fixed { ticks_per_second: u32 },
}

/// Converts tick deltas to sample counts.
#[derive(Debug, Clone)]
pub struct TickClock {
    mode: ClockMode,
    initial_usec_per_beat: u32,
    sample_rate: u32,
    /// Numerator left over from the last conversion.
    remainder: u128,
}

impl TickClock {
    /// A metrical clock at the default tempo.
    pub fn metrical(ticks_per_beat: u32, sample_rate: u32) -> Self {
        Self::metrical_with_tempo(ticks_per_beat, DEFAULT_USEC_PER_BEAT, sample_rate)
    }

    /// A metrical clock starting at `usec_per_beat`.
    pub fn metrical_with_tempo(ticks_per_beat: u32, usec_per_beat: u32, sample_rate: u32) -> Self {
        Self {
            mode: ClockMode::Metrical {
                ticks_per_beat: ticks_per_beat.max(1),
                usec_per_beat: usec_per_beat.max(1),
            },
            initial_usec_per_beat: usec_per_beat.max(1),
            sample_rate,
            remainder: 0,
        }
    }

    /// A clock that ignores tempo changes.
    pub fn fixed(ticks_per_second: u32, sample_rate: u32) -> Self {
        Self {
            mode: ClockMode::Fixed {
                ticks_per_second: ticks_per_second.max(1),
            },
            initial_usec_per_beat: DEFAULT_USEC_PER_BEAT,
            sample_rate,
            remainder: 0,
        }
    }

    /// Restores the initial tempo and drops the carried remainder.
    pub fn reset(&mut self) {
        if let ClockMode::Metrical { usec_per_beat, .. } = &mut self.mode {
            *usec_per_beat = self.initial_usec_per_beat;
        }
        self.remainder = 0;
    }

    /// Applies a tempo meta event. Ignored by fixed-rate clocks.
    pub fn set_tempo(&mut self, usec: u32) {
        if let ClockMode::Metrical { usec_per_beat, .. } = &mut self.mode {
            if usec > 0 {
                *usec_per_beat = usec;
            }
        }
    }

    /// Current tempo, if the clock is metrical.
    pub fn tempo(&self) -> Option<u32> {
        match self.mode {
            ClockMode::Metrical { usec_per_beat, .. } => Some(usec_per_beat),
            ClockMode::Fixed { .. } => None,
        }
    }

    /// Changes the sample rate. Later conversions use the new rate.
    pub fn set_sample_rate(&mut self, sample_rate: u32) {
        if sample_rate != self.sample_rate {
            self.sample_rate = sample_rate;
            self.remainder = 0;
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Converts `ticks` to samples, saturating at `u32::MAX`.
    pub fn ticks_to_samples(&mut self, ticks: u32) -> u32 {
        let (scale, denominator) = match self.mode {
            ClockMode::Metrical {
                ticks_per_beat,
                usec_per_beat,
            } => (
                usec_per_beat as u128 * self.sample_rate as u128,
                ticks_per_beat as u128 * 1_000_000,
            ),
            ClockMode::Fixed { ticks_per_second } => {
                (self.sample_rate as u128, ticks_per_second as u128)
            }
        };

        let numerator = ticks as u128 * scale + self.remainder;
        self.remainder = numerator % denominator;
        u32::try_from(numerator / denominator).unwrap_or(u32::MAX)
    }
}
