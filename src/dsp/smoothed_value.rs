//! Smoothed gain for click-free volume changes.
//!
//! A one-pole lowpass on the gain value: changes requested between blocks glide
//! in over a few milliseconds instead of stepping.

/// A value that approaches its target exponentially.
#[derive(Clone, Debug)]
pub struct SmoothedValue {
    current: f32,
    target: f32,
    /// Per-sample decay of the distance to the target. 0 = jump immediately.
    factor: f32,
}

impl SmoothedValue {
    /// Time to cover ~63% of a change.
    pub const DEFAULT_TIME_CONSTANT_MS: f32 = 10.0;

    /// Snap threshold.
    const EPSILON: f32 = 1e-4;

    pub fn new(initial: f32, time_constant_ms: f32, sample_rate: f32) -> Self {
        Self {
            current: initial,
            target: initial,
            factor: Self::factor_for(time_constant_ms, sample_rate),
        }
    }

    fn factor_for(time_constant_ms: f32, sample_rate: f32) -> f32 {
        let samples = time_constant_ms * 0.001 * sample_rate;
        if samples < 1.0 {
            0.0
        } else {
            (-1.0 / samples).exp()
        }
    }

    #[inline]
    pub fn set_target(&mut self, value: f32) {
        self.target = value;
    }

    #[cfg(test)]
    fn current(&self) -> f32 {
        self.current
    }

    /// Jumps to `value` with no glide.
    #[cfg(test)]
    fn set_immediate(&mut self, value: f32) {
        self.current = value;
        self.target = value;
    }

    #[inline]
    pub fn is_smoothing(&self) -> bool {
        (self.current - self.target).abs() > Self::EPSILON
    }

    /// Advances one sample.
    #[inline]
    pub fn next(&mut self) -> f32 {
        let diff = self.current - self.target;
        self.current = if diff.abs() <= Self::EPSILON {
            self.target
        } else {
            self.target + self.factor * diff
        };
        self.current
    }

    /// Multiplies an interleaved buffer by the gain, advancing once per frame.
    pub fn apply(&mut self, buffer: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        if !self.is_smoothing() {
            let gain = self.target;
            self.current = gain;
            if gain != 1.0 {
                buffer.iter_mut().for_each(|s| *s *= gain);
            }
            return;
        }
        for frame in buffer.chunks_mut(channels) {
            let gain = self.next();
            frame.iter_mut().for_each(|s| *s *= gain);
        }
    }
}

impl Default for SmoothedValue {
    fn default() -> Self {
        Self::new(1.0, Self::DEFAULT_TIME_CONSTANT_MS, 50_000.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_glide_is_gradual() {
        let mut gain = SmoothedValue::new(0.0, 10.0, 50_000.0);
        gain.set_target(1.0);
        let a = gain.next();
        let b = gain.next();
        assert!(a > 0.0 && b > a && b < 0.5);
    }

    #[test]
    fn test_reaches_target() {
        let mut gain = SmoothedValue::new(1.0, 10.0, 50_000.0);
        gain.set_target(0.25);
        for _ in 0..5_000 {
            gain.next();
        }
        assert!(!gain.is_smoothing());
        assert_eq!(gain.current(), 0.25);
    }

    #[test]
    fn test_one_time_constant_is_63_percent() {
        let mut gain = SmoothedValue::new(0.0, 10.0, 50_000.0);
        gain.set_target(1.0);
        for _ in 0..500 {
            gain.next();
        }
        assert!((gain.current() - 0.632).abs() < 0.05);
    }

    #[test]
    fn test_apply_settled_gain() {
        let mut gain = SmoothedValue::default();
        gain.set_immediate(0.5);
        let mut buffer = vec![1.0f32, -1.0, 0.5, -0.5];
        gain.apply(&mut buffer, 2);
        assert_eq!(buffer, vec![0.5, -0.5, 0.25, -0.25]);
    }

    #[test]
    fn test_apply_steps_per_frame() {
        let mut gain = SmoothedValue::new(0.0, 1.0, 50_000.0);
        gain.set_target(1.0);
        let mut buffer = vec![1.0f32; 8];
        gain.apply(&mut buffer, 2);
        assert_eq!(buffer[0], buffer[1]);
        assert!(buffer[2] > buffer[0]);
    }

    #[test]
    fn test_zero_time_constant_jumps() {
        let mut gain = SmoothedValue::new(0.0, 0.0, 50_000.0);
        gain.set_target(1.0);
        assert_eq!(gain.next(), 1.0);
    }
}
