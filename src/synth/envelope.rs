//! ADSR envelope for synth voices.
//!
//! Exponential (RC-style) segments. Each segment reaches ~99.3% of its target in
//! the configured time.

/// Envelope stages.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum EnvelopeStage {
    /// Output is zero; the voice can be reused.
    Idle,
    /// Rising toward 1.
    Attack,
    /// Falling toward the sustain level.
    Decay,
    /// Holding the sustain level while the key is down.
    Sustain,
    /// Falling toward 0 after key release.
    Release,
}

/// Segment times in seconds and the sustain level (0-1).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct AdsrShape {
    pub attack: f32,
    pub decay: f32,
    pub sustain: f32,
    pub release: f32,
}

impl AdsrShape {
    pub const fn new(attack: f32, decay: f32, sustain: f32, release: f32) -> Self {
        Self {
            attack,
            decay,
            sustain,
            release,
        }
    }
}

/// Per-voice envelope generator.
#[derive(Clone, Debug)]
pub struct Envelope {
    stage: EnvelopeStage,
    level: f32,
    sustain: f32,
    attack_coeff: f32,
    decay_coeff: f32,
    release_coeff: f32,
}

impl Envelope {
    /// Below this the envelope is considered finished.
    const LEVEL_THRESHOLD: f32 = 0.0001;

    /// Creates an idle envelope with coefficients for `sample_rate`.
    pub fn new(shape: AdsrShape, sample_rate: f32) -> Self {
        Self {
            stage: EnvelopeStage::Idle,
            level: 0.0,
            sustain: shape.sustain.clamp(0.0, 1.0),
            attack_coeff: Self::coeff(shape.attack, sample_rate),
            decay_coeff: Self::coeff(shape.decay, sample_rate),
            release_coeff: Self::coeff(shape.release, sample_rate),
        }
    }

    /// `exp(-5 / samples)`, or 0 for segments shorter than one sample.
    #[inline]
    fn coeff(time_seconds: f32, sample_rate: f32) -> f32 {
        let samples = time_seconds * sample_rate;
        if samples <= 1.0 {
            0.0
        } else {
            (-5.0_f32 / samples).exp()
        }
    }

    /// Starts (or restarts) the attack from the current level.
    pub fn gate_on(&mut self) {
        self.stage = EnvelopeStage::Attack;
    }

    /// Moves to release unless already idle.
    pub fn gate_off(&mut self) {
        if self.stage != EnvelopeStage::Idle {
            self.stage = EnvelopeStage::Release;
        }
    }

    /// Silences immediately.
    pub fn kill(&mut self) {
        self.stage = EnvelopeStage::Idle;
        self.level = 0.0;
    }

    pub fn stage(&self) -> EnvelopeStage {
        self.stage
    }

    pub fn level(&self) -> f32 {
        self.level
    }

    pub fn is_active(&self) -> bool {
        self.stage != EnvelopeStage::Idle
    }

    /// Advances one sample and returns the new level.
    #[inline]
    pub fn next(&mut self) -> f32 {
        match self.stage {
            EnvelopeStage::Idle => {}
            EnvelopeStage::Attack => {
                self.level = 1.0 - (1.0 - self.level) * self.attack_coeff;
                if self.level >= 1.0 - Self::LEVEL_THRESHOLD {
                    self.level = 1.0;
                    self.stage = EnvelopeStage::Decay;
                }
            }
            EnvelopeStage::Decay => {
                self.level = self.sustain + (self.level - self.sustain) * self.decay_coeff;
                if (self.level - self.sustain).abs() < Self::LEVEL_THRESHOLD {
                    self.level = self.sustain;
                    self.stage = if self.sustain > 0.0 {
                        EnvelopeStage::Sustain
                    } else {
                        EnvelopeStage::Idle
                    };
                }
            }
            EnvelopeStage::Sustain => {
                self.level = self.sustain;
            }
            EnvelopeStage::Release => {
                self.level *= self.release_coeff;
                if self.level < Self::LEVEL_THRESHOLD {
                    self.level = 0.0;
                    self.stage = EnvelopeStage::Idle;
                }
            }
        }
        self.level
    }
}
