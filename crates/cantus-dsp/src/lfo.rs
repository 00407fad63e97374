//! Block-rate LFO with delay, amplitude randomness and frequency randomness.

use rand::{Rng, SeedableRng};
use rand_pcg::Pcg32;
use serde::{Deserialize, Serialize};

use crate::traits::LfoGenerator;
use crate::Timing;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LfoShape {
    #[default]
    Sine,
    Triangle,
    Square,
    RampUp,
    RampDown,
    ExpDown1,
    ExpDown2,
}

impl LfoShape {
    /// Bipolar output for a phase in `[0, 1)`.
    #[inline]
    pub fn evaluate(&self, phase: f32) -> f32 {
        match self {
            LfoShape::Sine => (phase * std::f32::consts::TAU).cos(),
            LfoShape::Triangle => {
                if phase < 0.25 {
                    4.0 * phase
                } else if phase < 0.75 {
                    2.0 - 4.0 * phase
                } else {
                    4.0 * phase - 4.0
                }
            }
            LfoShape::Square => {
                if phase < 0.5 {
                    -1.0
                } else {
                    1.0
                }
            }
            LfoShape::RampUp => (phase - 0.5) * 2.0,
            LfoShape::RampDown => (0.5 - phase) * 2.0,
            LfoShape::ExpDown1 => 0.05f32.powf(phase) * 2.0 - 1.0,
            LfoShape::ExpDown2 => 0.001f32.powf(phase) * 2.0 - 1.0,
        }
    }

    /// Shapes whose randomised amplitude is blended across the cycle.
    #[inline]
    fn is_smooth(&self) -> bool {
        matches!(self, LfoShape::Sine | LfoShape::Triangle)
    }
}

/// What the LFO output is scaled for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum LfoTarget {
    #[default]
    Amplitude,
    /// Output in cents.
    Frequency,
    /// Output in octaves.
    Filter,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LfoParams {
    pub shape: LfoShape,
    pub target: LfoTarget,
    /// 0.0..=1.0, mapped exponentially to roughly 0..85 Hz.
    pub freq: f32,
    /// 0..=127
    pub intensity: f32,
    /// 0 picks a random start phase; 64 starts at the top of the cycle.
    pub start_phase: u8,
    /// 0..=127
    pub amp_randomness: f32,
    /// 0..=127
    pub freq_randomness: f32,
    /// 0..=127, up to four seconds.
    pub delay: f32,
    /// 0..=127, 64 keeps the rate independent of pitch.
    pub stretch: f32,
}

impl Default for LfoParams {
    fn default() -> Self {
        Self {
            shape: LfoShape::Sine,
            target: LfoTarget::Amplitude,
            freq: 0.5,
            intensity: 0.0,
            start_phase: 64,
            amp_randomness: 0.0,
            freq_randomness: 0.0,
            delay: 0.0,
            stretch: 64.0,
        }
    }
}

impl LfoParams {
    pub fn new(shape: LfoShape, target: LfoTarget, freq: f32, intensity: f32) -> Self {
        Self {
            shape,
            target,
            freq,
            intensity,
            ..Default::default()
        }
    }

    /// Clamp everything into range. Returns true if anything changed.
    pub fn sanitize(&mut self) -> bool {
        let before = *self;
        let clamp = |v: f32, hi: f32| if v.is_finite() { v.clamp(0.0, hi) } else { 0.0 };
        self.freq = clamp(self.freq, 1.0);
        self.intensity = clamp(self.intensity, 127.0);
        self.amp_randomness = clamp(self.amp_randomness, 127.0);
        self.freq_randomness = clamp(self.freq_randomness, 127.0);
        self.delay = clamp(self.delay, 127.0);
        self.stretch = clamp(self.stretch, 127.0).max(1.0);
        self.start_phase = self.start_phase.min(127);
        before != *self
    }
}

/// Running LFO instance.
#[derive(Debug, Clone)]
pub struct Lfo {
    shape: LfoShape,
    x: f32,
    incx: f32,
    intensity: f32,
    amp_rnd: f32,
    amp1: f32,
    amp2: f32,
    freq_rnd: f32,
    incrnd: f32,
    next_incrnd: f32,
    delay: f32,
    block_duration: f32,
    rng: Pcg32,
}

impl Lfo {
    /// `seed` makes every random decision of this instance reproducible.
    pub fn new(params: &LfoParams, base_freq: f32, timing: Timing, seed: u64) -> Self {
        let mut rng = Pcg32::seed_from_u64(seed);

        let stretch = (base_freq.max(1.0) / 440.0).powf((params.stretch.max(1.0) - 64.0) / 63.0);
        let freq_hz = ((params.freq * 10.0).exp2() - 1.0) / 12.0 * stretch;
        let incx = (freq_hz.abs() * timing.block_duration()).min(0.499_999_99);

        let mut x = if params.start_phase == 0 {
            rng.gen::<f32>()
        } else {
            ((params.start_phase as f32 - 64.0) / 127.0 + 1.0).fract()
        };

        let intensity = match params.target {
            LfoTarget::Amplitude => params.intensity / 127.0,
            LfoTarget::Filter => params.intensity / 127.0 * 4.0,
            LfoTarget::Frequency => {
                // Pitch LFOs start a quarter cycle earlier.
                x -= 0.25;
                (params.intensity / 127.0 * 11.0).exp2() - 1.0
            }
        };

        let amp_rnd = (params.amp_randomness / 127.0).clamp(0.0, 1.0);
        let amp1 = (1.0 - amp_rnd) + amp_rnd * rng.gen::<f32>();
        let amp2 = (1.0 - amp_rnd) + amp_rnd * rng.gen::<f32>();

        let mut lfo = Self {
            shape: params.shape,
            x,
            incx,
            intensity,
            amp_rnd,
            amp1,
            amp2,
            freq_rnd: (params.freq_randomness / 127.0).powi(2) * 4.0,
            incrnd: 1.0,
            next_incrnd: 1.0,
            delay: params.delay / 127.0 * 4.0,
            block_duration: timing.block_duration(),
            rng,
        };
        // Twice so both the current and next increments are random.
        lfo.roll_freq_randomness();
        lfo.roll_freq_randomness();
        lfo
    }

    pub fn boxed(params: &LfoParams, base_freq: f32, timing: Timing, seed: u64) -> Box<dyn LfoGenerator> {
        Box::new(Self::new(params, base_freq, timing, seed))
    }

    fn roll_freq_randomness(&mut self) {
        if self.freq_rnd == 0.0 {
            return;
        }
        self.incrnd = self.next_incrnd;
        self.next_incrnd =
            0.5f32.powf(self.freq_rnd) + self.rng.gen::<f32>() * (self.freq_rnd.exp2() - 1.0);
    }

    fn phase(&self) -> f32 {
        self.x.rem_euclid(1.0)
    }

    fn advance(&mut self) -> f32 {
        let x = self.phase();
        let mut out = self.shape.evaluate(x);
        if self.shape.is_smooth() {
            out *= self.intensity * (self.amp1 + x * (self.amp2 - self.amp1));
        } else {
            out *= self.intensity * self.amp2;
        }

        if self.delay < 0.000_01 {
            if self.freq_rnd == 0.0 {
                self.x += self.incx;
            } else {
                let scale = (self.incrnd * (1.0 - x) + self.next_incrnd * x).min(1.0);
                self.x += self.incx * scale;
            }
            if self.x >= 1.0 {
                self.x = self.x.rem_euclid(1.0);
                self.amp1 = self.amp2;
                self.amp2 = (1.0 - self.amp_rnd) + self.amp_rnd * self.rng.gen::<f32>();
                self.roll_freq_randomness();
            }
        } else {
            self.delay -= self.block_duration;
        }
        out
    }
}

impl LfoGenerator for Lfo {
    fn sample(&mut self) -> f32 {
        self.advance()
    }

    fn sample_amplitude(&mut self) -> f32 {
        (1.0 - self.intensity + self.advance()).clamp(-1.0, 1.0)
    }
}
