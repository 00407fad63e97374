//! Cascaded biquad filter driven by pitch-domain parameters.
//!
//! Coefficients follow the Audio EQ Cookbook. Up to five identical stages can
//! be chained; each stage gets `q^(1/stages)` so the overall resonance stays
//! comparable.

use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

use crate::traits::FilterState;

pub const MAX_FILTER_STAGES: u8 = 5;

/// `log2(1000)`, so that pitch 0 sits at 1 kHz.
const PITCH_TO_HZ_OFFSET: f32 = 9.965_784;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum FilterKind {
    #[default]
    Lowpass,
    Highpass,
    Bandpass,
    Notch,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FilterParams {
    pub kind: FilterKind,
    /// 0..=127, 64 is 1 kHz.
    pub freq: f32,
    /// 0..=127
    pub q: f32,
    /// 0..=127, 64 disables key tracking.
    pub freq_tracking: f32,
    /// 1..=5
    pub stages: u8,
    /// Octaves of cutoff shift at full velocity, 0..=127.
    pub velocity_scale: f32,
    /// 0..=127, 64 is linear.
    pub velocity_sense: f32,
}

impl Default for FilterParams {
    fn default() -> Self {
        Self {
            kind: FilterKind::Lowpass,
            freq: 94.0,
            q: 40.0,
            freq_tracking: 64.0,
            stages: 1,
            velocity_scale: 0.0,
            velocity_sense: 64.0,
        }
    }
}

impl FilterParams {
    pub fn new(kind: FilterKind, freq: f32, q: f32) -> Self {
        Self {
            kind,
            freq,
            q,
            ..Default::default()
        }
    }

    /// Centre of the filter in octaves relative to 1 kHz.
    pub fn center_pitch(&self) -> f32 {
        (self.freq / 64.0 - 1.0) * 5.0
    }

    pub fn q_factor(&self) -> f32 {
        ((self.q / 127.0).powi(2) * 1000f32.ln()).exp() - 0.9
    }

    /// Octave offset that follows the played note.
    pub fn tracking(&self, note_freq: f32) -> f32 {
        (note_freq.max(1.0) / 440.0).log2() * (self.freq_tracking - 64.0) / 64.0
    }

    /// Octave offset from velocity.
    pub fn velocity_offset(&self, velocity_factor: f32) -> f32 {
        (velocity_factor - 1.0) * self.velocity_scale / 127.0 * 6.0
    }

    /// Pitch in octaves around 1 kHz to Hz.
    #[inline]
    pub fn real_freq(pitch: f32) -> f32 {
        (pitch + PITCH_TO_HZ_OFFSET).exp2()
    }

    /// Clamp everything into range. Returns true if anything changed.
    pub fn sanitize(&mut self) -> bool {
        let before = *self;
        let clamp = |v: f32| if v.is_finite() { v.clamp(0.0, 127.0) } else { 64.0 };
        self.freq = clamp(self.freq);
        self.q = clamp(self.q);
        self.freq_tracking = clamp(self.freq_tracking);
        self.velocity_scale = clamp(self.velocity_scale);
        self.velocity_sense = clamp(self.velocity_sense);
        self.stages = self.stages.clamp(1, MAX_FILTER_STAGES);
        before != *self
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct BiquadCoeffs {
    b0: f32,
    b1: f32,
    b2: f32,
    a1: f32,
    a2: f32,
}

impl BiquadCoeffs {
    fn design(kind: FilterKind, freq: f32, q: f32, sample_rate: f32) -> Self {
        let q = q.max(0.01);
        let freq = freq.clamp(1.0, sample_rate * 0.499);
        let omega = 2.0 * PI * freq / sample_rate;
        let (sin_w, cos_w) = omega.sin_cos();
        let alpha = sin_w / (2.0 * q);

        let (b0, b1, b2) = match kind {
            FilterKind::Lowpass => ((1.0 - cos_w) / 2.0, 1.0 - cos_w, (1.0 - cos_w) / 2.0),
            FilterKind::Highpass => ((1.0 + cos_w) / 2.0, -(1.0 + cos_w), (1.0 + cos_w) / 2.0),
            FilterKind::Bandpass => (alpha, 0.0, -alpha),
            FilterKind::Notch => (1.0, -2.0 * cos_w, 1.0),
        };
        let a0 = 1.0 + alpha;
        Self {
            b0: b0 / a0,
            b1: b1 / a0,
            b2: b2 / a0,
            a1: -2.0 * cos_w / a0,
            a2: (1.0 - alpha) / a0,
        }
    }
}

#[derive(Debug, Clone, Copy, Default)]
struct StageState {
    x1: f32,
    x2: f32,
    y1: f32,
    y2: f32,
}

/// Running filter instance.
#[derive(Debug, Clone)]
pub struct Biquad {
    kind: FilterKind,
    sample_rate: f32,
    stages: usize,
    freq: f32,
    q: f32,
    coeffs: BiquadCoeffs,
    state: [StageState; MAX_FILTER_STAGES as usize],
}

impl Biquad {
    pub fn new(params: &FilterParams, sample_rate: f32) -> Self {
        let stages = params.stages.clamp(1, MAX_FILTER_STAGES) as usize;
        let freq = FilterParams::real_freq(params.center_pitch());
        let q = params.q_factor();
        let mut filter = Self {
            kind: params.kind,
            sample_rate,
            stages,
            freq,
            q,
            coeffs: BiquadCoeffs::default(),
            state: [StageState::default(); MAX_FILTER_STAGES as usize],
        };
        filter.recompute();
        filter
    }

    pub fn boxed(params: &FilterParams, sample_rate: f32) -> Box<dyn FilterState> {
        Box::new(Self::new(params, sample_rate))
    }

    pub fn freq(&self) -> f32 {
        self.freq
    }

    fn recompute(&mut self) {
        let stage_q = self.q.max(0.0).powf(1.0 / self.stages as f32);
        self.coeffs = BiquadCoeffs::design(self.kind, self.freq, stage_q, self.sample_rate);
    }
}

impl FilterState for Biquad {
    fn set_freq_and_q(&mut self, freq: f32, q: f32) {
        if freq == self.freq && q == self.q {
            return;
        }
        self.freq = freq;
        self.q = q;
        self.recompute();
    }

    fn process(&mut self, buffer: &mut [f32]) {
        let c = self.coeffs;
        for stage in &mut self.state[..self.stages] {
            for sample in buffer.iter_mut() {
                let x = *sample;
                let y = c.b0 * x + c.b1 * stage.x1 + c.b2 * stage.x2 - c.a1 * stage.y1 - c.a2 * stage.y2;
                stage.x2 = stage.x1;
                stage.x1 = x;
                stage.y2 = stage.y1;
                stage.y1 = y;
                *sample = y;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn sine(freq: f32, sample_rate: f32, len: usize) -> Vec<f32> {
        (0..len)
            .map(|i| (2.0 * PI * freq * i as f32 / sample_rate).sin())
            .collect()
    }

    fn rms(buffer: &[f32]) -> f32 {
        (buffer.iter().map(|s| s * s).sum::<f32>() / buffer.len() as f32).sqrt()
    }

    #[test]
    fn test_pitch_mapping() {
        let params = FilterParams::new(FilterKind::Lowpass, 64.0, 0.0);
        assert_relative_eq!(params.center_pitch(), 0.0);
        assert_relative_eq!(FilterParams::real_freq(0.0), 1000.0, epsilon = 0.1);
        assert_relative_eq!(FilterParams::real_freq(1.0), 2000.0, epsilon = 0.2);
    }

    #[test]
    fn test_tracking_is_zero_at_center() {
        let params = FilterParams::default();
        assert_relative_eq!(params.tracking(880.0), 0.0);

        let tracked = FilterParams {
            freq_tracking: 128.0,
            ..Default::default()
        };
        assert_relative_eq!(tracked.tracking(880.0), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn test_lowpass_attenuates_high_frequencies() {
        let sr = 48000.0;
        let mut filter = Biquad::new(&FilterParams::new(FilterKind::Lowpass, 64.0, 20.0), sr);
        filter.set_freq_and_q(500.0, 0.707);

        let mut low = sine(100.0, sr, 4800);
        let mut high = sine(8000.0, sr, 4800);
        filter.process(&mut low);
        let mut filter2 = filter.clone();
        filter2.state = [StageState::default(); MAX_FILTER_STAGES as usize];
        filter2.process(&mut high);

        assert!(rms(&low[2400..]) > 0.6);
        assert!(rms(&high[2400..]) < 0.05);
    }

    #[test]
    fn test_stages_steepen_rolloff() {
        let sr = 48000.0;
        let one = FilterParams::new(FilterKind::Lowpass, 64.0, 20.0);
        let three = FilterParams { stages: 3, ..one };
        let mut a = Biquad::new(&one, sr);
        let mut b = Biquad::new(&three, sr);

        let mut x = sine(6000.0, sr, 4800);
        let mut y = x.clone();
        a.process(&mut x);
        b.process(&mut y);
        assert!(rms(&y[2400..]) < rms(&x[2400..]));
    }

    #[test]
    fn test_sanitize() {
        let mut params = FilterParams {
            stages: 0,
            q: 300.0,
            freq: f32::NAN,
            ..Default::default()
        };
        assert!(params.sanitize());
        assert_eq!(params.stages, 1);
        assert_eq!(params.q, 127.0);
        assert_eq!(params.freq, 64.0);
    }
}
