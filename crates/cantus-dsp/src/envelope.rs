//! Point envelope with sustain, forced release and pitch stretch.

use serde::{Deserialize, Serialize};

use crate::traits::EnvelopeGenerator;
use crate::Timing;

pub const MAX_ENVELOPE_POINTS: usize = 40;

/// Floor of the dB amplitude envelope.
pub const MIN_ENVELOPE_DB: f32 = -40.0;

#[inline]
pub fn db_to_gain(db: f32) -> f32 {
    (db * std::f32::consts::LN_10 / 20.0).exp()
}

#[inline]
pub fn gain_to_db(gain: f32) -> f32 {
    20.0 * gain.log10()
}

/// How raw point values (0..=127) are read.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum EnvelopeMode {
    /// Linear gain, `v / 127`.
    #[default]
    AmplitudeLinear,
    /// Gain in dB down to [`MIN_ENVELOPE_DB`].
    AmplitudeDb,
    /// Pitch offset in cents.
    Frequency,
    /// Filter offset in octaves.
    Filter,
    Bandwidth,
}

impl EnvelopeMode {
    /// Map a raw point value into this mode's unit.
    pub fn convert(self, raw: f32) -> f32 {
        match self {
            EnvelopeMode::AmplitudeLinear => raw / 127.0,
            EnvelopeMode::AmplitudeDb => (1.0 - raw / 127.0) * MIN_ENVELOPE_DB,
            EnvelopeMode::Frequency => {
                let cents = ((6.0 * (raw - 64.0).abs() / 64.0).exp2() - 1.0) * 100.0;
                if raw < 64.0 {
                    -cents
                } else {
                    cents
                }
            }
            EnvelopeMode::Filter => (raw - 64.0) / 64.0 * 6.0,
            EnvelopeMode::Bandwidth => (raw - 64.0) / 64.0 * 10.0,
        }
    }

    /// Raw value that sits at the neutral point of the mode.
    pub fn neutral(self) -> f32 {
        match self {
            EnvelopeMode::AmplitudeLinear | EnvelopeMode::AmplitudeDb => 0.0,
            _ => 64.0,
        }
    }

    #[inline]
    fn is_amplitude(self) -> bool {
        matches!(self, EnvelopeMode::AmplitudeLinear | EnvelopeMode::AmplitudeDb)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EnvelopePoint {
    /// Time to reach this point from the previous one.
    pub dt_ms: f32,
    /// Raw value, 0..=127.
    pub value: f32,
}

impl EnvelopePoint {
    pub const fn new(dt_ms: f32, value: f32) -> Self {
        Self { dt_ms, value }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeParams {
    pub mode: EnvelopeMode,
    pub points: Vec<EnvelopePoint>,
    /// Point held while the key is down.
    pub sustain: Option<usize>,
    /// Jump straight to the point after sustain on release, from wherever the
    /// envelope currently is.
    pub forced_release: bool,
    /// 0..=127. Higher values shorten envelopes of higher notes.
    pub stretch: f32,
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self::adsr(EnvelopeMode::AmplitudeDb, 0.0, 0.0, 127.0, 25.0)
    }
}

impl EnvelopeParams {
    /// Four point amplitude envelope rising from silence and returning to it.
    pub fn adsr(mode: EnvelopeMode, attack_ms: f32, decay_ms: f32, sustain: f32, release_ms: f32) -> Self {
        Self {
            mode,
            points: vec![
                EnvelopePoint::new(0.0, 0.0),
                EnvelopePoint::new(attack_ms, 127.0),
                EnvelopePoint::new(decay_ms, sustain),
                EnvelopePoint::new(release_ms, 0.0),
            ],
            sustain: Some(2),
            forced_release: true,
            stretch: 0.0,
        }
    }

    /// Constant envelope that holds `value` until released.
    pub fn flat(mode: EnvelopeMode, value: f32) -> Self {
        Self {
            mode,
            points: vec![
                EnvelopePoint::new(0.0, value),
                EnvelopePoint::new(0.0, value),
                EnvelopePoint::new(0.0, value),
            ],
            sustain: Some(1),
            forced_release: false,
            stretch: 0.0,
        }
    }

    /// Three point pitch or filter sweep: start, attack target, release target.
    pub fn sweep(mode: EnvelopeMode, start: f32, attack_ms: f32, release_ms: f32, end: f32) -> Self {
        let neutral = mode.neutral();
        Self {
            mode,
            points: vec![
                EnvelopePoint::new(0.0, start),
                EnvelopePoint::new(attack_ms, neutral),
                EnvelopePoint::new(release_ms, end),
            ],
            sustain: Some(1),
            forced_release: false,
            stretch: 0.0,
        }
    }

    /// Clamp everything into range. Returns true if anything changed.
    pub fn sanitize(&mut self) -> bool {
        let mut changed = false;
        if self.points.len() < 2 {
            let mode = self.mode;
            *self = if mode.is_amplitude() {
                Self::adsr(mode, 0.0, 0.0, 127.0, 25.0)
            } else {
                Self::flat(mode, mode.neutral())
            };
            return true;
        }
        if self.points.len() > MAX_ENVELOPE_POINTS {
            self.points.truncate(MAX_ENVELOPE_POINTS);
            changed = true;
        }
        for point in &mut self.points {
            let value = if point.value.is_finite() { point.value.clamp(0.0, 127.0) } else { 0.0 };
            let dt = if point.dt_ms.is_finite() { point.dt_ms.max(0.0) } else { 0.0 };
            if value != point.value || dt != point.dt_ms {
                point.value = value;
                point.dt_ms = dt;
                changed = true;
            }
        }
        if let Some(s) = self.sustain {
            if s >= self.points.len() {
                self.sustain = None;
                changed = true;
            }
        }
        let stretch = if self.stretch.is_finite() { self.stretch.clamp(0.0, 127.0) } else { 0.0 };
        if stretch != self.stretch {
            self.stretch = stretch;
            changed = true;
        }
        changed
    }
}

/// Running envelope instance.
#[derive(Debug, Clone)]
pub struct Envelope {
    values: Vec<f32>,
    increments: Vec<f32>,
    sustain: Option<usize>,
    forced_release: bool,
    linear: bool,
    point: usize,
    released: bool,
    t: f32,
    inct: f32,
    last: f32,
    finished: bool,
}

impl Envelope {
    /// `base_freq` drives the stretch factor.
    pub fn new(params: &EnvelopeParams, base_freq: f32, timing: Timing) -> Self {
        let repaired;
        let params = if params.points.len() < 2 {
            let mut p = params.clone();
            p.sanitize();
            repaired = p;
            &repaired
        } else {
            params
        };

        let stretch = (440.0 / base_freq.max(1.0)).powf(params.stretch / 64.0);
        let block_dt = timing.block_duration();

        let values: Vec<f32> = params.points.iter().map(|p| params.mode.convert(p.value)).collect();
        let increments: Vec<f32> = params
            .points
            .iter()
            .enumerate()
            .map(|(i, p)| {
                if i == 0 {
                    return 1.0;
                }
                let seconds = p.dt_ms / 1000.0 * stretch;
                if seconds > block_dt {
                    block_dt / seconds
                } else {
                    2.0
                }
            })
            .collect();

        let inct = increments.get(1).copied().unwrap_or(2.0);
        let last = values.first().copied().unwrap_or(0.0);

        Self {
            values,
            increments,
            sustain: params.sustain,
            forced_release: params.forced_release,
            linear: params.mode != EnvelopeMode::AmplitudeDb,
            point: 1,
            released: false,
            t: 0.0,
            inct,
            last,
            finished: false,
        }
    }

    pub fn boxed(params: &EnvelopeParams, base_freq: f32, timing: Timing) -> Box<dyn EnvelopeGenerator> {
        Box::new(Self::new(params, base_freq, timing))
    }

    fn last_index(&self) -> usize {
        self.values.len() - 1
    }

    /// Move to `point`, finishing if it runs past the end.
    fn enter_point(&mut self, point: usize) {
        if point > self.last_index() {
            self.point = self.last_index();
            self.finished = true;
        } else {
            self.point = point;
        }
        self.t = 0.0;
        self.inct = self.increments[self.point];
    }

    fn advance(&mut self) -> f32 {
        if self.finished {
            self.last = self.values[self.last_index()];
            return self.last;
        }

        if let Some(s) = self.sustain {
            if self.point == s + 1 && !self.released {
                self.last = self.values[s];
                return self.last;
            }
        }

        if self.released && self.forced_release {
            let target = match self.sustain {
                Some(s) => (s + 1).min(self.last_index()),
                None => self.last_index(),
            };
            let out = if self.increments[target] >= 1.0 {
                self.values[target]
            } else {
                self.last + (self.values[target] - self.last) * self.t
            };
            self.t += self.increments[target];
            if self.t >= 1.0 {
                self.forced_release = false;
                match self.sustain {
                    Some(s) => self.enter_point(s + 2),
                    None => {
                        self.finished = true;
                        self.t = 0.0;
                    }
                }
            }
            return out;
        }

        let out = if self.inct >= 1.0 {
            self.values[self.point]
        } else {
            let prev = self.values[self.point - 1];
            prev + (self.values[self.point] - prev) * self.t
        };

        self.t += self.inct;
        if self.t >= 1.0 {
            if self.point >= self.last_index() {
                self.finished = true;
                self.t = 0.0;
            } else {
                self.enter_point(self.point + 1);
            }
        }
        self.last = out;
        out
    }

    fn advance_db(&mut self) -> f32 {
        if self.linear {
            return self.advance();
        }

        // The attack segment is interpolated in the linear domain so it rises
        // without the dB curve's long silent lead-in.
        if self.point == 1 && !(self.released && self.forced_release) && !self.finished {
            let from = db_to_gain(self.values[0]);
            let to = db_to_gain(self.values[1]);
            let mut out = from + (to - from) * self.t;

            self.t += self.inct;
            if self.t >= 1.0 {
                out = to;
                self.enter_point(2);
            }
            self.last = if out > 0.001 { gain_to_db(out) } else { MIN_ENVELOPE_DB };
            return out;
        }

        db_to_gain(self.advance())
    }
}

impl EnvelopeGenerator for Envelope {
    fn sample(&mut self) -> f32 {
        self.advance()
    }

    fn sample_amplitude(&mut self) -> f32 {
        self.advance_db()
    }

    fn release_key(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        if self.forced_release {
            self.t = 0.0;
        }
    }

    fn finished(&self) -> bool {
        self.finished
    }
}
