//! Carrier modulation schemes.
//!
//! A voice's modulation kind is fixed at note-on and carried as a
//! [`Modulation`] variant holding exactly the state that kind needs. The
//! per-sample arithmetic lives in free functions over block slices so the
//! voice can chain them without caring where the modulator signal came from.
//!
//! Phase-domain offsets are expressed in cycles throughout: `1.0` moves the
//! read position by one full table, whatever the table length.

use cantus_dsp::{EnvelopeGenerator, OscillatorTable};

use crate::math::{above_amplitude_threshold, interpolate_amplitude, FM_AMP_MULTIPLIER};
use crate::params::ModulationKind;
use crate::phase::{Phase, PhaseStep};
use crate::voice::VoiceSlot;

/// Phase offset in cycles per unit of phase-modulator output.
pub const PHASE_MOD_NORMALIZE: f32 = 1.0 / 262_144.0;

/// Frequency-modulation phase accumulators are folded back by whole
/// multiples of this many cycles to keep their precision.
pub const FM_PHASE_FOLD: f32 = 256.0;

/// Below this many table steps per sample the integrator returns the point
/// value instead of dividing by a vanishing interval.
const MIN_REPLAY_DELTA: f32 = 1e-3;

/// Phase accumulated per sample, in cycles, per unit of frequency-modulator
/// output. Scaled so a given setting sounds alike at every sample rate.
#[inline]
pub fn freq_mod_normalize(sample_rate: f32) -> f32 {
    PHASE_MOD_NORMALIZE * 44_100.0 / sample_rate
}

/// Modulator depth for `kind`, before the controller and envelope.
///
/// `volume` and `damp` are 0..=127, `base_freq` is the voice's detuned base
/// frequency and `velocity_factor` the already-curved velocity response.
pub fn modulator_volume(
    kind: ModulationKind,
    volume: f32,
    damp: f32,
    base_freq: f32,
    velocity_factor: f32,
) -> f32 {
    let ratio = 440.0 / base_freq.max(1.0);
    let exponential = ((volume / 127.0 * FM_AMP_MULTIPLIER).exp() - 1.0) * 4.0;
    let depth = match kind {
        ModulationKind::None => 0.0,
        ModulationKind::Phase | ModulationKind::PulseWidth => exponential * ratio.powf(damp / 64.0),
        ModulationKind::Frequency => exponential * ratio.powf(damp / 64.0 - 1.0),
        ModulationKind::Morph | ModulationKind::Ring | ModulationKind::RingToSide => {
            volume / 127.0 * ratio.powf(damp / 64.0 - 1.0).min(1.0)
        }
    };
    depth * velocity_factor
}

/// Modulator depth at the start and end of the current block.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct Depth {
    pub old: f32,
    pub new: f32,
}

impl Depth {
    pub fn new(value: f32) -> Self {
        Self { old: value, new: value }
    }

    /// Start a new block ending at `value`.
    #[inline]
    pub fn push(&mut self, value: f32) {
        self.old = self.new;
        self.new = value;
    }

    /// Both ends clamped to 1, for the amplitude-domain schemes.
    #[inline]
    pub fn clamped(self) -> Self {
        Self {
            old: self.old.min(1.0),
            new: self.new.min(1.0),
        }
    }

    #[inline]
    pub fn at(&self, i: usize, size: usize) -> f32 {
        interpolate_amplitude(self.old, self.new, i, size)
    }
}

/// Position of a table oscillator, readable either point-wise or as the mean
/// over each sample's phase interval.
///
/// The mean is found by replaying the table: the cursor walks from its last
/// position to the new one a table step at a time, summing the trapezoids of
/// the linearly interpolated waveform and skipping whole cycles with the
/// table's cycle sum. Dividing the area by the distance walked gives the
/// average value the oscillator took over the sample. Feeding those averages
/// into a frequency-modulation accumulator reproduces the phase the
/// modulator would have produced at any resolution, even when the
/// modulator's own position is being pushed around by a further modulator.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ReplayCursor {
    phase: Phase,
    last_offset: f32,
}

impl ReplayCursor {
    pub fn new(phase: Phase) -> Self {
        Self {
            phase,
            last_offset: 0.0,
        }
    }

    #[inline]
    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// Read at the current position moved by `offset` cycles, then advance.
    #[inline]
    pub fn sample(&mut self, table: &OscillatorTable, step: PhaseStep, offset: f32) -> f32 {
        let len = table.len();
        let at = self.phase.offset_cycles(offset, len);
        let value = table.lerp(at.hi, at.lo);
        self.phase.advance(step, len);
        value
    }

    /// Mean table value over this sample's interval.
    ///
    /// Here the cursor tracks the effective position, offset included, so the
    /// interval spans `step` plus however far `offset` moved since the last
    /// sample.
    pub fn integrate(&mut self, table: &OscillatorTable, step: PhaseStep, offset: f32) -> f32 {
        let len = table.len();
        let len_f = len as f32;

        let mut moved = offset - self.last_offset;
        moved -= FM_PHASE_FOLD * (moved / FM_PHASE_FOLD).round();
        self.last_offset = offset;

        let delta = step.steps() + moved * len_f;
        if !delta.is_finite() {
            return table.lerp(self.phase.hi, self.phase.lo);
        }
        if delta.abs() < MIN_REPLAY_DELTA {
            let value = table.lerp(self.phase.hi, self.phase.lo);
            self.phase = self.phase.offset(delta, len);
            return value;
        }

        let cycles = (delta / len_f).trunc();
        let rest = delta - cycles * len_f;
        let mut area = cycles * table.cycle_sum() - partial_area(table, self.phase.hi, self.phase.lo);

        let target = self.phase.lo + rest;
        let whole = target.floor();
        let mut lo = target - whole;
        let mut hi = self.phase.hi;
        let walk = whole as i64;
        if walk >= 0 {
            for _ in 0..walk {
                area += segment_area(table, hi);
                hi = if hi + 1 == len { 0 } else { hi + 1 };
            }
        } else {
            for _ in 0..(-walk) {
                hi = if hi == 0 { len - 1 } else { hi - 1 };
                area -= segment_area(table, hi);
            }
        }
        if lo >= 1.0 {
            lo = 0.0;
            area += segment_area(table, hi);
            hi = if hi + 1 == len { 0 } else { hi + 1 };
        }
        area += partial_area(table, hi, lo);
        self.phase = Phase { hi, lo };

        area / delta
    }
}

/// Area under the interpolated waveform between steps `hi` and `hi + 1`.
#[inline]
fn segment_area(table: &OscillatorTable, hi: usize) -> f32 {
    let samples = table.samples();
    0.5 * (samples[hi] + samples[hi + 1])
}

/// Area from step `hi` to `hi + lo`.
#[inline]
fn partial_area(table: &OscillatorTable, hi: usize, lo: f32) -> f32 {
    let samples = table.samples();
    let a = samples[hi];
    let b = samples[hi + 1];
    a * lo + (b - a) * lo * lo * 0.5
}

/// Where a modulator's signal comes from.
#[derive(Clone)]
pub enum ModSource {
    /// A table oscillator per modulator copy.
    Table {
        table: OscillatorTable,
        cursors: Vec<ReplayCursor>,
    },
    /// A lower voice rendered live, one per modulator copy.
    Voice(Vec<VoiceSlot>),
}

/// State shared by every modulated kind.
#[derive(Clone)]
pub struct Modulator {
    pub source: ModSource,
    pub freq_envelope: Option<Box<dyn EnvelopeGenerator>>,
    pub amp_envelope: Option<Box<dyn EnvelopeGenerator>>,
    /// Depth from volume, damping and velocity.
    pub volume: f32,
    pub detune_cents: f32,
    pub depth: Depth,
    /// Per-copy phase increments at the modulator frequency.
    pub steps: Vec<PhaseStep>,
    /// Per-copy modulator frequencies, handed to live sources.
    pub freqs: Vec<f32>,
}

impl Modulator {
    pub fn copies(&self) -> usize {
        self.steps.len()
    }

    pub fn release_key(&mut self) {
        if let Some(env) = self.freq_envelope.as_mut() {
            env.release_key();
        }
        if let Some(env) = self.amp_envelope.as_mut() {
            env.release_key();
        }
        if let ModSource::Voice(subs) = &mut self.source {
            for sub in subs {
                sub.release_key();
            }
        }
    }
}

/// Runtime modulation state of one voice.
#[derive(Clone)]
pub enum Modulation {
    None,
    Morph(Modulator),
    Ring(Modulator),
    RingToSide(Modulator),
    Phase(Modulator),
    /// Accumulated modulator phase per copy, in cycles.
    Frequency {
        modulator: Modulator,
        accumulated: Vec<f32>,
    },
    PulseWidth(Modulator),
}

impl Modulation {
    pub fn kind(&self) -> ModulationKind {
        match self {
            Modulation::None => ModulationKind::None,
            Modulation::Morph(_) => ModulationKind::Morph,
            Modulation::Ring(_) => ModulationKind::Ring,
            Modulation::RingToSide(_) => ModulationKind::RingToSide,
            Modulation::Phase(_) => ModulationKind::Phase,
            Modulation::Frequency { .. } => ModulationKind::Frequency,
            Modulation::PulseWidth(_) => ModulationKind::PulseWidth,
        }
    }

    pub fn modulator(&self) -> Option<&Modulator> {
        match self {
            Modulation::None => None,
            Modulation::Morph(m)
            | Modulation::Ring(m)
            | Modulation::RingToSide(m)
            | Modulation::Phase(m)
            | Modulation::PulseWidth(m) => Some(m),
            Modulation::Frequency { modulator, .. } => Some(modulator),
        }
    }

    pub fn modulator_mut(&mut self) -> Option<&mut Modulator> {
        match self {
            Modulation::None => None,
            Modulation::Morph(m)
            | Modulation::Ring(m)
            | Modulation::RingToSide(m)
            | Modulation::Phase(m)
            | Modulation::PulseWidth(m) => Some(m),
            Modulation::Frequency { modulator, .. } => Some(modulator),
        }
    }

    /// Whether the modulator is read as per-sample means.
    #[inline]
    pub fn integrates(&self) -> bool {
        matches!(self, Modulation::Frequency { .. })
    }
}

/// `carrier = carrier * (1 - a) + modulator * a`
pub fn morph(carrier: &mut [f32], modulator: &[f32], depth: Depth) {
    let depth = depth.clamped();
    let size = carrier.len();
    for (i, (c, &m)) in carrier.iter_mut().zip(modulator).enumerate() {
        let amp = depth.at(i, size);
        *c = *c * (1.0 - amp) + m * amp;
    }
}

/// `carrier = carrier * (modulator * a + 1 - a)`
pub fn ring(carrier: &mut [f32], modulator: &[f32], depth: Depth) {
    let depth = depth.clamped();
    let size = carrier.len();
    for (i, (c, &m)) in carrier.iter_mut().zip(modulator).enumerate() {
        let amp = depth.at(i, size);
        *c *= m * amp + (1.0 - amp);
    }
}

/// Ring modulation without the dry carrier, doubled.
pub fn ring_to_side(carrier: &mut [f32], modulator: &[f32], depth: Depth) {
    let depth = depth.clamped();
    let size = carrier.len();
    for (i, (c, &m)) in carrier.iter_mut().zip(modulator).enumerate() {
        *c *= m * depth.at(i, size) * 2.0;
    }
}

/// Scale a modulator block by its depth, ramped when the change is audible.
pub fn apply_depth(modulator: &mut [f32], depth: Depth) {
    if above_amplitude_threshold(depth.old, depth.new) {
        let size = modulator.len();
        for (i, m) in modulator.iter_mut().enumerate() {
            *m *= depth.at(i, size);
        }
    } else {
        for m in modulator.iter_mut() {
            *m *= depth.new;
        }
    }
}

/// Turn a depth-scaled phase modulator into offsets in cycles.
pub fn phase_offsets(modulator: &mut [f32]) {
    for m in modulator.iter_mut() {
        *m *= PHASE_MOD_NORMALIZE;
    }
}

/// Integrate a depth-scaled frequency modulator into the running phase,
/// leaving the phase after each sample in place of the modulator.
pub fn frequency_offsets(modulator: &mut [f32], accumulated: &mut f32, normalize: f32) {
    let mut phase = *accumulated;
    for m in modulator.iter_mut() {
        phase += *m * normalize;
        if phase.abs() >= FM_PHASE_FOLD {
            phase -= FM_PHASE_FOLD * (phase / FM_PHASE_FOLD).trunc();
        }
        *m = phase;
    }
    *accumulated = phase;
}
