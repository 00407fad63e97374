//! Precomputed single-cycle oscillator tables.

use std::f32::consts::TAU;
use std::fmt;
use std::sync::Arc;

use crate::{Error, Result};

/// Samples appended past the nominal length, repeating the start of the cycle,
/// so interpolation at `len - 1` never has to wrap.
pub const GUARD_SAMPLES: usize = 5;

/// Immutable single-cycle waveform shared between notes.
///
/// Cloning shares the sample storage.
#[derive(Clone)]
pub struct OscillatorTable {
    samples: Arc<[f32]>,
    len: usize,
    cycle_sum: f32,
}

impl OscillatorTable {
    /// Build from one cycle of samples.
    pub fn new(cycle: &[f32]) -> Result<Self> {
        if cycle.is_empty() {
            return Err(Error::EmptyTable);
        }
        if let Some(index) = cycle.iter().position(|s| !s.is_finite()) {
            return Err(Error::NonFiniteSample { index });
        }

        let len = cycle.len();
        let samples: Arc<[f32]> = cycle
            .iter()
            .copied()
            .chain((0..GUARD_SAMPLES).map(|i| cycle[i % len]))
            .collect();

        Ok(Self {
            samples,
            len,
            cycle_sum: cycle.iter().sum(),
        })
    }

    /// Build a table by evaluating `f` at phases in `[0, 1)`.
    pub fn from_fn(len: usize, f: impl Fn(f32) -> f32) -> Result<Self> {
        let cycle: Vec<f32> = (0..len).map(|i| f(i as f32 / len as f32)).collect();
        Self::new(&cycle)
    }

    pub fn sine(len: usize) -> Result<Self> {
        Self::from_fn(len, |p| (p * TAU).sin())
    }

    /// Naive rising sawtooth in `[-1, 1)`.
    pub fn saw(len: usize) -> Result<Self> {
        Self::from_fn(len, |p| p * 2.0 - 1.0)
    }

    /// Nominal cycle length, excluding guard samples.
    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// The full sample storage including guard samples.
    #[inline]
    pub fn samples(&self) -> &[f32] {
        &self.samples
    }

    /// Sum of one cycle.
    #[inline]
    pub fn cycle_sum(&self) -> f32 {
        self.cycle_sum
    }

    #[inline]
    pub fn at(&self, index: usize) -> f32 {
        self.samples[index % self.len]
    }

    /// Linear interpolation at integer index `hi` plus fraction `lo`.
    #[inline]
    pub fn lerp(&self, hi: usize, lo: f32) -> f32 {
        debug_assert!(hi < self.len, "table index {} out of bounds", hi);
        self.samples[hi] * (1.0 - lo) + self.samples[hi + 1] * lo
    }
}

impl fmt::Debug for OscillatorTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OscillatorTable")
            .field("len", &self.len)
            .field("cycle_sum", &self.cycle_sum)
            .finish()
    }
}

impl PartialEq for OscillatorTable {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.samples, &other.samples) || self.samples == other.samples
    }
}
