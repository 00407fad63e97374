//! Unison engine: detuned copies of one voice with per-copy vibrato, stereo
//! placement and polarity.

use rand::Rng;

use crate::error::{try_with_capacity, Result};
use crate::math::unison_spread_cents;
use crate::params::{PhaseInvert, UnisonParams, MAX_UNISON_SIZE};

/// State of one unison copy.
#[derive(Debug, Clone, Copy, Default)]
pub struct UnisonCopy {
    /// Detune ratio before vibrato and bandwidth scaling.
    pub base_ratio: f32,
    /// Vibrato position in `[-1, 1]`.
    pub position: f32,
    /// Per-block vibrato increment; the sign flips at the ends.
    pub step: f32,
    pub inverted: bool,
    /// -1.0 = left, 1.0 = right
    pub pan: f32,
}

#[derive(Debug, Clone)]
pub struct UnisonEngine {
    copies: Vec<UnisonCopy>,
    ratios: Vec<f32>,
    vibrato_amplitude: f32,
    gain: f32,
}

impl UnisonEngine {
    /// Lay out `size` copies. `blocks_per_second` sets the vibrato rate.
    pub fn new(
        params: &UnisonParams,
        size: usize,
        blocks_per_second: f32,
        rng: &mut impl Rng,
    ) -> Result<Self> {
        let size = size.clamp(1, MAX_UNISON_SIZE);
        let spread_cents = unison_spread_cents(params.spread);
        let real_spread = (spread_cents * 0.5 / 1200.0).exp2();
        let vibrato_depth = params.vibrato / 127.0;

        let mut copies: Vec<UnisonCopy> = try_with_capacity(size, "unison copies")?;
        copies.resize(size, UnisonCopy::default());

        match size {
            1 => copies[0].base_ratio = 1.0,
            2 => {
                copies[0].base_ratio = 1.0 / real_spread;
                copies[1].base_ratio = real_spread;
            }
            _ => {
                // Even spacing with up to one slot of jitter, then stretched
                // back so the outermost copies sit exactly at the spread.
                let last = (size - 1) as f32;
                let mut min = -1e-6f32;
                let mut max = 1e-6f32;
                for (k, copy) in copies.iter_mut().enumerate() {
                    let even = k as f32 / last * 2.0 - 1.0;
                    let value = even + (rng.gen::<f32>() * 2.0 - 1.0) / last;
                    copy.base_ratio = value;
                    min = min.min(value);
                    max = max.max(value);
                }
                let center = (max + min) * 0.5;
                let half_range = (max - min) * 0.5;
                for copy in &mut copies {
                    let unit = (copy.base_ratio - center) / half_range;
                    copy.base_ratio = (spread_cents * 0.5 * unit / 1200.0).exp2();
                }
            }
        }

        let mut vibrato_amplitude = 0.0;
        if size > 1 {
            // Deeper vibrato leaves less static detune.
            for copy in &mut copies {
                copy.base_ratio = 1.0 + (copy.base_ratio - 1.0) * (1.0 - vibrato_depth);
            }
            vibrato_amplitude = (real_spread - 1.0) * vibrato_depth;

            let base_period = 0.25 * ((1.0 - params.vibrato_speed / 127.0) * 4.0).exp2();
            for copy in &mut copies {
                copy.position = rng.gen::<f32>() * 1.8 - 0.9;
                // Each copy runs between half and double the base period.
                let period = base_period * (rng.gen::<f32>() * 2.0 - 1.0).exp2();
                let step = 4.0 / (period * blocks_per_second);
                copy.step = if rng.gen::<f32>() < 0.5 { -step } else { step };
            }

            match params.phase_invert {
                PhaseInvert::None => {}
                PhaseInvert::Random => {
                    for copy in &mut copies {
                        copy.inverted = rng.gen::<f32>() > 0.5;
                    }
                }
                PhaseInvert::EveryNth(n) => {
                    let n = n.max(1) as usize;
                    for (k, copy) in copies.iter_mut().enumerate() {
                        copy.inverted = k % n == 0;
                    }
                }
            }

            let spread = params.stereo_spread / 127.0 * 2.0;
            for (k, copy) in copies.iter_mut().enumerate() {
                let position = k as f32 / (size - 1) as f32 * 2.0 - 1.0;
                copy.pan = if spread > 1.0 {
                    let edge = if position >= 0.0 { 1.0 } else { -1.0 };
                    (2.0 - spread) * position + (spread - 1.0) * edge
                } else {
                    position * spread
                };
            }
        }

        let mut ratios: Vec<f32> = try_with_capacity(size, "unison ratios")?;
        ratios.extend(copies.iter().map(|c| c.base_ratio));

        Ok(Self {
            copies,
            ratios,
            vibrato_amplitude,
            gain: 1.0 / (size as f32).sqrt(),
        })
    }

    #[inline]
    pub fn size(&self) -> usize {
        self.copies.len()
    }

    /// Per-copy mix gain, `1/sqrt(size)`.
    #[inline]
    pub fn gain(&self) -> f32 {
        self.gain
    }

    #[inline]
    pub fn copies(&self) -> &[UnisonCopy] {
        &self.copies
    }

    /// Frequency ratios computed by the last [`update`](Self::update).
    #[inline]
    pub fn ratios(&self) -> &[f32] {
        &self.ratios
    }

    /// Advance every copy's vibrato one block and recompute the ratios.
    /// `relbw` scales the whole detune.
    pub fn update(&mut self, relbw: f32) -> &[f32] {
        if self.copies.len() == 1 {
            self.ratios[0] = 1.0;
            return &self.ratios;
        }
        for (copy, ratio) in self.copies.iter_mut().zip(self.ratios.iter_mut()) {
            let mut position = copy.position + copy.step;
            if position <= -1.0 {
                position = -1.0;
                copy.step = -copy.step;
            }
            if position >= 1.0 {
                position = 1.0;
                copy.step = -copy.step;
            }
            copy.position = position;

            // Soften the triangle's corners.
            let vibrato = (position - position * position * position / 3.0) * 1.5;
            *ratio = 1.0 + ((copy.base_ratio - 1.0) + vibrato * self.vibrato_amplitude) * relbw;
        }
        &self.ratios
    }

    /// Left/right gains of copy `k`, negative when the copy is inverted.
    pub fn pan_gains(&self, k: usize) -> (f32, f32) {
        let copy = &self.copies[k];
        let upan = (copy.pan + 1.0) * 0.5;
        let left = ((1.0 - upan) * 2.0).min(1.0);
        let right = (upan * 2.0).min(1.0);
        if copy.inverted {
            (-left, -right)
        } else {
            (left, right)
        }
    }

    /// Polarity of copy `k` for mono mixing.
    #[inline]
    pub fn polarity(&self, k: usize) -> f32 {
        if self.copies[k].inverted {
            -1.0
        } else {
            1.0
        }
    }
}
