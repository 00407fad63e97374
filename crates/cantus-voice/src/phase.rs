//! Fixed-point oscillator read positions.
//!
//! A position is an integer table index (`hi`) plus a fraction (`lo`) kept in
//! `[0, 1)`. The increment uses the same split, so advancing is one float add,
//! one carry test and one modulo.

/// Oscillator read position.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Phase {
    pub hi: usize,
    pub lo: f32,
}

/// Per-sample phase increment.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PhaseStep {
    pub hi: usize,
    pub lo: f32,
}

impl PhaseStep {
    /// Increment for `freq` Hz on a table of `table_len` samples. Speeds above
    /// one table per sample are clamped.
    pub fn from_freq(freq: f32, table_len: usize, sample_rate: f32) -> Self {
        let len = table_len as f32;
        let speed = freq.abs() * len / sample_rate;
        let speed = if speed.is_finite() { speed.min(len) } else { 0.0 };
        let hi = speed.floor();
        Self {
            hi: hi as usize,
            lo: speed - hi,
        }
    }

    /// Increment in table steps.
    #[inline]
    pub fn steps(&self) -> f32 {
        self.hi as f32 + self.lo
    }
}

impl Phase {
    /// Position at a fraction of a cycle.
    pub fn from_cycles(cycles: f32, table_len: usize) -> Self {
        Phase::default().offset(cycles.rem_euclid(1.0) * table_len as f32, table_len)
    }

    #[inline]
    pub fn advance(&mut self, step: PhaseStep, table_len: usize) {
        self.lo += step.lo;
        let carry = if self.lo >= 1.0 {
            self.lo -= 1.0;
            1
        } else {
            0
        };
        self.hi = (self.hi + step.hi + carry) % table_len;
    }

    /// This position moved by a signed number of table steps.
    #[inline]
    pub fn offset(&self, steps: f32, table_len: usize) -> Phase {
        if !steps.is_finite() {
            return *self;
        }
        let whole = steps.floor();
        let mut lo = self.lo + (steps - whole);
        let mut hi = self.hi as i64 + whole as i64;
        while lo >= 1.0 {
            lo -= 1.0;
            hi += 1;
        }
        Phase {
            hi: hi.rem_euclid(table_len as i64) as usize,
            lo,
        }
    }

    /// This position moved by a signed number of cycles. Whole cycles are
    /// dropped first so large offsets keep their sub-step precision.
    #[inline]
    pub fn offset_cycles(&self, cycles: f32, table_len: usize) -> Phase {
        if cycles == 0.0 || !cycles.is_finite() {
            return *self;
        }
        self.offset((cycles - cycles.floor()) * table_len as f32, table_len)
    }

    /// Position in table steps.
    #[inline]
    pub fn steps(&self) -> f32 {
        self.hi as f32 + self.lo
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use proptest::prelude::*;

    #[test]
    fn test_a440_increment() {
        let step = PhaseStep::from_freq(440.0, 1024, 48000.0);
        assert_eq!(step.hi, 9);
        assert_relative_eq!(step.lo, 0.386_666_7, epsilon = 1e-5);
    }

    #[test]
    fn test_a440_wraps_once_per_period() {
        let step = PhaseStep::from_freq(440.0, 1024, 48000.0);
        let mut phase = Phase::default();
        let mut wraps = Vec::new();
        // 48000 / 440 = 109.09 samples per period.
        for n in 1..=110 {
            let before = phase.steps();
            phase.advance(step, 1024);
            if phase.steps() < before {
                wraps.push(n);
            }
        }
        assert_eq!(wraps, vec![110]);
        let expected = 110.0 * step.steps() - 1024.0;
        assert_relative_eq!(phase.steps(), expected, epsilon = 1e-2);
    }

    #[test]
    fn test_speed_clamped_to_table_length() {
        let step = PhaseStep::from_freq(1.0e9, 512, 44100.0);
        assert_eq!(step.hi, 512);
        assert_eq!(step.lo, 0.0);
    }

    #[test]
    fn test_negative_frequency_uses_magnitude() {
        assert_eq!(
            PhaseStep::from_freq(-220.0, 2048, 44100.0),
            PhaseStep::from_freq(220.0, 2048, 44100.0)
        );
    }

    #[test]
    fn test_offset_wraps_backwards() {
        let phase = Phase { hi: 2, lo: 0.25 };
        let moved = phase.offset(-3.5, 16);
        assert_eq!(moved.hi, 14);
        assert_relative_eq!(moved.lo, 0.75);
    }

    #[test]
    fn test_offset_cycles_drops_whole_turns() {
        let phase = Phase { hi: 100, lo: 0.5 };
        assert_eq!(phase.offset_cycles(3.25, 1024), phase.offset(256.0, 1024));
        assert_eq!(phase.offset_cycles(-0.75, 1024), phase.offset(256.0, 1024));
        assert_eq!(phase.offset_cycles(0.0, 1024), phase);
    }

    #[test]
    fn test_from_cycles() {
        let phase = Phase::from_cycles(0.5, 1024);
        assert_eq!(phase.hi, 512);
        assert_eq!(phase.lo, 0.0);
        assert_eq!(Phase::from_cycles(-0.25, 1024).hi, 768);
    }

    proptest! {
        #[test]
        fn prop_advance_stays_in_table(
            freq in 0.0f32..30000.0,
            sample_rate in 8000.0f32..192000.0,
            len_pow in 4u32..14,
            samples in 1usize..2000,
        ) {
            let len = 1usize << len_pow;
            let step = PhaseStep::from_freq(freq, len, sample_rate);
            let mut phase = Phase::default();
            for _ in 0..samples {
                phase.advance(step, len);
                prop_assert!(phase.hi < len);
                prop_assert!((0.0..1.0).contains(&phase.lo));
            }
        }

        #[test]
        fn prop_offset_stays_in_table(
            hi in 0usize..1024,
            lo in 0.0f32..1.0,
            steps in -1.0e6f32..1.0e6,
        ) {
            let moved = Phase { hi, lo }.offset(steps, 1024);
            prop_assert!(moved.hi < 1024);
            prop_assert!((0.0..1.0).contains(&moved.lo));
        }
    }
}
