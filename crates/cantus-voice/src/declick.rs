//! Onset shaping: the per-voice declick fade-in and the note-wide punch.

use std::f32::consts::PI;

use crate::math::velocity_factor;
use crate::params::PunchParams;

/// Shortest fade-in, in samples.
pub const MIN_FADE_IN: usize = 8;

/// Raised-cosine fade over the start of a voice's first block.
///
/// The length comes from the number of rising zero crossings `z` in the block:
/// `(len - 1) / (z + 1) / 3`, clamped to `[MIN_FADE_IN, len]`. Returns the
/// fade length used.
pub fn fade_in(buffer: &mut [f32]) -> usize {
    let size = buffer.len();
    if size == 0 {
        return 0;
    }
    let crossings = buffer.windows(2).filter(|w| w[0] < 0.0 && w[1] > 0.0).count();

    let estimate = (size as f32 - 1.0) / (crossings as f32 + 1.0) / 3.0;
    let fade = (estimate.max(MIN_FADE_IN as f32) as usize).min(size);
    for (i, sample) in buffer[..fade].iter_mut().enumerate() {
        *sample *= 0.5 - 0.5 * (PI * i as f32 / fade as f32).cos();
    }
    fade
}

/// Transient gain boost that decays linearly to unity after note-on.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Punch {
    initial: f32,
    t: f32,
    dt: f32,
    enabled: bool,
}

impl Punch {
    pub fn disabled() -> Self {
        Self {
            initial: 0.0,
            t: 0.0,
            dt: 0.0,
            enabled: false,
        }
    }

    pub fn new(params: &PunchParams, base_freq: f32, velocity: f32, sample_rate: f32) -> Self {
        if params.strength <= 0.0 {
            return Self::disabled();
        }
        let initial = (10f32.powf(1.5 * params.strength / 127.0) - 1.0)
            * velocity_factor(velocity, params.velocity_sense);
        // 0.1 ms .. 100 ms
        let time = 10f32.powf(3.0 * params.time / 127.0) / 10_000.0;
        let stretch = (440.0 / base_freq.max(1.0)).powf(params.stretch / 64.0);
        Self {
            initial,
            t: 1.0,
            dt: 1.0 / (time * sample_rate * stretch),
            enabled: true,
        }
    }

    #[inline]
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    /// Scale both channels. Once the boost has run out it stays off.
    pub fn apply(&mut self, left: &mut [f32], right: &mut [f32]) {
        if !self.enabled {
            return;
        }
        for (l, r) in left.iter_mut().zip(right.iter_mut()) {
            let gain = self.initial * self.t + 1.0;
            *l *= gain;
            *r *= gain;
            self.t -= self.dt;
            if self.t < 0.0 {
                self.enabled = false;
                break;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_fade_in_silent_start() {
        let mut buffer = vec![1.0f32; 256];
        let fade = fade_in(&mut buffer);
        // No crossings: (255 / 1) / 3 = 85 samples.
        assert_eq!(fade, 85);
        assert_eq!(buffer[0], 0.0);
        assert!(buffer[..fade].windows(2).all(|w| w[1] >= w[0]));
        assert!(buffer[fade..].iter().all(|&s| s == 1.0));
    }

    #[test]
    fn test_fade_in_shrinks_with_crossings() {
        let dense: Vec<f32> = (0..256).map(|i| if i % 4 < 2 { -1.0 } else { 1.0 }).collect();
        let mut buffer = dense.clone();
        let fade = fade_in(&mut buffer);
        assert_eq!(fade, MIN_FADE_IN);

        let sparse: Vec<f32> = (0..256).map(|i| if i % 128 < 64 { -1.0 } else { 1.0 }).collect();
        let mut buffer = sparse;
        assert!(fade_in(&mut buffer) > MIN_FADE_IN);
    }

    #[test]
    fn test_fade_in_short_block() {
        let mut buffer = vec![1.0f32; 4];
        assert_eq!(fade_in(&mut buffer), 4);
        assert_eq!(buffer[0], 0.0);
        assert!(fade_in(&mut []) == 0);
    }

    #[test]
    fn test_punch_disabled_without_strength() {
        let punch = Punch::new(&PunchParams::default(), 440.0, 1.0, 48000.0);
        assert!(!punch.is_enabled());
    }

    #[test]
    fn test_punch_decays_to_unity() {
        let params = PunchParams {
            strength: 127.0,
            time: 0.0,
            ..Default::default()
        };
        let mut punch = Punch::new(&params, 440.0, 1.0, 48000.0);
        assert!(punch.is_enabled());

        let mut left = vec![1.0f32; 64];
        let mut right = vec![1.0f32; 64];
        punch.apply(&mut left, &mut right);

        // 10^1.5 - 1 at the first sample.
        assert_relative_eq!(left[0], 10f32.powf(1.5), max_relative = 1e-5);
        assert!(left.windows(2).take(4).all(|w| w[1] <= w[0]));
        assert!(!punch.is_enabled());
        assert_eq!(left[63], 1.0);
        assert_eq!(left, right);
    }
}
