//! Numeric helpers shared by the render path.

use serde::{Deserialize, Serialize};

/// Relative gain change below which a ramp is not worth computing.
pub const AMPLITUDE_THRESHOLD: f32 = 1e-4;

/// Scale of the exponential FM/PM depth curve.
pub const FM_AMP_MULTIPLIER: f32 = 14.712_806;

/// Steepest velocity curve reachable with the sensing parameter at zero.
pub const VELOCITY_MAX_SCALE: f32 = 8.0;

/// Whether going from `old` to `new` is an audible gain change.
#[inline]
pub fn above_amplitude_threshold(old: f32, new: f32) -> bool {
    2.0 * (new - old).abs() / ((new + old).abs() + 1e-10) > AMPLITUDE_THRESHOLD
}

/// Gain at sample `x` of a `size`-sample linear ramp from `old` to `new`.
#[inline]
pub fn interpolate_amplitude(old: f32, new: f32, x: usize, size: usize) -> f32 {
    old + (new - old) * (x as f32 / size as f32)
}

/// Apply a gain change over a block: ramped if audible, flat otherwise.
pub fn apply_amplitude(buffer: &mut [f32], old: f32, new: f32) {
    if above_amplitude_threshold(old, new) {
        let size = buffer.len();
        for (i, sample) in buffer.iter_mut().enumerate() {
            *sample *= interpolate_amplitude(old, new, i, size);
        }
    } else {
        for sample in buffer.iter_mut() {
            *sample *= new;
        }
    }
}

/// Velocity response; `sense` 0..=127, 127 ignores velocity.
pub fn velocity_factor(velocity: f32, sense: f32) -> f32 {
    if sense >= 127.0 || velocity > 0.99 {
        return 1.0;
    }
    let exponent = VELOCITY_MAX_SCALE.powf((64.0 - sense) / 64.0);
    velocity.clamp(0.0, 1.0).powf(exponent)
}

/// Fine/coarse detune response curves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum DetuneCurve {
    /// Coarse steps of 50 cents, fine range +-35 cents.
    #[default]
    Linear35Cents,
    /// Coarse steps of 10 cents, fine range +-10 cents.
    Linear10Cents,
    /// Coarse steps of 100 cents, exponential fine range up to +-100 cents.
    Exponential100Cents,
    /// Coarse steps of a fifth, exponential fine range up to +-1200 cents.
    Exponential1200Cents,
}

/// Offset in cents described by a packed coarse value and a 14-bit fine value.
///
/// `coarse` packs an octave (upper bits, 8..15 meaning -8..-1) and a signed
/// coarse step (low ten bits, above 512 meaning negative). `fine` is centred
/// on 8192.
pub fn detune_cents(curve: DetuneCurve, coarse: u16, fine: u16) -> f32 {
    let mut octave = (coarse / 1024) as i32;
    if octave >= 8 {
        octave -= 16;
    }
    let mut steps = (coarse % 1024) as i32;
    if steps > 512 {
        steps -= 1024;
    }
    let fine_offset = fine as i32 - 8192;
    let f = (fine_offset as f32 / 8192.0).abs();

    let (coarse_cents, fine_cents) = match curve {
        DetuneCurve::Linear35Cents => ((steps as f32 * 50.0).abs(), f * 35.0),
        DetuneCurve::Linear10Cents => ((steps as f32 * 10.0).abs(), f * 10.0),
        DetuneCurve::Exponential100Cents => {
            ((steps as f32 * 100.0).abs(), 10f32.powf(f * 3.0) / 10.0 - 0.1)
        }
        DetuneCurve::Exponential1200Cents => (
            (steps as f32 * 701.955).abs(),
            ((f * 12.0).exp2() - 1.0) / 4095.0 * 1200.0,
        ),
    };

    let coarse_cents = if steps < 0 { -coarse_cents } else { coarse_cents };
    let fine_cents = if fine_offset < 0 { -fine_cents } else { fine_cents };
    octave as f32 * 1200.0 + coarse_cents + fine_cents
}

/// Detune scaling applied to fine detune and unison spread, 64 is neutral.
pub fn bandwidth_multiplier(bandwidth: f32) -> f32 {
    let bw = (bandwidth - 64.0) / 64.0;
    (bw * bw.abs().powf(0.2) * 5.0).exp2()
}

/// Unison spread parameter (0..=127) to cents.
pub fn unison_spread_cents(spread: f32) -> f32 {
    let x = spread / 127.0 * 2.0;
    x * x * 50.0
}

/// Equal-power pan gains for a 0..=127 position, 0 meaning random.
pub fn pan_gains(position: f32) -> (f32, f32) {
    let t = ((position - 1.0) / 126.0).clamp(0.0, 1.0);
    pan_gains_unit(t)
}

/// Equal-power pan gains for `t` in `[0, 1]`.
#[inline]
pub fn pan_gains_unit(t: f32) -> (f32, f32) {
    let half_pi = std::f32::consts::FRAC_PI_2;
    ((t * half_pi).cos(), ((1.0 - t) * half_pi).cos())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn test_threshold() {
        assert!(!above_amplitude_threshold(0.5, 0.5));
        assert!(!above_amplitude_threshold(0.0, 0.0));
        assert!(above_amplitude_threshold(0.1, 0.8));
        assert!(!above_amplitude_threshold(1.0, 1.000_01));
    }

    #[test]
    fn test_ramp_is_monotonic_and_bounded() {
        let mut buffer = vec![1.0f32; 256];
        apply_amplitude(&mut buffer, 0.10, 0.80);

        let step = (0.80 - 0.10) / 256.0;
        assert_relative_eq!(buffer[0], 0.10);
        for pair in buffer.windows(2) {
            assert!(pair[1] >= pair[0]);
            assert!(pair[1] - pair[0] <= step + 1e-6);
        }
        assert!(buffer[255] < 0.80);
    }

    #[test]
    fn test_flat_gain_when_unchanged() {
        let mut buffer = vec![1.0f32; 64];
        apply_amplitude(&mut buffer, 0.3, 0.3);
        assert!(buffer.iter().all(|&s| s == 0.3));
    }

    #[test]
    fn test_velocity_factor() {
        assert_eq!(velocity_factor(0.3, 127.0), 1.0);
        assert_eq!(velocity_factor(1.0, 0.0), 1.0);
        assert_relative_eq!(velocity_factor(0.5, 64.0), 0.5);
        assert!(velocity_factor(0.5, 0.0) < velocity_factor(0.5, 64.0));
    }

    #[test]
    fn test_detune_centered_is_zero() {
        for curve in [
            DetuneCurve::Linear35Cents,
            DetuneCurve::Linear10Cents,
            DetuneCurve::Exponential100Cents,
            DetuneCurve::Exponential1200Cents,
        ] {
            assert_relative_eq!(detune_cents(curve, 0, 8192), 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn test_detune_octave_and_coarse() {
        // One octave up.
        assert_relative_eq!(detune_cents(DetuneCurve::Linear35Cents, 1024, 8192), 1200.0);
        // Octave field 15 means one octave down.
        assert_relative_eq!(detune_cents(DetuneCurve::Linear35Cents, 15 * 1024, 8192), -1200.0);
        // Coarse step 1023 is -1.
        assert_relative_eq!(detune_cents(DetuneCurve::Exponential100Cents, 1023, 8192), -100.0);
        assert_relative_eq!(detune_cents(DetuneCurve::Linear10Cents, 2, 8192), 20.0);
    }

    #[test]
    fn test_detune_fine_extremes() {
        assert_relative_eq!(detune_cents(DetuneCurve::Linear35Cents, 0, 16384), 35.0);
        assert_relative_eq!(detune_cents(DetuneCurve::Linear35Cents, 0, 0), -35.0);
        assert_relative_eq!(
            detune_cents(DetuneCurve::Exponential1200Cents, 0, 16384),
            1200.0,
            epsilon = 1e-3
        );
        assert_relative_eq!(
            detune_cents(DetuneCurve::Exponential100Cents, 0, 16384),
            99.9,
            epsilon = 1e-3
        );
    }

    #[test]
    fn test_bandwidth_multiplier() {
        assert_relative_eq!(bandwidth_multiplier(64.0), 1.0);
        assert!(bandwidth_multiplier(127.0) > 1.0);
        assert!(bandwidth_multiplier(0.0) < 1.0);
    }

    #[test]
    fn test_unison_spread_cents() {
        assert_relative_eq!(unison_spread_cents(0.0), 0.0);
        assert_relative_eq!(unison_spread_cents(63.5), 50.0);
    }

    #[test]
    fn test_pan_center_is_equal_power() {
        let (l, r) = pan_gains(64.0);
        assert_relative_eq!(l, r, epsilon = 1e-6);
        assert_relative_eq!(l * l + r * r, 1.0, epsilon = 1e-6);
    }
}
