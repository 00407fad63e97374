//! Test helpers and fixtures for Cantus integration tests
//!
//! ## Tolerance Levels
//!
//! Use the appropriate tolerance from [`tolerances`] module:
//! - `FLOAT_EPSILON` (1e-6): Exact operations (identical graphs, unity gain)
//! - `DSP_EPSILON` (1e-4): DSP processing (interpolated reads, modulation)
//! - `PERCEPTUAL_EPSILON` (0.001): Perceptual equivalence (-60dB)
//! - `SILENCE_THRESHOLD` (0.0001): Silence detection (-80dB)

#![allow(dead_code)]

pub mod tolerances;

use cantus::prelude::*;

/// Default test sample rate (matches common hardware)
pub const TEST_SAMPLE_RATE: f32 = 48000.0;

/// Standard buffer size for deterministic testing
pub const TEST_BUFFER_SIZE: usize = 512;

pub fn sine_table() -> OscillatorTable {
    OscillatorTable::sine(1024).expect("Failed to build sine table")
}

/// One enabled sine voice, every other setting at its default.
pub fn sine_set() -> VoiceParameterSet {
    VoiceParameterSet::single_voice(sine_table())
}

/// Create a test engine playing `parameters`.
pub fn test_engine(parameters: VoiceParameterSet) -> SynthEngine {
    SynthEngine::builder()
        .sample_rate(TEST_SAMPLE_RATE)
        .buffer_size(TEST_BUFFER_SIZE)
        .seed(1)
        .parameters(parameters)
        .build()
        .expect("Failed to create test engine")
}

/// Render `num_samples` stereo samples.
pub fn render(engine: &mut SynthEngine, num_samples: usize) -> (Vec<f32>, Vec<f32>) {
    let mut left = vec![0.0; num_samples];
    let mut right = vec![0.0; num_samples];
    engine.render(&mut left, &mut right);
    (left, right)
}

/// Amplitude envelope that decays to silence in `ms` without sustaining.
pub fn one_shot(ms: f32) -> EnvelopeParams {
    EnvelopeParams {
        mode: EnvelopeMode::AmplitudeLinear,
        points: vec![EnvelopePoint::new(0.0, 127.0), EnvelopePoint::new(ms, 0.0)],
        sustain: None,
        forced_release: false,
        stretch: 0.0,
    }
}

/// Calculate RMS of a signal.
pub fn rms(samples: &[f32]) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let sum_sq: f32 = samples.iter().map(|s| s * s).sum();
    (sum_sq / samples.len() as f32).sqrt()
}

/// Calculate peak amplitude of a signal.
pub fn peak(samples: &[f32]) -> f32 {
    samples
        .iter()
        .map(|s| s.abs())
        .fold(0.0_f32, |a, b| a.max(b))
}

/// Count upward zero crossings.
pub fn rising_crossings(samples: &[f32]) -> usize {
    samples
        .windows(2)
        .filter(|w| w[0] <= 0.0 && w[1] > 0.0)
        .count()
}

/// Estimate the fundamental of a clean periodic signal from its crossings.
pub fn estimate_frequency(samples: &[f32], sample_rate: f32) -> f32 {
    rising_crossings(samples) as f32 * sample_rate / samples.len() as f32
}

/// Largest absolute difference between two signals.
pub fn max_difference(a: &[f32], b: &[f32]) -> f32 {
    assert_eq!(a.len(), b.len(), "Signal lengths differ");
    a.iter()
        .zip(b.iter())
        .map(|(x, y)| (x - y).abs())
        .fold(0.0_f32, f32::max)
}

/// Assert that a signal is approximately silent (all values near zero).
pub fn assert_silence(samples: &[f32], tolerance: f32) {
    let max = peak(samples);
    assert!(
        max <= tolerance,
        "Expected silence, but peak amplitude was {}",
        max
    );
}

/// Assert that a signal has content (not silent).
pub fn assert_has_audio(samples: &[f32], min_rms: f32) {
    let r = rms(samples);
    assert!(
        r >= min_rms,
        "Expected audio content with RMS >= {}, but RMS was {}",
        min_rms,
        r
    );
}

/// Assert two signals are equal within tolerance, with detailed error message.
pub fn assert_signals_equal(a: &[f32], b: &[f32], epsilon: f32, context: &str) {
    let diff = max_difference(a, b);
    assert!(
        diff <= epsilon,
        "{}: signals differ by {} (tolerance {})",
        context,
        diff,
        epsilon
    );
}
