//! Tolerance constants for audio testing.
//!
//! Different checks need different precision levels.

/// Floating point rounding errors (exact gain, identical graphs).
pub const FLOAT_EPSILON: f32 = 1e-6;

/// DSP processing tolerance (interpolated reads, summed copies).
pub const DSP_EPSILON: f32 = 1e-4;

/// Audio perceptual tolerance (~-60dB, inaudible differences).
pub const PERCEPTUAL_EPSILON: f32 = 0.001;

/// Silence threshold (~-80dB).
/// Values below this are considered silent.
pub const SILENCE_THRESHOLD: f32 = 0.0001;
