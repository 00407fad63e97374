//! Narrow per-block contracts the voice engine drives its generators through.
//!
//! Every trait object is cloneable through [`dyn_clone`], which is what lets a
//! live note graph be duplicated for a legato crossfade.

use dyn_clone::DynClone;

/// A per-block envelope.
pub trait EnvelopeGenerator: DynClone + Send {
    /// Advance one block and return the value in the envelope's native unit
    /// (cents, octaves, bandwidth or linear amplitude).
    fn sample(&mut self) -> f32;

    /// Advance one block and return a linear gain.
    fn sample_amplitude(&mut self) -> f32;

    /// Enter the release stage. Calling it twice has no further effect.
    fn release_key(&mut self);

    fn finished(&self) -> bool;
}

dyn_clone::clone_trait_object!(EnvelopeGenerator);

/// A per-block low frequency oscillator.
pub trait LfoGenerator: DynClone + Send {
    /// Advance one block and return the bipolar output scaled by intensity.
    fn sample(&mut self) -> f32;

    /// Advance one block and return a gain in `[-1, 1]` centred on `1 - intensity`.
    fn sample_amplitude(&mut self) -> f32;
}

dyn_clone::clone_trait_object!(LfoGenerator);

/// Filter state processed in place, one block at a time.
pub trait FilterState: DynClone + Send {
    fn set_freq_and_q(&mut self, freq: f32, q: f32);

    fn process(&mut self, buffer: &mut [f32]);
}

dyn_clone::clone_trait_object!(FilterState);
