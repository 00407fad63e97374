//! # Cantus - Polyphonic Additive Voice Engine
//!
//! Renders notes built from up to eight oscillator voices, each with unison,
//! its own envelopes, LFOs and filter, and an optional modulator that may be
//! another table or the live output of a lower voice.
//!
//! ## Architecture
//!
//! Cantus is an umbrella crate that coordinates:
//! - **cantus-dsp** - Generators behind narrow traits (envelope, LFO, biquad, oscillator table)
//! - **cantus-voice** - The engine (unison, modulation, voice slots, notes, legato)
//!
//! and adds [`SynthEngine`], a thin host that owns notes by id.
//!
//! ## Quick Start
//!
//! ```ignore
//! use cantus::prelude::*;
//!
//! let mut engine = SynthEngine::builder()
//!     .sample_rate(48000.0)
//!     .buffer_size(256)
//!     .parameters(VoiceParameterSet::single_voice(OscillatorTable::sine(1024)?))
//!     .build()?;
//!
//! let id = engine.note_on(440.0, 1.0, false, 69)?;
//! let (mut left, mut right) = (vec![0.0; 256], vec![0.0; 256]);
//! engine.render(&mut left, &mut right);
//! engine.release(id)?;
//! ```

/// Re-export of cantus-dsp for direct access
pub use cantus_dsp as dsp;

/// Re-export of cantus-voice for direct access
pub use cantus_voice as voice;

mod error;
pub use error::{Error, Result};

mod builder;
pub use builder::{EngineConfig, SynthEngineBuilder};

mod engine;
pub use engine::{NoteId, SynthEngine};

pub use cantus_dsp::{
    EnvelopeMode, EnvelopeParams, EnvelopePoint, FilterKind, FilterParams, LfoParams, LfoShape,
    LfoTarget, OscillatorTable, Timing,
};
pub use cantus_voice::{
    Controller, DetuneCurve, DetuneParams, GlobalParams, LegatoChain, ModulationKind,
    ModulatorParams, Note, ParameterStore, PhaseInvert, PunchParams, RenderScratch, UnisonParams,
    VoiceKind, VoiceParameterSet, VoiceParams, VoiceSlot, NUM_VOICES,
};

/// Convenient re-exports for common usage.
pub mod prelude {
    pub use crate::{
        Controller, EngineConfig, EnvelopeMode, EnvelopeParams, EnvelopePoint, FilterKind,
        FilterParams, LegatoChain, LfoParams, LfoShape, LfoTarget, ModulationKind, Note, NoteId,
        OscillatorTable, ParameterStore, PhaseInvert, RenderScratch, SynthEngine, Timing,
        UnisonParams, VoiceParameterSet, VoiceParams,
    };
    pub use crate::{Error, Result};
}
