//! Polyphonic additive voice engine.
//!
//! A [`Note`] renders up to [`NUM_VOICES`] oscillator chains per block. Each
//! chain ([`VoiceSlot`]) plays a table oscillator or noise through a unison
//! stage, optionally modulated by a second oscillator or by the live output
//! of a lower voice:
//!
//! - **Morph / Ring / RingToSide** - amplitude-domain mixing with a modulator
//! - **Phase** - the modulator moves the carrier's read position
//! - **Frequency** - the modulator is integrated into a running phase first
//! - **PulseWidth** - paired copies pushed in opposite directions and subtracted
//!
//! Modulators and carriers can themselves be voices, so chains nest. A
//! frequency-modulating sub-voice is read as per-sample means by replaying its
//! table, which keeps nested FM phase-accurate.
//!
//! ## Real-time contract
//!
//! Notes allocate when they are built, cloned or dropped. Rendering reads only
//! the caller's [`RenderScratch`] arena and never returns an error.
//!
//! ```ignore
//! use cantus_voice::{Controller, Note, ParameterStore, RenderScratch, VoiceParameterSet};
//! use cantus_dsp::{OscillatorTable, Timing};
//!
//! let store = ParameterStore::shared(VoiceParameterSet::single_voice(OscillatorTable::sine(1024)?));
//! let mut note = Note::new(store, 440.0, 1.0, false, 69, Timing::new(48000.0, 256), 0)?;
//! let mut scratch = RenderScratch::with_capacity(256, 1);
//! let (mut left, mut right) = (vec![0.0; 256], vec![0.0; 256]);
//! note.render_block(&mut left, &mut right, &Controller::default(), &mut scratch);
//! ```

mod error;
pub use error::{Error, Result};

pub mod math;
pub mod phase;
pub use phase::{Phase, PhaseStep};

mod controller;
pub use controller::{Controller, PortamentoState};

mod params;
pub use params::{
    DetuneParams, GlobalParams, ModulationKind, ModulatorParams, PhaseInvert, PunchParams,
    UnisonParams, VoiceKind, VoiceParameterSet, VoiceParams, MAX_UNISON_SIZE, NUM_VOICES,
};
pub use math::DetuneCurve;

mod store;
pub use store::ParameterStore;

mod scratch;
pub use scratch::RenderScratch;

pub mod unison;
pub use unison::UnisonEngine;

pub mod modulation;
pub use modulation::{Depth, ReplayCursor};

pub mod declick;
pub use declick::Punch;

mod voice;
pub use voice::VoiceSlot;

mod note;
pub use note::Note;

mod legato;
pub use legato::{LegatoChain, LegatoFade, LEGATO_FADE_SECONDS};
