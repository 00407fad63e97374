//! Generator building blocks driven by the Cantus voice engine.
//!
//! The engine only talks to these through the narrow per-block traits in
//! [`traits`]; concrete implementations live next to them:
//!
//! - **[`Envelope`]** - point envelope with sustain and forced release
//! - **[`Lfo`]** - block-rate LFO with delay and randomness
//! - **[`Biquad`]** - cascaded cookbook filter with pitch-domain parameters
//! - **[`OscillatorTable`]** - single-cycle table with guard samples
//!
//! Every generator is `Clone`, and the boxed trait objects clone through
//! `dyn-clone`, so a running note can be duplicated mid-flight.

mod error;
pub use error::{Error, Result};

mod timing;
pub use timing::Timing;

pub mod traits;
pub use traits::{EnvelopeGenerator, FilterState, LfoGenerator};

mod envelope;
pub use envelope::{
    db_to_gain, gain_to_db, Envelope, EnvelopeMode, EnvelopeParams, EnvelopePoint,
    MAX_ENVELOPE_POINTS, MIN_ENVELOPE_DB,
};

mod lfo;
pub use lfo::{Lfo, LfoParams, LfoShape, LfoTarget};

mod filter;
pub use filter::{Biquad, FilterKind, FilterParams, MAX_FILTER_STAGES};

mod table;
pub use table::{OscillatorTable, GUARD_SAMPLES};
