//! Centralized error type for the cantus umbrella crate.
//!
//! Wraps all subsystem errors so `?` propagates naturally across crate boundaries.

use thiserror::Error;

use crate::engine::NoteId;

#[derive(Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Voice(#[from] cantus_voice::Error),

    #[error(transparent)]
    Dsp(#[from] cantus_dsp::Error),

    #[error("Unknown note: {0}")]
    UnknownNote(NoteId),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
}

pub type Result<T> = std::result::Result<T, Error>;
