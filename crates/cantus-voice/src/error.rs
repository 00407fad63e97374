//! Error types for cantus-voice.

use std::collections::TryReserveError;

use thiserror::Error;

/// Result type alias for cantus-voice operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building or cloning a note.
///
/// Nothing here is produced by the render path.
#[derive(Debug, Error)]
pub enum Error {
    /// Invalid configuration parameter.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Reserving per-note storage failed. Only the note being built is lost.
    #[error("Failed to allocate {what}: {source}")]
    Allocation {
        what: &'static str,
        #[source]
        source: TryReserveError,
    },

    #[error(transparent)]
    Dsp(#[from] cantus_dsp::Error),
}

/// Build a zeroed buffer, reporting allocation failure instead of aborting.
pub(crate) fn try_zeroed(len: usize, what: &'static str) -> Result<Vec<f32>> {
    let mut buffer = Vec::new();
    buffer
        .try_reserve_exact(len)
        .map_err(|source| Error::Allocation { what, source })?;
    buffer.resize(len, 0.0);
    Ok(buffer)
}

/// Reserve room for `len` elements in a fresh vector.
pub(crate) fn try_with_capacity<T>(len: usize, what: &'static str) -> Result<Vec<T>> {
    let mut items = Vec::new();
    items
        .try_reserve_exact(len)
        .map_err(|source| Error::Allocation { what, source })?;
    Ok(items)
}
