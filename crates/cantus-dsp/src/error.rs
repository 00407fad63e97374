//! Error types for cantus-dsp.

use thiserror::Error;

/// Result type alias for cantus-dsp operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur while building generators.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum Error {
    /// A parameter is outside the range a generator can work with.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// An oscillator table was built from no samples.
    #[error("Oscillator table is empty")]
    EmptyTable,

    /// An oscillator table contains NaN or infinity.
    #[error("Oscillator table sample {index} is not finite")]
    NonFiniteSample { index: usize },
}
