//! Error types for lattix-graphembed.

use thiserror::Error;

/// Graph embedding error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Invalid configuration.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Co-indexed tensors disagree on shape.
    #[error("shape mismatch for `{name}`: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        name: &'static str,
        expected: Vec<usize>,
        got: Vec<usize>,
    },

    /// An id that would be gathered lies outside its table.
    #[error("index out of range for `{name}`: {index} >= {bound}")]
    IndexOutOfRange {
        name: &'static str,
        index: usize,
        bound: usize,
    },

    /// An operation over a sequence of tensors got none.
    #[error("empty tensor sequence: `{0}`")]
    EmptySequence(&'static str),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn shape(name: &'static str, expected: &[usize], got: &[usize]) -> Self {
        Self::ShapeMismatch {
            name,
            expected: expected.to_vec(),
            got: got.to_vec(),
        }
    }
}
