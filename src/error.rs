//! Error type shared by every diagnostic operation.

use ndarray_stats::errors::MultiInputError;
use thiserror::Error;

use crate::grid::Architecture;

/// Errors raised while building a TKE budget.
///
/// All of them describe a caller contract violation; nothing here is
/// transient, so there is no retry path.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum TkeError {
    /// Two fields (or a field and a scratch buffer) live on different grids.
    #[error("grid mismatch: {what} is defined on a different grid")]
    GridMismatch { what: String },

    /// A required field was not supplied and could not be derived.
    #[error("missing input: {0} was not supplied and cannot be derived")]
    MissingInput(String),

    /// The grid targets an architecture without horizontal reduction kernels.
    #[error("unsupported execution target: horizontal reductions are not implemented for {0:?}")]
    UnsupportedExecutionTarget(Architecture),

    /// A field, profile or scratch buffer sits at the wrong staggered location.
    #[error("location mismatch for {what}: expected {expected}, got {actual}")]
    LocationMismatch {
        what: String,
        expected: String,
        actual: String,
    },

    /// Array shape disagrees with the grid and location it is tagged with.
    #[error("shape mismatch: expected {expected:?}, got {actual:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },

    /// Grid construction failed validation.
    #[error("invalid grid: {0}")]
    InvalidGrid(String),

    /// Weighted reduction rejected its inputs.
    #[error("reduction failed: {0}")]
    Reduction(String),
}

impl TkeError {
    pub fn grid_mismatch(what: impl Into<String>) -> Self {
        Self::GridMismatch { what: what.into() }
    }

    pub fn location_mismatch(
        what: impl Into<String>,
        expected: impl ToString,
        actual: impl ToString,
    ) -> Self {
        Self::LocationMismatch {
            what: what.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }
}

impl From<MultiInputError> for TkeError {
    fn from(err: MultiInputError) -> Self {
        Self::Reduction(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, TkeError>;
