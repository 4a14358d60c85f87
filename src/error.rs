//! Error types for gradlane.
//!
//! Every fallible operation in the crate returns [`Result`]. Errors are raised
//! synchronously by the call that detected them and nothing is mutated when
//! one is returned.

use crate::backend::Backend;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Two operands cannot be reconciled. Carries the shapes exactly as the
    /// caller supplied them, batch axes included.
    #[error("Shape mismatch: {lhs:?} and {rhs:?} cannot be reconciled")]
    ShapeMismatch { lhs: Vec<usize>, rhs: Vec<usize> },

    #[error("Unsupported operand for `{op}`: {kind}")]
    UnsupportedOperandKind { op: &'static str, kind: &'static str },

    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(&'static str),

    #[error("Unsupported rank {rank}: at most {max} axes are supported")]
    UnsupportedRank { rank: usize, max: usize },

    /// The computational graph is corrupted, e.g. a node whose argument and
    /// backward function lists disagree.
    #[error("Graph invariant violated: {0}")]
    InvariantViolation(String),

    #[error("Invalid subscript `{subscript}`: {reason}")]
    InvalidSubscript { subscript: String, reason: String },

    #[error("Invalid array: {0}")]
    InvalidArray(String),

    #[error("Operands live on different backends: {lhs:?} and {rhs:?}")]
    BackendMismatch { lhs: Backend, rhs: Backend },

    #[error("Backend {0:?} is not available in this build")]
    BackendUnavailable(Backend),

    #[cfg(feature = "wgpu")]
    #[error(transparent)]
    Gpu(#[from] crate::ops::wgpu::GpuFailure),
}

pub type Result<T> = std::result::Result<T, Error>;

impl Error {
    pub(crate) fn shape_mismatch(lhs: &[usize], rhs: &[usize]) -> Self {
        Self::ShapeMismatch {
            lhs: lhs.to_vec(),
            rhs: rhs.to_vec(),
        }
    }

    pub(crate) fn invalid_subscript(subscript: &str, reason: impl Into<String>) -> Self {
        Self::InvalidSubscript {
            subscript: subscript.to_string(),
            reason: reason.into(),
        }
    }
}
