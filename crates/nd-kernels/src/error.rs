use alloc::string::{String, ToString};
use thiserror::Error;

/// Errors raised by the kernels.
///
/// None of these are transient: the caller has to fix its inputs, retrying is pointless.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum KernelError {
    /// Tensor ranks or dimensions are incompatible.
    #[error("Shape error: {reason}")]
    Shape {
        /// What did not match.
        reason: String,
    },

    /// A region of interest maps to an empty or invalid pixel rectangle.
    #[error("Invalid region of interest #{index}: {reason}")]
    InvalidRoi {
        /// Position of the region in the batch of regions.
        index: usize,
        /// Why the region was rejected.
        reason: String,
    },
}

impl KernelError {
    pub(crate) fn shape(reason: impl Into<String>) -> Self {
        Self::Shape {
            reason: reason.into(),
        }
    }

    pub(crate) fn invalid_roi(index: usize, reason: impl Into<String>) -> Self {
        Self::InvalidRoi {
            index,
            reason: reason.into(),
        }
    }
}

impl From<ndarray::ShapeError> for KernelError {
    fn from(err: ndarray::ShapeError) -> Self {
        Self::shape(err.to_string())
    }
}
