//! Error types for cone operations.

use thiserror::Error;

/// Errors raised by the partition descriptor, the cone kernels and the
/// distributed dispatch layer.
///
/// Every collective operation agrees on a single error across all ranks
/// before returning, so each rank observes the same variant and the same
/// offending block.
#[derive(Error, Debug, Clone, PartialEq)]
#[allow(missing_docs)] // Error variant fields are self-documenting
pub enum SocError {
    /// The `(orders, first_inds)` pair does not tile `[0, N)` with
    /// contiguous blocks.
    #[error("Malformed cone partition at index {index}: {reason}")]
    MalformedPartition { index: usize, reason: String },

    /// A block is outside the region an operation requires (closed cone for
    /// square roots and step lengths, open cone for Nesterov-Todd scaling).
    #[error("Block starting at {first} is outside the domain: {reason}")]
    Domain { first: usize, reason: String },

    /// Inverse of a block with (numerically) zero determinant.
    #[error("Block starting at {first} is singular (det = {det:e})")]
    Singular { first: usize, det: f64 },

    /// Index, bound or cutoff misuse.
    #[error("Out of range: {0}")]
    OutOfRange(String),

    /// Vector lengths or layouts disagree.
    #[error("Dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A collective could not complete.
    #[error("Communication failure: {0}")]
    Communication(String),
}

impl SocError {
    /// First index of the offending block, if the error is tied to one.
    pub fn block(&self) -> Option<usize> {
        match self {
            SocError::Domain { first, .. } | SocError::Singular { first, .. } => Some(*first),
            SocError::MalformedPartition { index, .. } => Some(*index),
            _ => None,
        }
    }
}

/// Result type for cone operations.
pub type SocResult<T> = Result<T, SocError>;
