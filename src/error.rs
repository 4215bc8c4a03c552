//! Error types for forge-ivfpq operations.
//!
//! Every fallible operation validates its inputs before touching index
//! state, so an `Err` never leaves a half-applied mutation behind.

use std::io;
use thiserror::Error;

/// Result type alias using [`IvfPqError`].
pub type Result<T> = std::result::Result<T, IvfPqError>;

/// Errors that can occur while building, populating, searching or
/// persisting an index.
#[derive(Error, Debug)]
pub enum IvfPqError {
    /// Vector length does not match the configured dimension.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch {
        /// Configured dimension.
        expected: usize,
        /// Length of the offending vector.
        actual: usize,
    },

    /// Bad combination of construction parameters (d, nlist, m, nbits).
    #[error("invalid configuration: {0}")]
    InvalidConfiguration(String),

    /// Fewer training vectors than clusters to learn.
    #[error("insufficient data: required {required} training vectors, got {actual}")]
    InsufficientData {
        /// Minimum number of vectors required.
        required: usize,
        /// Number of vectors supplied.
        actual: usize,
    },

    /// Operation called out of sequence (e.g. search before train).
    #[error("invalid state: cannot {operation} while index is {state}")]
    InvalidState {
        /// Operation that was attempted.
        operation: &'static str,
        /// State the index was in.
        state: &'static str,
    },

    /// Per-call argument out of range (k, nprobe, ids).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Training was aborted through the cancellation flag.
    #[error("training cancelled")]
    Cancelled,

    /// I/O error during file operations.
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Error while encoding or decoding the persisted configuration.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Checksum verification failed while loading.
    #[error("checksum mismatch: file may be corrupted")]
    ChecksumMismatch,

    /// Persisted data has an invalid or unsupported layout.
    #[error("invalid file format: {0}")]
    InvalidFormat(String),
}

impl IvfPqError {
    /// Creates a new `DimensionMismatch` error.
    pub fn dimension_mismatch(expected: usize, actual: usize) -> Self {
        Self::DimensionMismatch { expected, actual }
    }

    /// Creates a new `InsufficientData` error.
    pub fn insufficient_data(required: usize, actual: usize) -> Self {
        Self::InsufficientData { required, actual }
    }

    /// Creates a new `InvalidConfiguration` error.
    pub fn invalid_configuration(msg: impl Into<String>) -> Self {
        Self::InvalidConfiguration(msg.into())
    }

    /// Creates a new `InvalidState` error.
    pub fn invalid_state(operation: &'static str, state: &'static str) -> Self {
        Self::InvalidState { operation, state }
    }

    /// Creates a new `InvalidArgument` error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Self::InvalidArgument(msg.into())
    }

    /// Creates a new `InvalidFormat` error.
    pub fn invalid_format(msg: impl Into<String>) -> Self {
        Self::InvalidFormat(msg.into())
    }
}

impl From<bincode::Error> for IvfPqError {
    fn from(err: bincode::Error) -> Self {
        Self::Serialization(err.to_string())
    }
}

/// Check that `vector` has exactly `dimension` components.
#[inline]
pub(crate) fn check_dimension(dimension: usize, vector: &[f32]) -> Result<()> {
    if vector.len() != dimension {
        return Err(IvfPqError::dimension_mismatch(dimension, vector.len()));
    }
    Ok(())
}

/// Check every vector in a batch before anything is mutated.
pub(crate) fn check_batch<V: AsRef<[f32]>>(dimension: usize, vectors: &[V]) -> Result<()> {
    vectors
        .iter()
        .try_for_each(|v| check_dimension(dimension, v.as_ref()))
}
