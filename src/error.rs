//! Error types for the NDV accumulators

use thiserror::Error;

/// Result type alias for accumulator operations
pub type Result<T> = std::result::Result<T, NdvError>;

/// Main error type for the accumulators
#[derive(Error, Debug)]
pub enum NdvError {
    /// The memory pool or the system allocator could not satisfy a request
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// A batch or slot index beyond what `grow` has provisioned.
    ///
    /// This is a caller contract violation, never an end-user condition.
    #[error("Invalid index: {index} (limit {limit}) in {context}")]
    InvalidIndex {
        context: &'static str,
        index: usize,
        limit: usize,
    },

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Corrupt sketch: {0}")]
    CorruptSketch(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Not implemented: {0}")]
    NotImplemented(String),

    #[error("Arrow error: {0}")]
    Arrow(#[from] arrow::error::ArrowError),
}

impl NdvError {
    pub(crate) fn invalid_index(context: &'static str, index: usize, limit: usize) -> Self {
        NdvError::InvalidIndex {
            context,
            index,
            limit,
        }
    }
}
