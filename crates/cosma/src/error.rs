//! Error types for multiply calls.

use thiserror::Error;

/// Errors that can occur while setting up or running a distributed multiply.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum Error {
    /// Invalid caller input (dimensions, scalars, descriptor combinations).
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// Matrix shapes do not agree with the requested product.
    #[error("shape mismatch: {0}")]
    Shape(String),

    /// A layout descriptor is inconsistent or refers to ranks outside the
    /// participating set.
    #[error("layout error: {0}")]
    Layout(String),

    /// Strategy parsing, validation or derivation failed.
    #[error("strategy error: {0}")]
    Strategy(String),

    /// The per-process memory budget cannot be honoured.
    #[error("memory budget exceeded: need {needed} elements, limit {limit}")]
    Memory { needed: usize, limit: usize },

    /// The message transport reported a failure.
    #[error("transport error: {0}")]
    Transport(String),

    /// The local matrix-multiply kernel reported a failure.
    #[error("kernel error: {0}")]
    Kernel(String),
}

/// Result type for fallible cosma operations.
pub type Result<T> = std::result::Result<T, Error>;
