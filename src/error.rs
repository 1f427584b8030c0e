//! Error types for strata.

use thiserror::Error;

/// Strata error type.
#[derive(Debug, Error)]
pub enum Error {
    /// Candle tensor error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// Unrecognized sparse dropout mode string.
    #[error("invalid dropout mode: {0}")]
    InvalidDropoutMode(String),

    /// A layer referenced another layer that is not available at that
    /// point in the pipeline (built later, or never added).
    #[error("invalid layer reference: layer {index} has no value yet")]
    InvalidLayerReference { index: usize },

    /// A graph-aware layer ran in a pipeline without an adjacency context.
    #[error("no graph context: layer requires an adjacency-backed pipeline")]
    MissingGraph,

    /// Dimension mismatch.
    #[error("dimension mismatch: expected {expected}, got {got}")]
    DimensionMismatch { expected: usize, got: usize },

    /// Invalid configuration caught at model-definition time.
    #[error("invalid config: {0}")]
    InvalidConfig(String),

    /// Training error.
    #[error("training error: {0}")]
    Training(String),
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
