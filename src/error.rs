//! Error types for the response service.

use thiserror::Error;

/// Result type alias for service operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the response service.
#[derive(Error, Debug)]
pub enum Error {
    /// Model files could not be resolved or loaded.
    #[error("failed to load model: {0}")]
    ModelLoad(String),

    /// Model or server configuration is unusable.
    #[error("configuration error: {0}")]
    Config(String),

    /// Tokenizer failed to encode or decode.
    #[error("tokenization error: {0}")]
    Tokenization(String),

    /// Next-token sampling failed.
    #[error("sampling error: {0}")]
    Sampling(String),

    /// Tensor operation error.
    #[error("tensor error: {0}")]
    Tensor(#[from] candle_core::Error),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON parsing error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// Every worker is busy and the wait queue is full.
    #[error("server is busy: {queued} requests already waiting")]
    Overloaded { queued: usize },

    /// A generation job crashed on its worker thread.
    #[error("inference worker failed: {0}")]
    Worker(String),
}
