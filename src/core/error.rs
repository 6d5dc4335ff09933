//! Error types for the tilestream engine

use thiserror::Error;

/// Main error type for the engine
///
/// Only unrecoverable conditions surface as `Error`; everything that can be
/// retried or skipped flows through `Validity` returns instead.
#[derive(Debug, Error)]
pub enum Error {
    #[error("map configuration error: {0}")]
    Config(String),

    #[error("decode error: {0}")]
    Decode(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("GPU upload error: {0}")]
    Upload(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
