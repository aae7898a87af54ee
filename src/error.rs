// error.rs — Failure taxonomy for the embedding + search core.
//
// Five caller-visible kinds, kept deliberately flat so the HTTP layer can map
// them to status codes without string matching:
// - Input: bad caller input, never retried automatically
// - ModelUnavailable: encoder load/inference failure, caller may retry
// - DimensionMismatch: model/store configuration drift, fatal
// - StoreUnavailable: external vector store unreachable, transient
// - Configuration: required deployment configuration missing, fatal until fixed

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid input: {0}")]
    Input(String),

    #[error("embedding model unavailable: {0}")]
    ModelUnavailable(String),

    #[error("vector dimension mismatch: got {got}, index expects {expected}")]
    DimensionMismatch { got: usize, expected: usize },

    #[error("vector store unavailable: {0}")]
    StoreUnavailable(String),

    #[error("missing configuration: {0}")]
    Configuration(String),
}

// Candle failures surface during load or a forward pass; both mean the caller
// did nothing wrong and may retry once the engine recovers.
impl From<candle_core::Error> for Error {
    fn from(e: candle_core::Error) -> Self {
        Error::ModelUnavailable(e.to_string())
    }
}
