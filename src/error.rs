//! Error types for the account-link pipeline

use thiserror::Error;

/// Result type alias for pipeline operations
pub type Result<T> = std::result::Result<T, PipelineError>;

#[derive(Error, Debug)]
pub enum PipelineError {

    // =============================
    // Stage Errors
    // =============================

    /// A stage's predecessor collection is empty
    #[error("No {0} found")]
    NotFound(String),

    #[error("Financial API error: {0}")]
    ExternalService(String),

    #[error("Store error: {0}")]
    Store(String),

    /// Another invocation of the same stage holds the run lock
    #[error("Stage already running: {0}")]
    StageBusy(String),

    /// The stage's run marker no longer names this run
    #[error("Run superseded: {0}")]
    RunSuperseded(String),

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error("Configuration error: {0}")]
    Config(String),

    // =============================
    // External Library Conversions
    // =============================

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("HTTP client error: {0}")]
    HttpError(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}
