// Error types for the tutor-ai plumbing.
// Covers configuration, HTTP client construction, and I/O failures. Failures of
// AI requests themselves are classified into `ClassifiedError` instead.

use thiserror::Error;

#[derive(Error, Debug)]
pub enum TutorError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Invalid configuration: {0}")]
    Config(String),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(String),
}

pub type Result<T> = std::result::Result<T, TutorError>;
