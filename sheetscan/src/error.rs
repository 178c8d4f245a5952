use std::path::PathBuf;

use thiserror::Error;

#[derive(Error, Debug)]
pub enum SheetscanError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Discovery error: {0}")]
    Discovery(String),

    #[error("State file {path} is corrupt: {reason}")]
    StateCorrupt { path: PathBuf, reason: String },

    #[error("Vision service error: {0}")]
    Vision(String),

    #[error("Vision service authentication failed: {0}")]
    VisionAuth(String),

    #[error("Vision service rate limit exceeded, retry after {retry_after:?} seconds")]
    VisionRateLimit { retry_after: Option<u64> },

    #[error("Malformed extraction response: {0}")]
    MalformedResponse(String),

    #[error("Image error: {0}")]
    Image(String),

    #[error("HTTP request error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl SheetscanError {
    /// Errors a batch can absorb: the batch is marked failed, its targets stay
    /// pending and the run moves on. Everything else aborts the project.
    pub fn is_batch_recoverable(&self) -> bool {
        matches!(
            self,
            SheetscanError::Vision(_)
                | SheetscanError::VisionAuth(_)
                | SheetscanError::VisionRateLimit { .. }
                | SheetscanError::MalformedResponse(_)
                | SheetscanError::Image(_)
                | SheetscanError::Http(_)
                | SheetscanError::Json(_)
                | SheetscanError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, SheetscanError>;
