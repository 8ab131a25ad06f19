//! Error types for chatlog-core

use thiserror::Error;

/// Main error type for chatlog-core
#[derive(Error, Debug)]
pub enum Error {
    #[error("Message text is empty")]
    EmptyText,

    #[error("Message not found: {0}")]
    NotFound(u64),

    #[error("Message is not editable: {0}")]
    NotEditable(u64),

    #[error("No message ids left above {0}")]
    IdsExhausted(u64),

    #[error("Invalid snapshot: {0}")]
    InvalidSnapshot(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON parsing error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type alias for chatlog-core
pub type Result<T> = std::result::Result<T, Error>;
