use rusqlite;
use std::io;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridError {
    #[error("SQLite error: {0}")]
    RusqliteError(#[from] rusqlite::Error),
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
    #[error("Config error: {0}")]
    ConfigError(String),
    #[error("Failed to initialize database: {0}")]
    DatabaseInitializationError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
    #[error("Not found: {0}")]
    NotFound(String),
    #[error("Plan limit reached: {kind} ({current} of {limit})")]
    LimitReached {
        kind: String,
        current: u64,
        limit: u64,
    },
    #[error("Session is not active: {0}")]
    Unauthenticated(String),
}

impl GridError {
    pub fn validation(msg: impl Into<String>) -> Self {
        GridError::ValidationError(msg.into())
    }

    pub fn not_found(what: &str, id: &str) -> Self {
        GridError::NotFound(format!("{} '{}'", what, id))
    }
}
