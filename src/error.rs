//! Error types shared by every storage backend.
//!
//! There is no "row not found" variant: lookups return `Option` and
//! updates/deletes of unknown ids succeed without effect.

use thiserror::Error;

pub type StoreResult<T> = Result<T, StoreError>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Validation error in {field}: {message}")]
    Validation { field: String, message: String },

    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Backend error ({status}): {message}")]
    Backend { status: u16, message: String },

    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Transaction rolled back: {0}")]
    Transaction(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Bridge error {code}: {message}")]
    Bridge { code: i32, message: String },

    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
}

impl StoreError {
    pub fn validation(field: impl Into<String>, message: impl Into<String>) -> Self {
        StoreError::Validation {
            field: field.into(),
            message: message.into(),
        }
    }

    pub fn transport(message: impl std::fmt::Display) -> Self {
        StoreError::Transport(message.to_string())
    }
}
