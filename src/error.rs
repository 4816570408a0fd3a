use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

/// Error domains used across the catalogue, scanner, registry, and HTTP
/// surface. `NotFound` is deliberately not a variant here: per-path and
/// per-id lookups return `Option<T>`, never an error, so callers cannot
/// mistake "absent" for "failed".
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("filesystem error: {0}")]
    FileSystem(#[from] io::Error),

    #[error("database error: {0}")]
    Persistence(#[from] RusqliteError),

    #[error("invalid request: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl IndexError {
    pub fn validation(msg: impl Into<String>) -> Self {
        IndexError::Validation(msg.into())
    }
}
