//! Error types for Rowcast

use std::time::Duration;

use thiserror::Error;

pub type Result<T> = std::result::Result<T, RowcastError>;

#[derive(Error, Debug)]
pub enum RowcastError {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DbError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Progress store error: {0}")]
    Store(#[from] StoreError),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl RowcastError {
    /// Returns the process exit code for this error
    ///
    /// Configuration problems are detected before any database or network
    /// activity and exit with 2; every other unrecoverable failure exits with 1.
    pub fn exit_code(&self) -> i32 {
        match self {
            RowcastError::Config(_) => 2,
            RowcastError::InvalidInput(_) => 2,
            RowcastError::Database(_) => 1,
            RowcastError::Platform(_) => 1,
            RowcastError::Store(_) => 1,
            RowcastError::Io(_) => 1,
        }
    }
}

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("Failed to read config file: {0}")]
    ReadError(#[from] std::io::Error),

    #[error("Failed to parse config: {0}")]
    ParseError(#[from] toml::de::Error),

    #[error("Missing required field: {0}")]
    MissingField(String),

    #[error("Invalid value for {field}: {reason}")]
    InvalidValue { field: String, reason: String },
}

impl ConfigError {
    pub(crate) fn invalid(field: &str, reason: impl Into<String>) -> Self {
        ConfigError::InvalidValue {
            field: field.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Database operation failed: {0}")]
    SqlxError(#[from] sqlx::Error),

    #[error("Database IO error: {0}")]
    IoError(#[from] std::io::Error),
}

#[derive(Error, Debug)]
pub enum StoreError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Failed to encode quota state: {0}")]
    Serialize(#[from] serde_json::Error),
}

#[derive(Error, Debug, Clone)]
pub enum PlatformError {
    #[error("Authentication failed: {0}")]
    Authentication(String),

    #[error("Content validation failed: {0}")]
    Validation(String),

    #[error("Posting failed: {0}")]
    Posting(String),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Rate limit exceeded: {detail}")]
    RateLimited {
        detail: String,
        retry_after: Option<Duration>,
    },
}

impl PlatformError {
    pub fn rate_limited(detail: impl Into<String>) -> Self {
        PlatformError::RateLimited {
            detail: detail.into(),
            retry_after: None,
        }
    }
}
