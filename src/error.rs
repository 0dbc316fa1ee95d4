//! Error types for the feed curator.

use std::time::Duration;

/// Top-level error type.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Database error: {0}")]
    Database(#[from] DatabaseError),

    #[error("Platform error: {0}")]
    Platform(#[from] PlatformError),

    #[error("Pipeline error: {0}")]
    Pipeline(#[from] PipelineError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Configuration-related errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable: {0}")]
    MissingEnvVar(String),

    #[error("Invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}

/// Database-related errors.
#[derive(Debug, thiserror::Error)]
pub enum DatabaseError {
    #[error("Connection pool error: {0}")]
    Pool(String),

    #[error("Query failed: {0}")]
    Query(String),

    #[error("Migration failed: {0}")]
    Migration(String),
}

/// Social platform API errors.
#[derive(Debug, thiserror::Error)]
pub enum PlatformError {
    #[error("Request to {endpoint} failed: {reason}")]
    Network { endpoint: String, reason: String },

    #[error("API error from {endpoint} (status {status}): {message}")]
    Api {
        endpoint: String,
        status: u16,
        message: String,
    },

    #[error("Rate limited on {endpoint}, retry after {retry_after:?}")]
    RateLimited {
        endpoint: String,
        retry_after: Option<Duration>,
    },

    #[error("Authentication failed for {endpoint}")]
    AuthFailed { endpoint: String },

    #[error("Invalid response from {endpoint}: {reason}")]
    InvalidResponse { endpoint: String, reason: String },
}

/// Pipeline-related errors.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    #[error("Payload normalization failed: {0}")]
    Normalize(String),

    #[error("Acting account could not be resolved: {0}")]
    Identity(#[source] PlatformError),

    #[error("Invalid schedule '{expression}': {reason}")]
    Schedule { expression: String, reason: String },
}

/// Result type alias.
pub type Result<T> = std::result::Result<T, Error>;
