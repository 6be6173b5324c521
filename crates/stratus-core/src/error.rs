//! Centralized error types for Stratus.
//!
//! Most failures inside the cache and scheduler are recovered locally and only
//! logged. These types cover the failures that do cross a component boundary.

use thiserror::Error;

/// Top-level application error type.
///
/// Use `user_message()` for a short operator-facing message.
#[derive(Debug, Error)]
pub enum AppError {
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Scheduler error: {0}")]
    Scheduler(#[from] SchedulerError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{0}")]
    Other(#[from] anyhow::Error),
}

impl AppError {
    pub fn user_message(&self) -> &'static str {
        match self {
            AppError::Network(e) => e.user_message(),
            AppError::Storage(e) => e.user_message(),
            AppError::Config(e) => e.user_message(),
            AppError::Scheduler(e) => e.user_message(),
            AppError::Io(_) => "A file operation failed.",
            AppError::Other(_) => "An unexpected error occurred.",
        }
    }
}

/// Network-related errors (HTTP, connectivity).
#[derive(Debug, Error)]
pub enum NetworkError {
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    #[error("Request timed out")]
    Timeout,

    #[error("Server error: {status} - {message}")]
    ServerError { status: u16, message: String },

    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl NetworkError {
    pub fn user_message(&self) -> &'static str {
        match self {
            NetworkError::ConnectionFailed(_) => {
                "Unable to connect. Check your internet connection."
            }
            NetworkError::Timeout => "The request timed out.",
            NetworkError::ServerError { status, .. } if *status >= 500 => {
                "The weather service is experiencing issues."
            }
            NetworkError::ServerError { .. } => "The weather request failed.",
            NetworkError::InvalidResponse(_) => "Received an unexpected response.",
        }
    }
}

/// Local persistence errors (cache files, index, shared records).
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("IO error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization failed: {0}")]
    Serialization(String),

    #[error("Data corruption detected: {0}")]
    Corruption(String),

    #[error("Unsupported record version {found} (expected {expected})")]
    VersionMismatch { found: u32, expected: u32 },
}

impl StorageError {
    pub fn io(path: &std::path::Path, source: std::io::Error) -> Self {
        StorageError::Io {
            path: path.display().to_string(),
            source,
        }
    }

    pub fn user_message(&self) -> &'static str {
        match self {
            StorageError::Io { .. } => "Unable to access local data.",
            StorageError::Serialization(_) => "Failed to save local data.",
            StorageError::Corruption(_) | StorageError::VersionMismatch { .. } => {
                "Local data was unreadable and has been reset."
            }
        }
    }
}

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Configuration parse error: {0}")]
    ParseError(String),
}

impl ConfigError {
    pub fn user_message(&self) -> &'static str {
        match self {
            ConfigError::Invalid(_) => "Invalid configuration. Check your settings.",
            ConfigError::ParseError(_) => "Configuration file is malformed. Check your settings.",
        }
    }
}

/// Background job scheduling errors.
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("Job request rejected: {0}")]
    Rejected(String),

    #[error("No job handler registered for {0}")]
    NoHandler(String),

    #[error("Background refresh unavailable")]
    Unavailable,
}

impl SchedulerError {
    pub fn user_message(&self) -> &'static str {
        match self {
            SchedulerError::Rejected(_) => "Background refresh could not be scheduled.",
            SchedulerError::NoHandler(_) => "Background refresh is not set up.",
            SchedulerError::Unavailable => "Background refresh is unavailable.",
        }
    }
}
