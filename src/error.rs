// src/error.rs

//! Unified error handling for the watcher application.

use std::fmt;

use thiserror::Error;

/// Result type alias for watcher operations.
pub type Result<T> = std::result::Result<T, AppError>;

/// Unified application error type.
#[derive(Error, Debug)]
pub enum AppError {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// HTTP request failed
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// TOML parsing failed
    #[error("TOML parse error: {0}")]
    Toml(#[from] toml::de::Error),

    /// URL parsing failed
    #[error("URL parse error: {0}")]
    Url(#[from] url::ParseError),

    /// SQLite operation failed
    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// Snapshot store error outside of SQLite itself
    #[error("Storage error: {0}")]
    Storage(String),

    /// Page fetch failed; the area's state is left untouched
    #[error("Fetch error for {area}: {message}")]
    Fetch { area: String, message: String },

    /// Extraction failed; never interpreted as an empty item list
    #[error("Extract error for {area}: {message}")]
    Extract { area: String, message: String },

    /// Notification channel delivery failed
    #[error("Channel error for {channel}: {message}")]
    Channel { channel: String, message: String },

    /// CSS selector parsing failed
    #[error("Invalid selector '{selector}': {message}")]
    Selector { selector: String, message: String },

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data validation error
    #[error("Validation error: {0}")]
    Validation(String),
}

impl AppError {
    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage(message.into())
    }

    /// Create a fetch error with area context.
    pub fn fetch(area: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Fetch {
            area: area.into(),
            message: message.to_string(),
        }
    }

    /// Create an extraction error with area context.
    pub fn extract(area: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Extract {
            area: area.into(),
            message: message.to_string(),
        }
    }

    /// Create a channel delivery error.
    pub fn channel(channel: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Channel {
            channel: channel.into(),
            message: message.to_string(),
        }
    }

    /// Create a selector parsing error.
    pub fn selector(selector: impl Into<String>, message: impl fmt::Display) -> Self {
        Self::Selector {
            selector: selector.into(),
            message: message.to_string(),
        }
    }

    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config(message.into())
    }

    /// Create a validation error.
    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation(message.into())
    }
}
