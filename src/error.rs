//! Error types for Funcbox
//!
//! This module defines all error types used throughout the Funcbox server.
//! Uses `thiserror` for ergonomic error handling with automatic `Display` and
//! `Error` trait implementations.

use axum::http::StatusCode;
use thiserror::Error;

/// The primary error type for Funcbox operations.
#[derive(Error, Debug)]
pub enum FuncboxError {
    /// Configuration-related errors (invalid config, malformed manifests, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// The requested function is not a known plugin
    #[error("Function not found: {0}")]
    NotFound(String),

    /// A required parameter was absent from the request
    #[error("Missing required parameter: {name}")]
    MissingParameter { name: String },

    /// A supplied parameter failed type coercion
    #[error("Invalid value for parameter {name}: '{value}'")]
    InvalidParameter { name: String, value: String },

    /// The plugin body failed (error return, non-zero exit, panic, timeout)
    #[error("Function error: {message}")]
    PluginExecution { name: String, message: String },

    /// Route registry or statistics file I/O failures
    #[error("Persistence error: {0}")]
    Persistence(String),

    /// Security violations (path traversal attempts, reserved names, etc.)
    #[error("Security violation: {0}")]
    SecurityViolation(String),

    /// Standard I/O errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl FuncboxError {
    /// HTTP status the error maps to when surfaced by the server.
    pub fn status_code(&self) -> StatusCode {
        match self {
            FuncboxError::NotFound(_) => StatusCode::NOT_FOUND,
            FuncboxError::MissingParameter { .. }
            | FuncboxError::InvalidParameter { .. }
            | FuncboxError::SecurityViolation(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Whether the error was caused by the request rather than the server.
    pub fn is_client_error(&self) -> bool {
        self.status_code().is_client_error()
    }
}

/// A specialized `Result` type for Funcbox operations.
pub type Result<T> = std::result::Result<T, FuncboxError>;
