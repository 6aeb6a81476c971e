//! Error types for the Rosterload import pipeline.
//!
//! This module defines the error hierarchy used across the crate:
//!
//! - [`IngestError`] - reading CSV / spreadsheet uploads
//! - [`ApiError`] - remote LMS calls (transport and rejected requests)
//! - [`SessionError`] - misuse of the staging session
//! - [`ConfigError`] - invalid environment configuration
//! - [`ImportError`] - top-level orchestration errors
//! - [`ServerError`] - HTTP layer errors
//!
//! Error conversion is automatic via `From` implementations,
//! allowing `?` to work across error boundaries.
//!
//! Per-record validation problems are *not* errors in this sense: they are
//! plain data ([`crate::validation::ValidationError`]) that block saving.

use serde_json::Value;
use thiserror::Error;

use crate::report::{normalize_errors, Detail};

// =============================================================================
// Ingestion Errors
// =============================================================================

/// Errors while reading an uploaded file.
#[derive(Debug, Error)]
pub enum IngestError {
    /// Failed to read file.
    #[error("Failed to read file: {0}")]
    Io(#[from] std::io::Error),

    /// Failed to decode the text encoding.
    #[error("Failed to decode content: {0}")]
    Encoding(String),

    /// Invalid CSV content.
    #[error("Invalid CSV format: {0}")]
    Csv(#[from] csv::Error),

    /// Workbook could not be opened or read.
    #[error("Invalid spreadsheet: {0}")]
    Workbook(String),

    /// Empty file.
    #[error("File is empty")]
    EmptyFile,

    /// No header row found.
    #[error("No header row found")]
    NoHeaders,
}

// =============================================================================
// Remote API Errors
// =============================================================================

/// Errors from the remote LMS API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// The request never produced a response (connection, DNS, TLS...).
    #[error("Network error: {0}")]
    Transport(String),

    /// The backend answered with a non-success status.
    #[error("Request rejected with status {status}")]
    Rejected { status: u16, body: Value },

    /// The backend answered successfully but the body was not understood.
    #[error("Invalid response: {0}")]
    InvalidResponse(String),
}

impl ApiError {
    /// Headline message for the operator.
    ///
    /// Uses the body's `error` string when the backend supplied one.
    pub fn message(&self, fallback: &str) -> String {
        self.message_or(fallback, fallback)
    }

    /// Like [`Self::message`], with `rejected` used when the backend
    /// answered without an `error` string and `fallback` when it did not
    /// answer at all.
    pub fn message_or(&self, rejected: &str, fallback: &str) -> String {
        match self {
            ApiError::Rejected { body, .. } => body
                .get("error")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| rejected.to_string()),
            _ => fallback.to_string(),
        }
    }

    /// Normalized detail lines for the operator.
    ///
    /// Prefers `errors`, then `error`, then the body itself; transport
    /// failures without a body fall back to "Network error".
    pub fn details(&self) -> Vec<Detail> {
        match self {
            ApiError::Rejected { body, status } => {
                if let Some(errors) = body.get("errors") {
                    normalize_errors(errors)
                } else if let Some(error) = body.get("error") {
                    normalize_errors(error)
                } else if body.is_null() {
                    vec![Detail::Message(format!("Request failed with status {}", status))]
                } else {
                    normalize_errors(body)
                }
            }
            ApiError::Transport(msg) if msg.is_empty() => {
                vec![Detail::Message("Network error".to_string())]
            }
            ApiError::Transport(msg) => vec![Detail::Message(msg.clone())],
            ApiError::InvalidResponse(msg) => vec![Detail::Message(msg.clone())],
        }
    }
}

impl From<reqwest::Error> for ApiError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            ApiError::InvalidResponse(err.to_string())
        } else {
            ApiError::Transport(err.to_string())
        }
    }
}

// =============================================================================
// Session Errors
// =============================================================================

/// Errors from staging session operations.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum SessionError {
    /// An edit or save was attempted with nothing selected.
    #[error("No record is selected")]
    NoSelection,

    /// Row index does not exist.
    #[error("Row {row} is out of range ({len} records)")]
    RowOutOfRange { row: usize, len: usize },

    /// The record already has a backend id.
    #[error("Record {row} is already saved")]
    AlreadySaved { row: usize },
}

// =============================================================================
// Configuration Errors
// =============================================================================

/// Errors while reading configuration from the environment.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A variable is set but cannot be parsed.
    #[error("Invalid value for {name}: '{value}'")]
    InvalidValue { name: &'static str, value: String },
}

// =============================================================================
// Import Errors (top-level)
// =============================================================================

/// Top-level import workflow errors.
#[derive(Debug, Error)]
pub enum ImportError {
    /// File ingestion error.
    #[error("Ingest error: {0}")]
    Ingest(#[from] IngestError),

    /// Remote API error.
    #[error("API error: {0}")]
    Api(#[from] ApiError),

    /// Session error.
    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// The file contained no user rows.
    #[error("No users found in file")]
    EmptyInput,

    /// Some records failed validation.
    #[error("{0} records failed validation")]
    Invalid(usize),
}

// =============================================================================
// Server Errors
// =============================================================================

/// HTTP server errors.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Import workflow error.
    #[error("Import error: {0}")]
    Import(#[from] ImportError),

    /// Invalid request.
    #[error("Invalid request: {0}")]
    BadRequest(String),

    /// No session has been started.
    #[error("No import session in progress")]
    NoSession,

    /// Server internal error.
    #[error("Internal server error: {0}")]
    Internal(String),
}

impl From<SessionError> for ServerError {
    fn from(err: SessionError) -> Self {
        ServerError::Import(err.into())
    }
}

impl From<IngestError> for ServerError {
    fn from(err: IngestError) -> Self {
        ServerError::Import(err.into())
    }
}

// =============================================================================
// Result Type Aliases
// =============================================================================

/// Result type for ingestion.
pub type IngestResult<T> = Result<T, IngestError>;

/// Result type for remote calls.
pub type ApiResult<T> = Result<T, ApiError>;

/// Result type for session operations.
pub type SessionResult<T> = Result<T, SessionError>;

/// Result type for the import workflow.
pub type ImportResult<T> = Result<T, ImportError>;

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;
