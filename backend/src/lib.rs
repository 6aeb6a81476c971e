//! # Rosterload - bulk user import for an LMS
//!
//! Rosterload reads many user accounts from a CSV or spreadsheet file,
//! validates them against the live system, lets an operator correct them
//! and commits them with per-record partial success.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────┐     ┌─────────────┐     ┌─────────────┐     ┌─────────────┐
//! │  CSV / XLSX │────▶│   Parser    │────▶│   Staging   │────▶│   Submit    │
//! │    file     │     │  (auto-enc) │     │ (validated) │     │ (LMS calls) │
//! └─────────────┘     └─────────────┘     └─────────────┘     └─────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use rosterload::{stage_file, HttpLmsClient, SubmissionCoordinator, SubmitOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let client = HttpLmsClient::from_env().unwrap();
//!     let mut session = stage_file(&client, "users.csv".as_ref(), 1000).await.unwrap();
//!     let outcome = SubmissionCoordinator::new(&client, SubmitOptions::default())
//!         .submit_batch(&mut session)
//!         .await;
//!     println!("{}", outcome);
//! }
//! ```
//!
//! ## Modules
//!
//! - [`error`] - Hierarchical error types
//! - [`models`] - Import records, fields and wire payloads
//! - [`parser`] - CSV / workbook parsing with auto-detection
//! - [`validation`] - Per-record validation rules
//! - [`session`] - Editable staging session
//! - [`submit`] - Single and batch commit with side effects
//! - [`report`] - Operator-facing outcomes
//! - [`client`] - LMS API client
//! - [`config`] - Environment configuration
//! - [`api`] - HTTP API server

// Core modules
pub mod error;
pub mod models;

// Parsing
pub mod parser;

// Validation
pub mod validation;

// Staging and commit
pub mod session;
pub mod submit;
pub mod report;

// Remote LMS
pub mod client;

pub mod config;

// HTTP API
pub mod api;

// =============================================================================
// Re-exports - Error types
// =============================================================================

pub use error::{
    ApiError, ConfigError, ImportError, IngestError, ServerError, SessionError,
};

// =============================================================================
// Re-exports - Models
// =============================================================================

pub use models::{Field, ImportRecord, Role, Status, UserId};

// =============================================================================
// Re-exports - Parsing
// =============================================================================

pub use parser::{
    build_template, build_template_xlsx, parse_bytes, parse_file, parse_records,
    records_to_csv, ParseResult,
};

// =============================================================================
// Re-exports - Validation
// =============================================================================

pub use validation::{is_valid, validate, validate_all, ValidationContext, ValidationError};

// =============================================================================
// Re-exports - Staging & Submit
// =============================================================================

pub use session::{Selection, StagingSession};
pub use submit::{
    stage_file, BatchReport, CommitOutcome, SubmissionCoordinator, SubmitOptions,
};
pub use report::{Detail, ImportOutcome};

// =============================================================================
// Re-exports - Client & Config
// =============================================================================

pub use client::{load_context, HttpLmsClient, LmsApi};
pub use config::ImportConfig;

// Server
pub mod server {
    pub use crate::api::server::start_server;
}
