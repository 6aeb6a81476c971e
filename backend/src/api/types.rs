//! REST API types for the staging front end.
//!
//! Views are computed from the live [`StagingSession`] on every request; the
//! front end never holds canonical state.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use uuid::Uuid;

use crate::models::{Field, ImportRecord};
use crate::parser::ParseResult;
use crate::session::{Selection, StagingSession};
use crate::validation::{row_number, validate};

/// One record as listed in the staging table.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RowView {
    /// Position in the session (used in `/api/session/rows/{row}`)
    pub index: usize,
    /// Row number in the uploaded file
    pub row: usize,
    pub record: ImportRecord,
    pub saved: bool,
    pub error_count: usize,
}

/// Snapshot of the staging session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub session_id: String,
    pub file_name: Option<String>,
    pub total: usize,
    pub unsaved: usize,
    pub invalid: usize,
    pub query: String,
    /// Rows matching `query`, in file order
    pub rows: Vec<RowView>,
    pub selection: Option<Selection>,
}

impl SessionView {
    pub fn new(session_id: Uuid, file_name: Option<&str>, session: &StagingSession) -> Self {
        let records = session.records();
        let error_count =
            |index: usize| validate(&records[index], index, records, session.context()).len();

        let invalid = (0..records.len())
            .filter(|&i| !records[i].is_saved() && error_count(i) > 0)
            .count();

        let rows = session
            .visible()
            .into_iter()
            .map(|(index, record)| RowView {
                index,
                row: row_number(index),
                record: record.clone(),
                saved: record.is_saved(),
                error_count: error_count(index),
            })
            .collect();

        Self {
            session_id: session_id.to_string(),
            file_name: file_name.map(str::to_string),
            total: session.len(),
            unsaved: session.unsaved().len(),
            invalid,
            query: session.query().to_string(),
            rows,
            selection: session.selection().cloned(),
        }
    }
}

/// File details returned with a new session.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceInfo {
    pub encoding: String,
    pub delimiter: Option<String>,
    pub columns: Vec<String>,
    pub ignored_columns: Vec<String>,
}

impl From<&ParseResult> for SourceInfo {
    fn from(result: &ParseResult) -> Self {
        Self {
            encoding: result.encoding.clone(),
            delimiter: result.delimiter.map(|d| d.to_string()),
            columns: result.headers.clone(),
            ignored_columns: result.ignored_columns.clone(),
        }
    }
}

/// Response of `POST /api/import`.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportResponse {
    pub source: SourceInfo,
    pub session: SessionView,
}

/// Body of `PATCH /api/session/selection`.
#[derive(Debug, Clone, Deserialize)]
pub struct EditRequest {
    pub field: Field,
    #[serde(default)]
    pub value: String,
}

/// Query of `GET /api/session`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct SessionQuery {
    pub q: Option<String>,
}

/// Query of `GET /api/template`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TemplateQuery {
    pub format: Option<String>,
}

/// Create an error response
pub fn error_response(error: &str) -> Value {
    json!({
        "success": false,
        "message": error,
        "details": []
    })
}
