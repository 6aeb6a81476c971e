//! Operator-facing outcome of an import action.
//!
//! Backend error payloads come in several shapes (plain strings,
//! `{row, error}` objects, arbitrary JSON). They are normalized into
//! [`Detail`] values here, before anything is shown to the operator.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

use crate::api::logs::{log_error, log_success, log_warning};
use crate::validation::ValidationError;

/// One line of detail under an outcome message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Detail {
    Row { row: u64, error: String },
    Message(String),
}

impl Detail {
    /// Normalize one backend error value.
    pub fn from_value(value: &Value) -> Self {
        match value {
            Value::String(s) => Detail::Message(s.clone()),
            Value::Object(map) => {
                let text = ["error", "message", "detail"]
                    .iter()
                    .find_map(|k| map.get(*k).and_then(Value::as_str));
                let row = map.get("row").and_then(|r| {
                    r.as_u64()
                        .or_else(|| r.as_str().and_then(|s| s.trim().parse().ok()))
                });
                match (row, text) {
                    (Some(row), Some(error)) => Detail::Row { row, error: error.to_string() },
                    (None, Some(text)) => Detail::Message(text.to_string()),
                    _ => Detail::Message(value.to_string()),
                }
            }
            other => Detail::Message(other.to_string()),
        }
    }
}

impl fmt::Display for Detail {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Detail::Row { row, error } => write!(f, "Row {}: {}", row, error),
            Detail::Message(m) => f.write_str(m),
        }
    }
}

impl From<&ValidationError> for Detail {
    fn from(err: &ValidationError) -> Self {
        Detail::Row {
            row: err.row as u64,
            error: err.message.clone(),
        }
    }
}

/// Normalize a backend `errors` payload: arrays yield one detail per item.
pub fn normalize_errors(value: &Value) -> Vec<Detail> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.iter().map(Detail::from_value).collect(),
        other => vec![Detail::from_value(other)],
    }
}

/// Final result of a save or batch submit, as shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImportOutcome {
    pub success: bool,
    pub message: String,
    #[serde(default)]
    pub details: Vec<Detail>,
}

impl ImportOutcome {
    pub fn success(message: impl Into<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn failure(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
            details: Vec::new(),
        }
    }

    pub fn with_details(mut self, details: impl IntoIterator<Item = Detail>) -> Self {
        self.details.extend(details);
        self
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.details.push(Detail::Message(detail.into()));
        self
    }

    /// Row-level details only.
    pub fn row_errors(&self) -> impl Iterator<Item = (u64, &str)> {
        self.details.iter().filter_map(|d| match d {
            Detail::Row { row, error } => Some((*row, error.as_str())),
            Detail::Message(_) => None,
        })
    }
}

impl fmt::Display for ImportOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&render(self))
    }
}

/// Render an outcome as text: status line, then one bullet per detail.
pub fn render(outcome: &ImportOutcome) -> String {
    let mut out = format!(
        "{} {}",
        if outcome.success { "✅" } else { "❌" },
        outcome.message
    );
    for detail in &outcome.details {
        out.push_str("\n   - ");
        out.push_str(&detail.to_string());
    }
    out
}

/// Send an outcome to the log stream.
pub fn log_outcome(outcome: &ImportOutcome) {
    if outcome.success {
        log_success(outcome.message.clone());
        for detail in &outcome.details {
            log_warning(detail.to_string());
        }
    } else {
        log_error(outcome.message.clone());
        for detail in &outcome.details {
            log_error(detail.to_string());
        }
    }
}
