//! Rule-based validation of import records.
//!
//! A record is checked against static constraints (required fields, email
//! shape, password length, enumerations, dates) and against dynamic state:
//! the rest of the batch (duplicate emails) and the live system
//! ([`ValidationContext`]: existing emails, known course ids).
//!
//! # Rules
//!
//! Applied in this order, every failure collected:
//!
//! 1. `firstName`, `lastName`, `email`, `password`, `role` are required
//! 2. email shape `local@domain.tld`
//! 3. email unique within the batch (case-insensitive)
//! 4. email not already registered
//! 5. password at least 8 characters
//! 6. role is one of admin, instructor, learner, owner
//! 7. birth date, if present, is a calendar date
//! 8. status, if present, is one of active, pending, suspended
//! 9. every course id, if present, exists
//!
//! # Example
//!
//! ```rust,ignore
//! use rosterload::{validate, ImportRecord, ValidationContext};
//!
//! let ctx = ValidationContext::new(["taken@x.com"], ["course1"]);
//! let errors = validate(&records[0], 0, &records, &ctx);
//! for e in &errors {
//!     println!("{}", e); // "Row 2: Invalid email format"
//! }
//! ```

use chrono::{DateTime, NaiveDate};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;

use crate::models::{enumeration, Field, ImportRecord, Role, Status};

/// Minimum password length, in characters.
pub const MIN_PASSWORD_LEN: usize = 8;

static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^[^\s@]+@[^\s@]+\.[^\s@]+$").expect("email pattern is valid")
});

/// Birth date formats accepted in addition to RFC 3339 timestamps.
const DATE_FORMATS: [&str; 3] = ["%Y-%m-%d", "%Y/%m/%d", "%m/%d/%Y"];

/// One problem with one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationError {
    /// 1-based file row (record index + 2, the header being row 1)
    pub row: usize,
    pub message: String,
}

impl ValidationError {
    pub fn new(index: usize, message: impl Into<String>) -> Self {
        Self {
            row: row_number(index),
            message: message.into(),
        }
    }
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Row {}: {}", self.row, self.message)
    }
}

/// File row of a zero-based record index.
pub fn row_number(index: usize) -> usize {
    index + 2
}

/// Reference data from the live system.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ValidationContext {
    existing_emails: HashSet<String>,
    known_course_ids: HashSet<String>,
}

impl ValidationContext {
    pub fn new<E, C>(existing_emails: E, known_course_ids: C) -> Self
    where
        E: IntoIterator,
        E::Item: AsRef<str>,
        C: IntoIterator,
        C::Item: Into<String>,
    {
        Self {
            existing_emails: existing_emails
                .into_iter()
                .map(|e| e.as_ref().trim().to_lowercase())
                .collect(),
            known_course_ids: known_course_ids.into_iter().map(Into::into).collect(),
        }
    }

    pub fn email_exists(&self, email: &str) -> bool {
        self.existing_emails.contains(&email.to_lowercase())
    }

    pub fn course_exists(&self, id: &str) -> bool {
        self.known_course_ids.contains(id)
    }

    pub fn existing_email_count(&self) -> usize {
        self.existing_emails.len()
    }

    pub fn course_count(&self) -> usize {
        self.known_course_ids.len()
    }
}

/// Parse a birth date in one of the accepted formats.
pub fn parse_birth_date(value: &str) -> Option<NaiveDate> {
    let value = value.trim();
    DATE_FORMATS
        .iter()
        .find_map(|fmt| NaiveDate::parse_from_str(value, fmt).ok())
        .or_else(|| DateTime::parse_from_rfc3339(value).ok().map(|dt| dt.date_naive()))
}

/// Validate one record.
///
/// `index` is the record's position in `all_records`; `all_records` is the
/// full batch (including this record) used for duplicate detection.
/// An empty result means the record may be saved.
pub fn validate(
    record: &ImportRecord,
    index: usize,
    all_records: &[ImportRecord],
    context: &ValidationContext,
) -> Vec<ValidationError> {
    let mut errors = Vec::new();
    let mut push = |message: String| errors.push(ValidationError::new(index, message));

    for field in Field::REQUIRED {
        if record.get(field).is_none() {
            push(format!("Missing required field: {}", field));
        }
    }

    if let Some(email) = record.get(Field::Email) {
        if !EMAIL_RE.is_match(email) {
            push("Invalid email format".to_string());
        }

        let key = email.to_lowercase();
        let count = all_records
            .iter()
            .filter(|r| r.email_key().as_deref() == Some(key.as_str()))
            .count();
        if count > 1 {
            push("Duplicate email in upload batch".to_string());
        }

        if context.email_exists(&key) {
            push("Email already exists in the system".to_string());
        }
    }

    if let Some(password) = record.get(Field::Password) {
        if password.chars().count() < MIN_PASSWORD_LEN {
            push(format!("Password must be at least {} characters", MIN_PASSWORD_LEN));
        }
    }

    if let Some(role) = record.get(Field::Role) {
        if Role::parse(role).is_none() {
            push(format!(
                "Invalid role. Must be one of: {}",
                enumeration(&Role::ALL, Role::as_str)
            ));
        }
    }

    if let Some(date) = record.get(Field::BirthDate) {
        if parse_birth_date(date).is_none() {
            push("Invalid birth date format (use YYYY-MM-DD)".to_string());
        }
    }

    if let Some(status) = record.get(Field::Status) {
        if Status::parse(status).is_none() {
            push(format!(
                "Invalid status. Must be one of: {}",
                enumeration(&Status::ALL, Status::as_str)
            ));
        }
    }

    for id in record.course_id_list() {
        if !context.course_exists(&id) {
            push(format!("Invalid course ID: {}", id));
        }
    }

    errors
}

/// Quick check: true when [`validate`] reports nothing.
pub fn is_valid(
    record: &ImportRecord,
    index: usize,
    all_records: &[ImportRecord],
    context: &ValidationContext,
) -> bool {
    validate(record, index, all_records, context).is_empty()
}

/// Validate every record of a batch.
///
/// Returns `(index, errors)` for the records that have errors, in order.
pub fn validate_all(
    records: &[ImportRecord],
    context: &ValidationContext,
) -> Vec<(usize, Vec<ValidationError>)> {
    records
        .iter()
        .enumerate()
        .map(|(i, r)| (i, validate(r, i, records, context)))
        .filter(|(_, errs)| !errs.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ann() -> ImportRecord {
        ImportRecord::from_pairs([
            (Field::FirstName, "Ann"),
            (Field::LastName, "Lee"),
            (Field::Email, "ann@x.com"),
            (Field::Password, "Secure123"),
            (Field::Role, "learner"),
        ])
    }

    fn ctx() -> ValidationContext {
        ValidationContext::new(["Taken@X.com"], ["course1", "course2"])
    }

    fn messages(errors: &[ValidationError]) -> Vec<&str> {
        errors.iter().map(|e| e.message.as_str()).collect()
    }

    #[test]
    fn test_valid_single_row() {
        let records = vec![ann()];
        assert!(validate(&records[0], 0, &records, &ctx()).is_empty());
        assert!(is_valid(&records[0], 0, &records, &ctx()));
    }

    #[test]
    fn test_missing_required_fields_one_error_each() {
        let records = vec![ImportRecord::from_pairs([(Field::FirstName, "Ann"), (Field::LastName, "  ")])];
        let errors = validate(&records[0], 0, &records, &ctx());

        assert_eq!(
            messages(&errors),
            vec![
                "Missing required field: lastName",
                "Missing required field: email",
                "Missing required field: password",
                "Missing required field: role",
            ]
        );
    }

    #[test]
    fn test_row_numbers_offset_for_header() {
        let records = vec![ann(), ImportRecord::default()];
        let errors = validate(&records[1], 1, &records, &ctx());
        assert!(errors.iter().all(|e| e.row == 3));
        assert_eq!(errors[0].to_string(), "Row 3: Missing required field: firstName");
    }

    #[test]
    fn test_invalid_email_format() {
        let mut record = ann();
        record.set(Field::Email, "ann@x");
        let records = vec![record];
        let errors = validate(&records[0], 0, &records, &ctx());
        assert_eq!(messages(&errors), vec!["Invalid email format"]);
    }

    #[test]
    fn test_duplicate_flagged_on_every_occurrence() {
        let mut a = ann();
        a.set(Field::Email, "dup@x.com");
        let mut b = ann();
        b.set(Field::Email, "DUP@x.com");
        let records = vec![a, ann(), b];

        for i in [0, 2] {
            let errors = validate(&records[i], i, &records, &ctx());
            assert_eq!(messages(&errors), vec!["Duplicate email in upload batch"]);
        }
        assert!(validate(&records[1], 1, &records, &ctx()).is_empty());
        assert_eq!(validate_all(&records, &ctx()).len(), 2);
    }

    #[test]
    fn test_existing_email_case_insensitive() {
        let mut record = ann();
        record.set(Field::Email, "taken@x.COM");
        let records = vec![record];
        let errors = validate(&records[0], 0, &records, &ctx());
        assert_eq!(messages(&errors), vec!["Email already exists in the system"]);
    }

    #[test]
    fn test_password_boundary() {
        let mut record = ann();
        record.set(Field::Password, "12345678");
        let records = vec![record.clone()];
        assert!(validate(&records[0], 0, &records, &ctx()).is_empty());

        record.set(Field::Password, "1234567");
        let records = vec![record];
        let errors = validate(&records[0], 0, &records, &ctx());
        assert_eq!(messages(&errors), vec!["Password must be at least 8 characters"]);
    }

    #[test]
    fn test_role_and_status_enumerations() {
        let mut record = ann();
        record.set(Field::Role, "Moderator");
        record.set(Field::Status, "archived");
        let records = vec![record];
        let errors = validate(&records[0], 0, &records, &ctx());
        assert_eq!(
            messages(&errors),
            vec![
                "Invalid role. Must be one of: admin, instructor, learner, owner",
                "Invalid status. Must be one of: active, pending, suspended",
            ]
        );
    }

    #[test]
    fn test_birth_date() {
        assert!(parse_birth_date("1990-01-15").is_some());
        assert!(parse_birth_date("01/15/1990").is_some());
        assert!(parse_birth_date("1990-01-15T00:00:00Z").is_some());
        assert!(parse_birth_date("1990-02-30").is_none());
        assert!(parse_birth_date("yesterday").is_none());

        let mut record = ann();
        record.set(Field::BirthDate, "15.01.1990");
        let records = vec![record];
        let errors = validate(&records[0], 0, &records, &ctx());
        assert_eq!(messages(&errors), vec!["Invalid birth date format (use YYYY-MM-DD)"]);
    }

    #[test]
    fn test_unknown_course_id_reported_individually() {
        let mut record = ann();
        record.set(Field::CourseIds, "course1,course99");
        let records = vec![record];
        let errors = validate(&records[0], 0, &records, &ctx());
        assert_eq!(messages(&errors), vec!["Invalid course ID: course99"]);
    }

    #[test]
    fn test_revalidation_is_idempotent() {
        let mut record = ann();
        record.set(Field::Email, "bad");
        record.set(Field::CourseIds, "x,y");
        let records = vec![record];
        let first = validate(&records[0], 0, &records, &ctx());
        let second = validate(&records[0], 0, &records, &ctx());
        assert_eq!(first, second);
        assert_eq!(first.len(), 3);
    }

    #[test]
    fn test_template_examples_are_valid() {
        let records = crate::parser::parse_records(&crate::parser::build_template().unwrap());
        assert_eq!(records.len(), 2);
        let ctx = ValidationContext::new(Vec::<String>::new(), ["course1", "course2"]);
        assert!(validate_all(&records, &ctx).is_empty());
    }
}
