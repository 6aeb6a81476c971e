//! Domain models for the Rosterload import pipeline.
//!
//! This module contains the core data structures used throughout the pipeline:
//!
//! - [`Field`] - Canonical column names of the import template
//! - [`ImportRecord`] - One parsed row, mapped to canonical fields
//! - [`UserId`] - Identifier assigned by the backend once a user is created
//! - [`Role`] / [`Status`] - Allowed account enumerations
//! - [`NewUser`], [`CreatedUser`], [`Course`], [`UserSummary`], [`NewMessage`],
//!   [`BulkCreateResponse`] - Wire payloads of the remote LMS API

use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;
use std::fmt;

// =============================================================================
// Canonical Fields
// =============================================================================

/// A canonical column of the import template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Field {
    FirstName,
    LastName,
    Email,
    Password,
    Role,
    BirthDate,
    Status,
    Department,
    CourseIds,
}

impl Field {
    /// All fields, in template column order.
    pub const ALL: [Field; 9] = [
        Field::FirstName,
        Field::LastName,
        Field::Email,
        Field::Password,
        Field::Role,
        Field::BirthDate,
        Field::Status,
        Field::Department,
        Field::CourseIds,
    ];

    /// Fields that must be non-empty for a record to be saved.
    pub const REQUIRED: [Field; 5] = [
        Field::FirstName,
        Field::LastName,
        Field::Email,
        Field::Password,
        Field::Role,
    ];

    /// Column name as it appears in the header row.
    pub fn as_str(&self) -> &'static str {
        match self {
            Field::FirstName => "firstName",
            Field::LastName => "lastName",
            Field::Email => "email",
            Field::Password => "password",
            Field::Role => "role",
            Field::BirthDate => "birthDate",
            Field::Status => "status",
            Field::Department => "department",
            Field::CourseIds => "courseIds",
        }
    }

    /// Match a header cell to a field. Exact, case-sensitive.
    pub fn from_column(name: &str) -> Option<Self> {
        Field::ALL.into_iter().find(|f| f.as_str() == name)
    }
}

impl fmt::Display for Field {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// =============================================================================
// Identifiers
// =============================================================================

/// Identifier of a persisted user (or course) on the backend.
///
/// The backend may send ids as JSON strings or numbers; both are kept as text.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for UserId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        UserId(s.to_string())
    }
}

impl<'de> Deserialize<'de> for UserId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_flexible_id(deserializer).map(UserId)
    }
}

/// Accept a string or a number and return it as text.
pub fn deserialize_flexible_id<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    match Value::deserialize(deserializer)? {
        Value::String(s) => Ok(s),
        Value::Number(n) => Ok(n.to_string()),
        other => Err(serde::de::Error::custom(format!(
            "expected string or number id, got {}",
            other
        ))),
    }
}

// =============================================================================
// Role / Status
// =============================================================================

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    Instructor,
    #[default]
    Learner,
    Owner,
}

impl Role {
    pub const ALL: [Role; 4] = [Role::Admin, Role::Instructor, Role::Learner, Role::Owner];

    /// Parse a role name, ignoring case and surrounding whitespace.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "admin" => Some(Self::Admin),
            "instructor" => Some(Self::Instructor),
            "learner" => Some(Self::Learner),
            "owner" => Some(Self::Owner),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Admin => "admin",
            Self::Instructor => "instructor",
            Self::Learner => "learner",
            Self::Owner => "owner",
        }
    }
}

/// Account status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    #[default]
    Active,
    Pending,
    Suspended,
}

impl Status {
    pub const ALL: [Status; 3] = [Status::Active, Status::Pending, Status::Suspended];

    /// Parse a status name, ignoring case and surrounding whitespace.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().as_str() {
            "active" => Some(Self::Active),
            "pending" => Some(Self::Pending),
            "suspended" => Some(Self::Suspended),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Pending => "pending",
            Self::Suspended => "suspended",
        }
    }
}

/// Comma-joined list of names, as shown in validation messages.
pub fn enumeration<T: Copy>(items: &[T], name: fn(&T) -> &'static str) -> String {
    items.iter().map(name).collect::<Vec<_>>().join(", ")
}

// =============================================================================
// Import Record
// =============================================================================

/// One row of an import file, mapped to canonical fields.
///
/// Empty cells are stored as `None`. Once `id` is set the record has been
/// created on the backend and the pipeline never submits it again.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ImportRecord {
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub id: Option<UserId>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub first_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub last_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub email: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub password: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub role: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub birth_date: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub status: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub department: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub course_ids: Option<String>,
}

impl ImportRecord {
    /// Build a record from `(field, value)` pairs.
    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (Field, &'a str)>) -> Self {
        let mut record = Self::default();
        for (field, value) in pairs {
            record.set(field, value);
        }
        record
    }

    fn slot(&self, field: Field) -> &Option<String> {
        match field {
            Field::FirstName => &self.first_name,
            Field::LastName => &self.last_name,
            Field::Email => &self.email,
            Field::Password => &self.password,
            Field::Role => &self.role,
            Field::BirthDate => &self.birth_date,
            Field::Status => &self.status,
            Field::Department => &self.department,
            Field::CourseIds => &self.course_ids,
        }
    }

    fn slot_mut(&mut self, field: Field) -> &mut Option<String> {
        match field {
            Field::FirstName => &mut self.first_name,
            Field::LastName => &mut self.last_name,
            Field::Email => &mut self.email,
            Field::Password => &mut self.password,
            Field::Role => &mut self.role,
            Field::BirthDate => &mut self.birth_date,
            Field::Status => &mut self.status,
            Field::Department => &mut self.department,
            Field::CourseIds => &mut self.course_ids,
        }
    }

    /// Current value of a field; blank values read as absent.
    pub fn get(&self, field: Field) -> Option<&str> {
        self.slot(field)
            .as_deref()
            .filter(|v| !v.trim().is_empty())
    }

    /// Set a field. An empty value clears it.
    pub fn set(&mut self, field: Field, value: impl Into<String>) {
        let value = value.into();
        *self.slot_mut(field) = if value.is_empty() { None } else { Some(value) };
    }

    /// Whether the backend has already created this user.
    pub fn is_saved(&self) -> bool {
        self.id.is_some()
    }

    /// Lower-cased email, for uniqueness checks.
    pub fn email_key(&self) -> Option<String> {
        self.get(Field::Email).map(|e| e.to_lowercase())
    }

    /// Course ids: comma separated, trimmed, empties dropped.
    pub fn course_id_list(&self) -> Vec<String> {
        self.get(Field::CourseIds)
            .map(|ids| {
                ids.split(',')
                    .map(str::trim)
                    .filter(|id| !id.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Case-insensitive substring match on first name, last name and email.
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        [Field::FirstName, Field::LastName, Field::Email]
            .iter()
            .any(|f| {
                self.get(*f)
                    .map(|v| v.to_lowercase().contains(&query))
                    .unwrap_or(query.is_empty())
            })
    }
}

// =============================================================================
// Wire Payloads
// =============================================================================

/// Body of the create-user call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewUser {
    pub first_name: String,
    pub last_name: String,
    pub email: String,
    pub password: String,
    pub role: Role,
    pub birth_date: Option<String>,
    pub status: Status,
    pub department: Option<String>,
}

/// Response of the create-user call. Extra fields are ignored.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CreatedUser {
    pub id: UserId,
    #[serde(default)]
    pub email: Option<String>,
}

/// A course as listed by the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Course {
    #[serde(deserialize_with = "deserialize_flexible_id")]
    pub id: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// A user as listed by the backend.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct UserSummary {
    pub id: UserId,
    pub email: String,
}

/// Body of the send-message call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NewMessage {
    pub recipient_id: UserId,
    pub subject: String,
    pub content: String,
    #[serde(rename = "type")]
    pub kind: String,
}

impl NewMessage {
    /// Welcome notification for a freshly created account.
    pub fn welcome(recipient_id: UserId, first_name: &str, email: &str) -> Self {
        Self {
            recipient_id,
            subject: "Welcome to Our Platform!".to_string(),
            content: format!(
                "Hello {},\n\nWelcome to our platform! Your account has been created successfully.\n\nUsername: {}\n\nPlease login to get started.",
                first_name, email
            ),
            kind: "welcome".to_string(),
        }
    }
}

/// One user reported as created by the bulk endpoint.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct BulkCreatedUser {
    pub id: UserId,
    pub email: String,
}

/// Response of the bulk-create call.
///
/// The backend uses snake_case; camelCase aliases are accepted too.
#[derive(Debug, Clone, PartialEq, Deserialize, Default)]
pub struct BulkCreateResponse {
    #[serde(default)]
    pub success: bool,
    #[serde(default, alias = "createdCount")]
    pub created_count: usize,
    #[serde(default, alias = "createdUsers")]
    pub created_users: Vec<BulkCreatedUser>,
    #[serde(default)]
    pub errors: Vec<Value>,
    #[serde(default)]
    pub error: Option<String>,
}

// =============================================================================
// Tests
// =============================================================================
