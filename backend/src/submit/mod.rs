//! Committing staged records to the LMS.
//!
//! Two paths are offered:
//!
//! - [`SubmissionCoordinator::save_selected`] creates the record open in the
//!   session immediately, through the single-user endpoint.
//! - [`SubmissionCoordinator::submit_batch`] sends every record still
//!   lacking an id as one CSV payload to the bulk endpoint.
//!
//! After each successful creation the follow-up calls (course enrollments,
//! then the welcome message) are driven by a small [`SideEffects`] state
//! machine. Everything runs strictly sequentially, one remote call at a
//! time. A failing user never stops the next one, and nothing is rolled
//! back or retried.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

use crate::api::logs::{log_info, log_row, log_success, log_warning, LogLevel};
use crate::client::{load_context, LmsApi};
use crate::error::{ApiError, ImportError, ImportResult};
use crate::models::{Field, ImportRecord, NewMessage, NewUser, Role, Status, UserId};
use crate::parser::{parse_file, records_to_csv};
use crate::report::{normalize_errors, Detail, ImportOutcome};
use crate::session::StagingSession;
use crate::validation::{parse_birth_date, row_number};

/// Headline used when a batch request fails as a whole.
const BATCH_FAILED: &str = "Error processing file";

/// Options shared by both commit paths.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubmitOptions {
    /// Send a welcome message to every created user
    pub send_welcome: bool,
}

impl Default for SubmitOptions {
    fn default() -> Self {
        Self { send_welcome: true }
    }
}

/// Build the create-user payload from a validated record.
///
/// Names and email are trimmed, the birth date is re-formatted as
/// `YYYY-MM-DD`, role defaults to learner and status to active.
pub fn normalize_user(record: &ImportRecord) -> NewUser {
    let text = |f: Field| record.get(f).map(|v| v.trim().to_string()).unwrap_or_default();

    NewUser {
        first_name: text(Field::FirstName),
        last_name: text(Field::LastName),
        email: text(Field::Email),
        password: record.get(Field::Password).unwrap_or_default().to_string(),
        role: record.get(Field::Role).and_then(Role::parse).unwrap_or_default(),
        birth_date: record
            .get(Field::BirthDate)
            .and_then(parse_birth_date)
            .map(|d| d.format("%Y-%m-%d").to_string()),
        status: record.get(Field::Status).and_then(Status::parse).unwrap_or_default(),
        department: record.get(Field::Department).map(|d| d.trim().to_string()),
    }
}

fn describe(err: &ApiError) -> String {
    err.details()
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

// =============================================================================
// Side-Effect State Machine
// =============================================================================

/// Which follow-up call failed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "kind")]
pub enum SideEffectStage {
    Enrollment { course_id: String },
    Notification,
}

impl fmt::Display for SideEffectStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SideEffectStage::Enrollment { course_id } => write!(f, "enrollment in {}", course_id),
            SideEffectStage::Notification => f.write_str("welcome message"),
        }
    }
}

/// Progress of the follow-up calls for one created user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffectState {
    Created,
    /// Next course to enroll, as an index into the course list
    Enrolling(usize),
    Notifying,
    Done,
    Failed { stage: SideEffectStage, error: String },
}

/// Follow-up calls for one created user: enroll in each course, then notify.
#[derive(Debug, Clone)]
pub struct SideEffects {
    user_id: UserId,
    first_name: String,
    email: String,
    course_ids: Vec<String>,
    send_welcome: bool,
    state: SideEffectState,
    enrolled: Vec<String>,
    notified: bool,
}

/// What the follow-up calls achieved.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct SideEffectReport {
    pub enrolled: Vec<String>,
    pub notified: bool,
    pub error: Option<String>,
}

impl SideEffects {
    pub fn new(
        user_id: UserId,
        first_name: impl Into<String>,
        email: impl Into<String>,
        course_ids: Vec<String>,
        send_welcome: bool,
    ) -> Self {
        Self {
            user_id,
            first_name: first_name.into(),
            email: email.into(),
            course_ids,
            send_welcome,
            state: SideEffectState::Created,
            enrolled: Vec::new(),
            notified: false,
        }
    }

    /// Side effects for a record the backend created as `user_id`.
    pub fn for_record(user_id: UserId, record: &ImportRecord, send_welcome: bool) -> Self {
        let email = record.get(Field::Email).unwrap_or_default().trim().to_string();
        Self::new(
            user_id,
            record.get(Field::FirstName).unwrap_or_default().trim(),
            email,
            record.course_id_list(),
            send_welcome,
        )
    }

    pub fn state(&self) -> &SideEffectState {
        &self.state
    }

    pub fn is_finished(&self) -> bool {
        matches!(self.state, SideEffectState::Done | SideEffectState::Failed { .. })
    }

    /// State following the enrollment at `next - 1`.
    fn enrolling_from(&self, next: usize) -> SideEffectState {
        if next < self.course_ids.len() {
            SideEffectState::Enrolling(next)
        } else if self.send_welcome {
            SideEffectState::Notifying
        } else {
            SideEffectState::Done
        }
    }

    /// Make the next remote call and advance. Does nothing once finished.
    pub async fn step<C: LmsApi + ?Sized>(&mut self, client: &C) {
        if self.state == SideEffectState::Created {
            self.state = self.enrolling_from(0);
        }
        self.state = match self.state.clone() {
            SideEffectState::Enrolling(i) => {
                let course_id = self.course_ids[i].clone();
                match client.enroll_user_in_course(&course_id, &self.user_id).await {
                    Ok(()) => {
                        self.enrolled.push(course_id);
                        self.enrolling_from(i + 1)
                    }
                    Err(e) => SideEffectState::Failed {
                        stage: SideEffectStage::Enrollment { course_id },
                        error: describe(&e),
                    },
                }
            }
            SideEffectState::Notifying => {
                let message = NewMessage::welcome(self.user_id.clone(), &self.first_name, &self.email);
                match client.send_message(&message).await {
                    Ok(()) => {
                        self.notified = true;
                        SideEffectState::Done
                    }
                    Err(e) => SideEffectState::Failed {
                        stage: SideEffectStage::Notification,
                        error: describe(&e),
                    },
                }
            }
            SideEffectState::Created | SideEffectState::Done | SideEffectState::Failed { .. } => return,
        };
    }

    /// Run to a terminal state.
    pub async fn run<C: LmsApi + ?Sized>(mut self, client: &C) -> SideEffectReport {
        while !self.is_finished() {
            self.step(client).await;
        }
        let error = match self.state {
            SideEffectState::Failed { ref stage, ref error } => Some(format!("{} failed: {}", stage, error)),
            _ => None,
        };
        SideEffectReport {
            enrolled: self.enrolled,
            notified: self.notified,
            error,
        }
    }
}

// =============================================================================
// Commit Outcomes
// =============================================================================

/// Result of committing one record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase", tag = "status")]
pub enum CommitOutcome {
    /// The backend created the user; follow-up calls may still have failed.
    #[serde(rename_all = "camelCase")]
    Created {
        /// File row of the record, when it could be matched
        row: Option<usize>,
        id: UserId,
        email: String,
        enrolled: Vec<String>,
        notified: bool,
        side_effect_error: Option<String>,
    },
    /// The create call was rejected; the record is unchanged.
    #[serde(rename_all = "camelCase")]
    Failed {
        row: usize,
        message: String,
        errors: Vec<String>,
    },
}

impl CommitOutcome {
    fn created(row: Option<usize>, id: UserId, email: String, report: SideEffectReport) -> Self {
        CommitOutcome::Created {
            row,
            id,
            email,
            enrolled: report.enrolled,
            notified: report.notified,
            side_effect_error: report.error,
        }
    }

    pub fn id(&self) -> Option<&UserId> {
        match self {
            CommitOutcome::Created { id, .. } => Some(id),
            CommitOutcome::Failed { .. } => None,
        }
    }

    /// Side-effect failure of a created user, as a detail line.
    fn side_effect_detail(&self) -> Option<Detail> {
        match self {
            CommitOutcome::Created {
                row,
                email,
                side_effect_error: Some(error),
                ..
            } => Some(match row {
                Some(row) => Detail::Row {
                    row: *row as u64,
                    error: format!("{}: {}", email, error),
                },
                None => Detail::Message(format!("{}: {}", email, error)),
            }),
            _ => None,
        }
    }
}

/// Everything a batch submit did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchReport {
    pub created_count: usize,
    pub outcomes: Vec<CommitOutcome>,
    /// Validation errors of unsaved records left out of the request
    pub skipped: Vec<Detail>,
    /// Row errors reported by the backend for records it refused
    pub backend_errors: Vec<Detail>,
}

impl BatchReport {
    /// Operator-facing summary: skipped rows, backend row errors, then
    /// side-effect failures.
    pub fn outcome(&self) -> ImportOutcome {
        ImportOutcome::success(format!("Successfully processed {} users", self.created_count))
            .with_details(self.skipped.iter().cloned())
            .with_details(self.backend_errors.iter().cloned())
            .with_details(self.outcomes.iter().filter_map(CommitOutcome::side_effect_detail))
    }
}

// =============================================================================
// Coordinator
// =============================================================================

/// Drives both commit paths against an [`LmsApi`].
pub struct SubmissionCoordinator<'a, C: LmsApi + ?Sized> {
    client: &'a C,
    options: SubmitOptions,
}

impl<'a, C: LmsApi + ?Sized> SubmissionCoordinator<'a, C> {
    pub fn new(client: &'a C, options: SubmitOptions) -> Self {
        Self { client, options }
    }

    pub fn options(&self) -> SubmitOptions {
        self.options
    }

    /// Create one record, then run its side effects.
    ///
    /// The caller must have validated the record.
    pub async fn save_record(&self, index: usize, record: &ImportRecord) -> CommitOutcome {
        let row = row_number(index);
        let user = normalize_user(record);

        log_row(LogLevel::Info, row, format!("Creating user {}", user.email));
        let created = match self.client.create_user(&user).await {
            Ok(created) => created,
            Err(e) => {
                let errors: Vec<String> = e.details().iter().map(ToString::to_string).collect();
                log_row(LogLevel::Error, row, format!("Create failed: {}", describe(&e)));
                return CommitOutcome::Failed {
                    row,
                    message: e.message_or("Error saving user", "Failed to save user"),
                    errors,
                };
            }
        };

        log_row(LogLevel::Success, row, format!("Created user {} ({})", user.email, created.id));
        let report = SideEffects::for_record(created.id.clone(), record, self.options.send_welcome)
            .run(self.client)
            .await;
        if let Some(ref error) = report.error {
            log_row(LogLevel::Warning, row, error.clone());
        }

        CommitOutcome::created(Some(row), created.id, user.email, report)
    }

    /// Immediately commit the record open in the session.
    ///
    /// On creation the record gets its id and replaces the canonical row,
    /// even if a later enrollment or notification fails: the user exists
    /// and must not be created twice. On a rejected create nothing changes
    /// and the operator can edit and retry.
    pub async fn save_selected(&self, session: &mut StagingSession) -> ImportOutcome {
        let Some(selection) = session.selection() else {
            return ImportOutcome::failure("No user selected");
        };
        if !selection.is_valid() {
            return ImportOutcome::failure("Fix validation errors before saving")
                .with_details(selection.errors.iter().map(Detail::from));
        }
        let index = selection.index;
        if selection.buffer.is_saved() || session.is_saved(index) {
            return ImportOutcome::failure("User already saved");
        }

        let record = selection.buffer.clone();

        match self.save_record(index, &record).await {
            CommitOutcome::Created {
                id,
                email,
                enrolled,
                side_effect_error,
                ..
            } => {
                if let Err(e) = session.commit_selection(id) {
                    return ImportOutcome::failure(e.to_string());
                }
                match side_effect_error {
                    Some(error) => {
                        ImportOutcome::failure(format!("User {} was created but follow-up failed", email))
                            .with_detail(error)
                    }
                    None if enrolled.is_empty() => {
                        ImportOutcome::success(format!("User {} saved successfully", email))
                    }
                    None => ImportOutcome::success(format!("User {} saved successfully", email))
                        .with_detail(format!("Enrolled in courses: {}", enrolled.join(", "))),
                }
            }
            CommitOutcome::Failed { message, errors, .. } => ImportOutcome::failure(message)
                .with_details(errors.into_iter().map(Detail::Message)),
        }
    }

    /// Send every valid unsaved record in one bulk request.
    ///
    /// Invalid records stay staged and are listed in the outcome; the
    /// submit fails only when none of the unsaved records is valid.
    pub async fn submit_batch(&self, session: &mut StagingSession) -> ImportOutcome {
        match self.submit_batch_report(session).await {
            Ok(report) => report.outcome(),
            Err(outcome) => outcome,
        }
    }

    /// Like [`Self::submit_batch`], returning per-record detail.
    ///
    /// `Err` carries the outcome when no bulk request was made or the
    /// request failed as a whole.
    pub async fn submit_batch_report(
        &self,
        session: &mut StagingSession,
    ) -> Result<BatchReport, ImportOutcome> {
        let unsaved: Vec<(usize, ImportRecord)> = session
            .unsaved()
            .into_iter()
            .map(|(i, r)| (i, r.clone()))
            .collect();

        if unsaved.is_empty() {
            return Err(ImportOutcome::success("All users already saved individually"));
        }

        let mut valid = Vec::with_capacity(unsaved.len());
        let mut skipped = Vec::new();
        for (index, record) in unsaved {
            let errors = session.errors_for(index).unwrap_or_default();
            if errors.is_empty() {
                valid.push((index, record));
            } else {
                skipped.extend(errors.iter().map(Detail::from));
            }
        }

        if valid.is_empty() {
            log_warning(format!("No valid users to submit ({} validation errors)", skipped.len()));
            return Err(ImportOutcome::failure("Fix validation errors before submitting").with_details(skipped));
        }
        if !skipped.is_empty() {
            log_warning(format!("Skipping {} validation errors; those rows stay staged", skipped.len()));
        }

        let refs: Vec<&ImportRecord> = valid.iter().map(|(_, r)| r).collect();
        let payload = records_to_csv(&refs)
            .map_err(|e| ImportOutcome::failure(BATCH_FAILED).with_detail(e.to_string()))?;

        log_info(format!("Submitting {} users in one batch...", valid.len()));
        let response = self.client.bulk_create_users(payload).await.map_err(|e| {
            ImportOutcome::failure(BATCH_FAILED).with_details(e.details())
        })?;

        if !response.success {
            return Err(ImportOutcome::failure(
                response.error.clone().unwrap_or_else(|| "Upload failed".to_string()),
            )
            .with_details(response.errors.iter().map(Detail::from_value)));
        }

        let created_count = if response.created_count == 0 {
            response.created_users.len()
        } else {
            response.created_count
        };
        log_success(format!("Backend created {} users", created_count));

        let mut matched = HashSet::new();
        let mut outcomes = Vec::with_capacity(response.created_users.len());

        for created in &response.created_users {
            let key = created.email.trim().to_lowercase();
            let found = valid.iter().find(|(i, r)| {
                !matched.contains(i) && r.email_key().map(|e| e.trim().to_string()).as_deref() == Some(key.as_str())
            });

            let effects = match found {
                Some((index, record)) => {
                    matched.insert(*index);
                    if let Err(e) = session.mark_saved(*index, created.id.clone()) {
                        log_warning(e.to_string());
                    }
                    SideEffects::for_record(created.id.clone(), record, self.options.send_welcome)
                }
                None => {
                    log_warning(format!("Created user {} does not match any staged row", created.email));
                    SideEffects::new(
                        created.id.clone(),
                        created.email.clone(),
                        created.email.clone(),
                        Vec::new(),
                        self.options.send_welcome,
                    )
                }
            };

            let row = found.map(|(i, _)| row_number(*i));
            let report = effects.run(self.client).await;
            if let Some(ref error) = report.error {
                match row {
                    Some(row) => log_row(LogLevel::Warning, row, error.clone()),
                    None => log_warning(error.clone()),
                }
            }
            outcomes.push(CommitOutcome::created(row, created.id.clone(), created.email.clone(), report));
        }

        Ok(BatchReport {
            created_count,
            outcomes,
            skipped,
            backend_errors: response.errors.iter().flat_map(normalize_errors).collect(),
        })
    }
}

/// Parse a file and stage it against the live system's reference data.
pub async fn stage_file<C: LmsApi + ?Sized>(
    client: &C,
    path: &Path,
    page_size: u32,
) -> ImportResult<StagingSession> {
    let parsed = parse_file(path)?;
    if parsed.records.is_empty() {
        return Err(ImportError::EmptyInput);
    }
    log_info(format!(
        "Parsed {} users from {}",
        parsed.records.len(),
        path.display()
    ));
    if !parsed.ignored_columns.is_empty() {
        log_warning(format!("Ignored columns: {}", parsed.ignored_columns.join(", ")));
    }

    let context = load_context(client, page_size).await?;
    Ok(StagingSession::new(parsed.records, context))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ApiResult;
    use crate::models::{BulkCreateResponse, BulkCreatedUser, Course, CreatedUser, UserSummary};
    use crate::validation::ValidationContext;
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// In-memory backend that records every call in order.
    #[derive(Default)]
    struct FakeLms {
        calls: Mutex<Vec<String>>,
        create_results: Mutex<VecDeque<ApiResult<CreatedUser>>>,
        bulk_result: Mutex<Option<ApiResult<BulkCreateResponse>>>,
        bulk_payload: Mutex<Option<String>>,
        failing_courses: Vec<String>,
        fail_messages: bool,
    }

    impl FakeLms {
        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }

        fn push(&self, call: String) {
            self.calls.lock().unwrap().push(call);
        }

        fn with_created(id: &str) -> Self {
            let fake = Self::default();
            fake.create_results.lock().unwrap().push_back(Ok(CreatedUser {
                id: UserId::from(id),
                email: None,
            }));
            fake
        }

        fn with_bulk(result: ApiResult<BulkCreateResponse>) -> Self {
            let fake = Self::default();
            *fake.bulk_result.lock().unwrap() = Some(result);
            fake
        }
    }

    #[async_trait]
    impl LmsApi for FakeLms {
        async fn create_user(&self, user: &NewUser) -> ApiResult<CreatedUser> {
            self.push(format!("create {}", user.email));
            self.create_results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(ApiError::Transport(String::new())))
        }

        async fn bulk_create_users(&self, csv: Vec<u8>) -> ApiResult<BulkCreateResponse> {
            self.push("bulk".to_string());
            *self.bulk_payload.lock().unwrap() = Some(String::from_utf8(csv).unwrap());
            self.bulk_result
                .lock()
                .unwrap()
                .take()
                .unwrap_or_else(|| Err(ApiError::Transport(String::new())))
        }

        async fn enroll_user_in_course(&self, course_id: &str, user_id: &UserId) -> ApiResult<()> {
            self.push(format!("enroll {} {}", user_id, course_id));
            if self.failing_courses.iter().any(|c| c == course_id) {
                return Err(ApiError::Rejected {
                    status: 400,
                    body: json!({ "error": "course full" }),
                });
            }
            Ok(())
        }

        async fn send_message(&self, message: &NewMessage) -> ApiResult<()> {
            self.push(format!("notify {}", message.recipient_id));
            if self.fail_messages {
                return Err(ApiError::Transport("connection reset".into()));
            }
            Ok(())
        }

        async fn list_courses(&self) -> ApiResult<Vec<Course>> {
            Ok(Vec::new())
        }

        async fn list_users(&self, _page_size: u32) -> ApiResult<Vec<UserSummary>> {
            Ok(Vec::new())
        }
    }

    fn user(first: &str, email: &str, courses: &str) -> ImportRecord {
        ImportRecord::from_pairs([
            (Field::FirstName, first),
            (Field::LastName, "Lee"),
            (Field::Email, email),
            (Field::Password, "Secure123"),
            (Field::Role, "learner"),
            (Field::CourseIds, courses),
        ])
    }

    fn session(records: Vec<ImportRecord>) -> StagingSession {
        StagingSession::new(records, ValidationContext::new(["taken@x.com"], ["course1", "course2"]))
    }

    fn bulk_ok(users: &[(&str, &str)], errors: Vec<Value>) -> ApiResult<BulkCreateResponse> {
        Ok(BulkCreateResponse {
            success: true,
            created_count: users.len(),
            created_users: users
                .iter()
                .map(|(id, email)| BulkCreatedUser {
                    id: UserId::from(*id),
                    email: email.to_string(),
                })
                .collect(),
            errors,
            error: None,
        })
    }

    #[test]
    fn test_normalize_user_defaults() {
        let mut record = ImportRecord::from_pairs([
            (Field::FirstName, " Ann "),
            (Field::LastName, "Lee"),
            (Field::Email, " Ann@X.com "),
            (Field::Password, "Secure123"),
            (Field::BirthDate, "01/15/1990"),
        ]);
        let user = normalize_user(&record);
        assert_eq!(user.first_name, "Ann");
        assert_eq!(user.email, "Ann@X.com");
        assert_eq!(user.role, Role::Learner);
        assert_eq!(user.status, Status::Active);
        assert_eq!(user.birth_date.as_deref(), Some("1990-01-15"));
        assert_eq!(user.department, None);

        record.set(Field::Role, "Instructor");
        record.set(Field::Status, "PENDING");
        let user = normalize_user(&record);
        assert_eq!(user.role, Role::Instructor);
        assert_eq!(user.status, Status::Pending);
    }

    #[tokio::test]
    async fn test_side_effects_order() {
        let fake = FakeLms::default();
        let effects = SideEffects::new(UserId::from("7"), "Ann", "ann@x.com", vec!["c1".into(), "c2".into()], true);

        let report = effects.run(&fake).await;
        assert_eq!(fake.calls(), vec!["enroll 7 c1", "enroll 7 c2", "notify 7"]);
        assert_eq!(report.enrolled, vec!["c1", "c2"]);
        assert!(report.notified);
        assert_eq!(report.error, None);
    }

    #[tokio::test]
    async fn test_side_effects_stop_at_first_failure() {
        let fake = FakeLms {
            failing_courses: vec!["c1".into()],
            ..FakeLms::default()
        };
        let mut effects = SideEffects::new(UserId::from("7"), "Ann", "ann@x.com", vec!["c1".into(), "c2".into()], true);

        assert_eq!(effects.state(), &SideEffectState::Created);
        effects.step(&fake).await;
        assert!(matches!(effects.state(), SideEffectState::Failed { stage: SideEffectStage::Enrollment { .. }, .. }));

        let report = effects.run(&fake).await;
        assert_eq!(fake.calls(), vec!["enroll 7 c1"]);
        assert_eq!(report.error.as_deref(), Some("enrollment in c1 failed: course full"));
    }

    #[tokio::test]
    async fn test_side_effects_without_welcome() {
        let fake = FakeLms::default();
        let report = SideEffects::new(UserId::from("7"), "Ann", "ann@x.com", Vec::new(), false)
            .run(&fake)
            .await;
        assert!(fake.calls().is_empty());
        assert!(!report.notified);
    }

    #[tokio::test]
    async fn test_save_selected_assigns_id() {
        let fake = FakeLms::with_created("101");
        let mut s = session(vec![user("Ann", "ann@x.com", "")]);
        s.select(0).unwrap();

        let coordinator = SubmissionCoordinator::new(&fake, SubmitOptions::default());
        let outcome = coordinator.save_selected(&mut s).await;

        assert!(outcome.success, "{}", outcome);
        assert_eq!(outcome.message, "User ann@x.com saved successfully");
        assert_eq!(s.records()[0].id, Some(UserId::from("101")));
        assert!(s.selection().is_none());
        assert_eq!(fake.calls(), vec!["create ann@x.com", "notify 101"]);
    }

    #[tokio::test]
    async fn test_save_selected_enrolls_and_reports_courses() {
        let fake = FakeLms::with_created("5");
        let mut s = session(vec![user("Ann", "ann@x.com", "course1,course2")]);
        s.select(0).unwrap();

        let coordinator = SubmissionCoordinator::new(&fake, SubmitOptions { send_welcome: false });
        let outcome = coordinator.save_selected(&mut s).await;

        assert_eq!(outcome.details, vec![Detail::Message("Enrolled in courses: course1, course2".into())]);
        assert_eq!(fake.calls(), vec!["create ann@x.com", "enroll 5 course1", "enroll 5 course2"]);
    }

    #[tokio::test]
    async fn test_save_selected_refuses_invalid_record() {
        let fake = FakeLms::with_created("1");
        let mut s = session(vec![user("Ann", "ann@x.com", ""), user("Bob", "ann@x.com", "")]);
        s.select(1).unwrap();

        let coordinator = SubmissionCoordinator::new(&fake, SubmitOptions::default());
        let outcome = coordinator.save_selected(&mut s).await;

        assert!(!outcome.success);
        assert_eq!(outcome.row_errors().collect::<Vec<_>>(), vec![(3, "Duplicate email in upload batch")]);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_save_selected_backend_rejection_keeps_record_editable() {
        let fake = FakeLms::default();
        fake.create_results.lock().unwrap().push_back(Err(ApiError::Rejected {
            status: 400,
            body: json!({ "error": "Email already registered", "errors": ["email: already registered"] }),
        }));
        let mut s = session(vec![user("Ann", "ann@x.com", "")]);
        s.select(0).unwrap();

        let coordinator = SubmissionCoordinator::new(&fake, SubmitOptions::default());
        let outcome = coordinator.save_selected(&mut s).await;

        assert!(!outcome.success);
        assert_eq!(outcome.message, "Email already registered");
        assert_eq!(outcome.details, vec![Detail::Message("email: already registered".into())]);
        assert!(!s.records()[0].is_saved());
        assert!(s.selection().is_some());
    }

    #[tokio::test]
    async fn test_save_selected_rejection_without_error_message() {
        let fake = FakeLms::default();
        fake.create_results.lock().unwrap().push_back(Err(ApiError::Rejected {
            status: 422,
            body: json!({ "errors": ["password: too weak"] }),
        }));
        let mut s = session(vec![user("Ann", "ann@x.com", "")]);
        s.select(0).unwrap();

        let outcome = SubmissionCoordinator::new(&fake, SubmitOptions::default())
            .save_selected(&mut s)
            .await;
        assert_eq!(outcome.message, "Error saving user");
        assert_eq!(outcome.details, vec![Detail::Message("password: too weak".into())]);
    }

    #[tokio::test]
    async fn test_save_selected_network_error() {
        let fake = FakeLms::default();
        let mut s = session(vec![user("Ann", "ann@x.com", "")]);
        s.select(0).unwrap();

        let outcome = SubmissionCoordinator::new(&fake, SubmitOptions::default())
            .save_selected(&mut s)
            .await;
        assert_eq!(outcome.message, "Failed to save user");
        assert_eq!(outcome.details, vec![Detail::Message("Network error".into())]);
    }

    #[tokio::test]
    async fn test_save_selected_side_effect_failure_keeps_id() {
        let fake = FakeLms {
            fail_messages: true,
            ..FakeLms::with_created("9")
        };
        let mut s = session(vec![user("Ann", "ann@x.com", "course1")]);
        s.select(0).unwrap();

        let outcome = SubmissionCoordinator::new(&fake, SubmitOptions::default())
            .save_selected(&mut s)
            .await;

        assert!(!outcome.success);
        assert_eq!(s.records()[0].id, Some(UserId::from("9")));
        assert_eq!(fake.calls(), vec!["create ann@x.com", "enroll 9 course1", "notify 9"]);
    }

    #[tokio::test]
    async fn test_batch_nothing_unsaved() {
        let fake = FakeLms::default();
        let mut s = session(vec![user("Ann", "ann@x.com", "")]);
        s.mark_saved(0, UserId::from("1")).unwrap();

        let outcome = SubmissionCoordinator::new(&fake, SubmitOptions::default())
            .submit_batch(&mut s)
            .await;
        assert!(outcome.success);
        assert_eq!(outcome.message, "All users already saved individually");
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_batch_sends_valid_records_around_duplicates() {
        let fake = FakeLms::with_bulk(bulk_ok(&[("7", "cid@x.com")], Vec::new()));
        let mut s = session(vec![
            user("Ann", "dup@x.com", ""),
            user("Bob", "dup@x.com", ""),
            user("Cid", "cid@x.com", ""),
        ]);

        let outcome = SubmissionCoordinator::new(&fake, SubmitOptions { send_welcome: false })
            .submit_batch(&mut s)
            .await;

        assert!(outcome.success, "{}", outcome);
        assert_eq!(outcome.message, "Successfully processed 1 users");
        let rows: Vec<u64> = outcome.row_errors().map(|(r, _)| r).collect();
        assert_eq!(rows, vec![2, 3]);

        let payload = fake.bulk_payload.lock().unwrap().clone().unwrap();
        assert!(payload.contains("cid@x.com"));
        assert!(!payload.contains("dup@x.com"));
        assert_eq!(s.records()[2].id, Some(UserId::from("7")));
        assert_eq!(s.unsaved().len(), 2);
    }

    #[tokio::test]
    async fn test_batch_with_no_valid_records_sends_nothing() {
        let fake = FakeLms::with_bulk(bulk_ok(&[], Vec::new()));
        let mut s = session(vec![user("Ann", "dup@x.com", ""), user("Bob", "dup@x.com", "")]);

        let outcome = SubmissionCoordinator::new(&fake, SubmitOptions::default())
            .submit_batch(&mut s)
            .await;

        assert!(!outcome.success);
        assert_eq!(outcome.message, "Fix validation errors before submitting");
        let rows: Vec<u64> = outcome.row_errors().map(|(r, _)| r).collect();
        assert_eq!(rows, vec![2, 3]);
        assert!(fake.calls().is_empty());
    }

    #[tokio::test]
    async fn test_save_after_batch_does_not_create_twice() {
        let fake = FakeLms {
            bulk_result: Mutex::new(Some(bulk_ok(&[("1", "ann@x.com")], Vec::new()))),
            ..FakeLms::with_created("2")
        };
        let mut s = session(vec![user("Ann", "ann@x.com", "")]);
        s.select(0).unwrap();

        let coordinator = SubmissionCoordinator::new(&fake, SubmitOptions { send_welcome: false });
        assert!(coordinator.submit_batch(&mut s).await.success);

        let outcome = coordinator.save_selected(&mut s).await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "User already saved");
        assert_eq!(fake.calls(), vec!["bulk"]);
        assert_eq!(s.records()[0].id, Some(UserId::from("1")));
    }

    #[tokio::test]
    async fn test_batch_mixed_result() {
        let fake = FakeLms::with_bulk(bulk_ok(
            &[("1", "ann@x.com"), ("2", "bob@x.com")],
            vec![json!({ "row": 4, "error": "Email already exists" })],
        ));
        let mut s = session(vec![
            user("Ann", "ann@x.com", "course1"),
            user("Bob", "bob@x.com", "course1,course2"),
            user("Cid", "cid@x.com", ""),
        ]);

        let coordinator = SubmissionCoordinator::new(&fake, SubmitOptions::default());
        let report = coordinator.submit_batch_report(&mut s).await.unwrap();
        let outcome = report.outcome();

        assert!(outcome.success);
        assert_eq!(outcome.message, "Successfully processed 2 users");
        assert_eq!(outcome.details, vec![Detail::Row { row: 4, error: "Email already exists".into() }]);
        assert_eq!(
            fake.calls(),
            vec![
                "bulk",
                "enroll 1 course1",
                "notify 1",
                "enroll 2 course1",
                "enroll 2 course2",
                "notify 2",
            ]
        );
        assert_eq!(s.records()[0].id, Some(UserId::from("1")));
        assert_eq!(s.records()[1].id, Some(UserId::from("2")));
        assert!(!s.records()[2].is_saved());
        assert_eq!(s.unsaved().len(), 1);
    }

    #[tokio::test]
    async fn test_batch_side_effect_failure_does_not_stop_next_user() {
        let fake = FakeLms {
            failing_courses: vec!["course1".into()],
            ..FakeLms::with_bulk(bulk_ok(&[("1", "ann@x.com"), ("2", "bob@x.com")], Vec::new()))
        };
        let mut s = session(vec![
            user("Ann", "ann@x.com", "course1,course2"),
            user("Bob", "bob@x.com", "course2"),
        ]);

        let outcome = SubmissionCoordinator::new(&fake, SubmitOptions { send_welcome: false })
            .submit_batch(&mut s)
            .await;

        assert!(outcome.success);
        assert_eq!(fake.calls(), vec!["bulk", "enroll 1 course1", "enroll 2 course2"]);
        assert_eq!(
            outcome.details,
            vec![Detail::Row {
                row: 2,
                error: "ann@x.com: enrollment in course1 failed: course full".into()
            }]
        );
    }

    #[tokio::test]
    async fn test_batch_excludes_saved_records() {
        let fake = FakeLms::with_bulk(bulk_ok(&[("2", "bob@x.com")], Vec::new()));
        let mut s = session(vec![user("Ann", "ann@x.com", ""), user("Bob", "bob@x.com", "")]);
        s.mark_saved(0, UserId::from("1")).unwrap();
        s.select(0).unwrap();
        s.edit_field(Field::LastName, "Changed").unwrap();

        SubmissionCoordinator::new(&fake, SubmitOptions { send_welcome: false })
            .submit_batch(&mut s)
            .await;

        let payload = fake.bulk_payload.lock().unwrap().clone().unwrap();
        assert!(payload.contains("bob@x.com"));
        assert!(!payload.contains("ann@x.com"));
        assert!(!payload.contains("Changed"));
    }

    #[tokio::test]
    async fn test_batch_backend_refusal() {
        let fake = FakeLms::with_bulk(Ok(BulkCreateResponse {
            success: false,
            error: Some("Invalid CSV".into()),
            errors: vec![json!("missing header")],
            ..BulkCreateResponse::default()
        }));
        let mut s = session(vec![user("Ann", "ann@x.com", "")]);

        let outcome = SubmissionCoordinator::new(&fake, SubmitOptions::default())
            .submit_batch(&mut s)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Invalid CSV");
        assert_eq!(outcome.details, vec![Detail::Message("missing header".into())]);
        assert!(!s.records()[0].is_saved());
    }

    #[tokio::test]
    async fn test_batch_transport_failure() {
        let fake = FakeLms::with_bulk(Err(ApiError::Transport(String::new())));
        let mut s = session(vec![user("Ann", "ann@x.com", "")]);

        let outcome = SubmissionCoordinator::new(&fake, SubmitOptions::default())
            .submit_batch(&mut s)
            .await;
        assert!(!outcome.success);
        assert_eq!(outcome.message, "Error processing file");
        assert_eq!(outcome.details, vec![Detail::Message("Network error".into())]);
    }

    #[tokio::test]
    async fn test_stage_file_from_template() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), crate::parser::build_template().unwrap()).unwrap();

        let fake = FakeLms::default();
        let mut s = stage_file(&fake, file.path(), 1000).await.unwrap();
        assert_eq!(s.len(), 2);
        // no courses known to the fake, so John Doe's course ids are flagged
        let invalid: Vec<usize> = s.revalidate_all().into_iter().map(|(i, _)| i).collect();
        assert_eq!(invalid, vec![0]);
    }

    #[tokio::test]
    async fn test_stage_file_header_only() {
        let file = tempfile::NamedTempFile::new().unwrap();
        std::fs::write(file.path(), "firstName,lastName,email,password,role\n").unwrap();

        let err = stage_file(&FakeLms::default(), file.path(), 1000).await.unwrap_err();
        assert!(matches!(err, ImportError::EmptyInput));
    }
}
