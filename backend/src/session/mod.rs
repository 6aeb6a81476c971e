//! Editable staging area for one import workflow.
//!
//! A [`StagingSession`] owns the parsed records, the reference data they are
//! validated against, the operator's current selection and the display
//! filter. It has a single writer: the operator driving the import.
//!
//! Selecting a row copies it into an edit buffer; edits go to the buffer and
//! re-validate it immediately. The canonical record is only replaced when
//! the buffer is committed after a successful save.
//!
//! Only the edited record is re-validated eagerly. A duplicate email
//! introduced or resolved by an edit shows up on the *other* row the next
//! time that row is selected (or on [`StagingSession::revalidate_all`]).

use serde::Serialize;

use crate::error::{SessionError, SessionResult};
use crate::models::{Field, ImportRecord, UserId};
use crate::validation::{validate, validate_all, ValidationContext, ValidationError};

/// The record currently open for editing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Selection {
    /// Index into the canonical record list
    pub index: usize,
    /// Working copy being edited
    pub buffer: ImportRecord,
    /// Live errors of the working copy
    pub errors: Vec<ValidationError>,
}

impl Selection {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct StagingSession {
    records: Vec<ImportRecord>,
    context: ValidationContext,
    selection: Option<Selection>,
    query: String,
}

impl StagingSession {
    pub fn new(records: Vec<ImportRecord>, context: ValidationContext) -> Self {
        Self {
            records,
            context,
            selection: None,
            query: String::new(),
        }
    }

    pub fn records(&self) -> &[ImportRecord] {
        &self.records
    }

    pub fn record(&self, index: usize) -> Option<&ImportRecord> {
        self.records.get(index)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn context(&self) -> &ValidationContext {
        &self.context
    }

    pub fn selection(&self) -> Option<&Selection> {
        self.selection.as_ref()
    }

    /// Records without a backend id, with their indices.
    pub fn unsaved(&self) -> Vec<(usize, &ImportRecord)> {
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| !r.is_saved())
            .collect()
    }

    fn check_row(&self, index: usize) -> SessionResult<()> {
        if index < self.records.len() {
            Ok(())
        } else {
            Err(SessionError::RowOutOfRange { row: index, len: self.records.len() })
        }
    }

    /// Errors of the record at `index` as it currently stands.
    pub fn errors_for(&self, index: usize) -> SessionResult<Vec<ValidationError>> {
        self.check_row(index)?;
        Ok(validate(&self.records[index], index, &self.records, &self.context))
    }

    /// Open a record for editing and compute its errors.
    pub fn select(&mut self, index: usize) -> SessionResult<&Selection> {
        self.check_row(index)?;
        let buffer = self.records[index].clone();
        let errors = validate(&buffer, index, &self.records, &self.context);
        Ok(&*self.selection.insert(Selection { index, buffer, errors }))
    }

    /// Change one field of the selected record and re-validate it.
    ///
    /// The buffer is checked against the canonical records with its own row
    /// replaced by the buffer, so a changed email is compared to everyone
    /// else's current email.
    pub fn edit_field(&mut self, field: Field, value: impl Into<String>) -> SessionResult<&Selection> {
        let selection = self.selection.as_mut().ok_or(SessionError::NoSelection)?;
        selection.buffer.set(field, value);

        let mut snapshot = self.records.clone();
        snapshot[selection.index] = selection.buffer.clone();
        selection.errors = validate(&selection.buffer, selection.index, &snapshot, &self.context);

        Ok(&*selection)
    }

    /// Drop the current selection without saving.
    pub fn clear_selection(&mut self) {
        self.selection = None;
    }

    /// Delete a record. The caller is responsible for operator confirmation.
    ///
    /// A selection on the removed row is cleared; a selection further down
    /// the list follows its record.
    pub fn remove(&mut self, index: usize) -> SessionResult<ImportRecord> {
        self.check_row(index)?;
        let removed = self.records.remove(index);

        let selected = self.selection.as_ref().map(|s| s.index);
        if selected == Some(index) {
            self.selection = None;
        } else if let Some(s) = self.selection.as_mut().filter(|s| s.index > index) {
            s.index -= 1;
            for e in &mut s.errors {
                e.row -= 1;
            }
        }

        Ok(removed)
    }

    /// Records matching `query` (case-insensitive, on names and email).
    pub fn filter(&self, query: &str) -> Vec<(usize, &ImportRecord)> {
        let query = query.trim();
        self.records
            .iter()
            .enumerate()
            .filter(|(_, r)| r.matches(query))
            .collect()
    }

    pub fn set_query(&mut self, query: impl Into<String>) {
        self.query = query.into();
    }

    pub fn query(&self) -> &str {
        &self.query
    }

    /// Records matching the current display filter.
    pub fn visible(&self) -> Vec<(usize, &ImportRecord)> {
        self.filter(&self.query)
    }

    /// Whether the canonical record at `index` has a backend id.
    pub fn is_saved(&self, index: usize) -> bool {
        self.records.get(index).map_or(false, ImportRecord::is_saved)
    }

    /// Store the edited buffer back with its new backend id.
    ///
    /// Refused when the canonical record already has an id; the selection
    /// is left in place.
    pub fn commit_selection(&mut self, id: UserId) -> SessionResult<usize> {
        let index = self.selection.as_ref().ok_or(SessionError::NoSelection)?.index;
        if self.is_saved(index) {
            return Err(SessionError::AlreadySaved { row: index });
        }

        let selection = self.selection.take().ok_or(SessionError::NoSelection)?;
        let mut record = selection.buffer;
        record.id = Some(id);
        self.records[index] = record;
        Ok(index)
    }

    /// Record the backend id of a user created by a batch submit.
    ///
    /// A record that already has an id keeps it. An open selection on the
    /// same row gets the id too.
    pub fn mark_saved(&mut self, index: usize, id: UserId) -> SessionResult<()> {
        self.check_row(index)?;
        let record = &mut self.records[index];
        if record.id.is_some() {
            return Ok(());
        }
        record.id = Some(id.clone());

        if let Some(s) = self.selection.as_mut().filter(|s| s.index == index) {
            s.buffer.id.get_or_insert(id);
        }
        Ok(())
    }

    /// Re-validate every record against the current batch.
    ///
    /// Returns `(index, errors)` for the records that have errors. The open
    /// selection's errors are refreshed too.
    pub fn revalidate_all(&mut self) -> Vec<(usize, Vec<ValidationError>)> {
        if let Some(ref mut s) = self.selection {
            let mut snapshot = self.records.clone();
            snapshot[s.index] = s.buffer.clone();
            s.errors = validate(&s.buffer, s.index, &snapshot, &self.context);
        }
        validate_all(&self.records, &self.context)
    }

    /// Discard everything: records, selection and filter.
    pub fn reset(&mut self) {
        self.records.clear();
        self.selection = None;
        self.query.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn user(first: &str, email: &str) -> ImportRecord {
        ImportRecord::from_pairs([
            (Field::FirstName, first),
            (Field::LastName, "Tester"),
            (Field::Email, email),
            (Field::Password, "Secure123"),
            (Field::Role, "learner"),
        ])
    }

    fn session(records: Vec<ImportRecord>) -> StagingSession {
        StagingSession::new(records, ValidationContext::new(["taken@x.com"], ["course1"]))
    }

    #[test]
    fn test_select_computes_errors() {
        let mut s = session(vec![user("Ann", "ann@x.com"), user("Bob", "taken@x.com")]);

        assert!(s.select(0).unwrap().is_valid());
        let sel = s.select(1).unwrap();
        assert_eq!(sel.index, 1);
        assert_eq!(sel.errors[0].to_string(), "Row 3: Email already exists in the system");
    }

    #[test]
    fn test_select_out_of_range() {
        let mut s = session(vec![user("Ann", "ann@x.com")]);
        assert_eq!(
            s.select(3).unwrap_err(),
            SessionError::RowOutOfRange { row: 3, len: 1 }
        );
    }

    #[test]
    fn test_edit_requires_selection() {
        let mut s = session(vec![user("Ann", "ann@x.com")]);
        assert_eq!(s.edit_field(Field::Email, "x@y.z").unwrap_err(), SessionError::NoSelection);
    }

    #[test]
    fn test_edit_revalidates_buffer_only() {
        let mut s = session(vec![user("Ann", "dup@x.com"), user("Bob", "dup@x.com")]);

        assert_eq!(s.select(0).unwrap().errors.len(), 1);
        let sel = s.edit_field(Field::Email, "ann@x.com").unwrap();
        assert!(sel.is_valid());
        // canonical record untouched until saved
        assert_eq!(s.records()[0].get(Field::Email), Some("dup@x.com"));

        let sel = s.edit_field(Field::Password, "short").unwrap();
        assert_eq!(sel.errors.len(), 1);
    }

    #[test]
    fn test_edit_detects_new_duplicate_against_neighbours() {
        let mut s = session(vec![user("Ann", "ann@x.com"), user("Bob", "bob@x.com")]);
        s.select(1).unwrap();
        let sel = s.edit_field(Field::Email, "ANN@x.com").unwrap();
        assert_eq!(sel.errors[0].message, "Duplicate email in upload batch");

        // Ann's row is only refreshed once it is looked at again
        assert!(s.errors_for(0).unwrap().is_empty());
    }

    #[test]
    fn test_remove_clears_selection_on_removed_row() {
        let mut s = session(vec![user("Ann", "ann@x.com"), user("Bob", "bob@x.com")]);
        s.select(1).unwrap();
        let removed = s.remove(1).unwrap();

        assert_eq!(removed.get(Field::FirstName), Some("Bob"));
        assert_eq!(s.len(), 1);
        assert!(s.selection().is_none());
    }

    #[test]
    fn test_remove_shifts_later_selection() {
        let mut s = session(vec![
            user("Ann", "ann@x.com"),
            user("Bob", "bob@x.com"),
            user("Cid", "bad-email"),
        ]);
        s.select(2).unwrap();
        s.remove(0).unwrap();

        let sel = s.selection().unwrap();
        assert_eq!(sel.index, 1);
        assert_eq!(sel.buffer.get(Field::FirstName), Some("Cid"));
        assert_eq!(sel.errors[0].row, 3);
    }

    #[test]
    fn test_filter_does_not_reorder() {
        let mut s = session(vec![
            user("Ann", "ann@x.com"),
            user("Bob", "bob@corp.io"),
            user("Anna", "anna@corp.io"),
        ]);

        let hits: Vec<usize> = s.filter("ANN").into_iter().map(|(i, _)| i).collect();
        assert_eq!(hits, vec![0, 2]);
        assert_eq!(s.filter("corp").len(), 2);
        assert_eq!(s.filter("").len(), 3);

        s.set_query("bob");
        assert_eq!(s.visible().len(), 1);
        assert_eq!(s.records()[1].get(Field::FirstName), Some("Bob"));
    }

    #[test]
    fn test_commit_selection_assigns_id() {
        let mut s = session(vec![user("Ann", "ann@x.com"), user("Bob", "bob@x.com")]);
        s.select(0).unwrap();
        s.edit_field(Field::LastName, "Lee").unwrap();

        assert_eq!(s.commit_selection(UserId::from("11")).unwrap(), 0);
        assert!(s.selection().is_none());
        assert_eq!(s.records()[0].id, Some(UserId::from("11")));
        assert_eq!(s.records()[0].get(Field::LastName), Some("Lee"));
        assert_eq!(s.unsaved().len(), 1);
    }

    #[test]
    fn test_commit_refused_once_row_is_saved() {
        let mut s = session(vec![user("Ann", "ann@x.com")]);
        s.select(0).unwrap();
        s.mark_saved(0, UserId::from("1")).unwrap();

        assert!(s.selection().unwrap().buffer.is_saved());
        assert_eq!(
            s.commit_selection(UserId::from("2")).unwrap_err(),
            SessionError::AlreadySaved { row: 0 }
        );
        assert_eq!(s.records()[0].id, Some(UserId::from("1")));
        assert!(s.selection().is_some());
    }

    #[test]
    fn test_mark_saved_is_write_once() {
        let mut s = session(vec![user("Ann", "ann@x.com")]);
        s.mark_saved(0, UserId::from("1")).unwrap();
        s.mark_saved(0, UserId::from("2")).unwrap();
        assert_eq!(s.records()[0].id, Some(UserId::from("1")));
    }

    #[test]
    fn test_revalidate_all_and_reset() {
        let mut s = session(vec![user("Ann", "dup@x.com"), user("Bob", "dup@x.com")]);
        assert_eq!(s.revalidate_all().len(), 2);

        s.set_query("a");
        s.reset();
        assert!(s.is_empty());
        assert_eq!(s.query(), "");
    }
}
