//! Ledger of feature assignments.
//!
//! Every mutation runs inside [`AssignmentStore::atomically`], which holds the
//! SQLite write lock for the whole closure. Callers that need to read, decide
//! and then write (the management service's "ensure active") do all three
//! through one [`StoreTx`], so no other writer can slip a second active row in
//! between. The partial unique index on active rows backs this up in storage.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use uuid::Uuid;

use super::{parse_datetime, parse_uuid, Database};
use crate::error::{Error, Result};
use crate::models::{Assignment, Feature, FeatureName, Subject};

const ASSIGNMENT_COLUMNS: &str =
    "id, subject_kind, subject_id, feature_name, feature_version, activated, reason, created_at";

#[derive(Clone)]
pub struct AssignmentStore {
    db: Database,
}

impl AssignmentStore {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Run `f` as one serialized read-modify-write.
    pub fn atomically<T>(&self, f: impl FnOnce(&StoreTx<'_>) -> Result<T>) -> Result<T> {
        self.db.transaction(|conn| f(&StoreTx { conn }))
    }

    fn snapshot<T>(&self, f: impl FnOnce(&StoreTx<'_>) -> Result<T>) -> Result<T> {
        self.db.read(|conn| f(&StoreTx { conn }))
    }

    pub fn create(&self, subject: &Subject, feature: &Feature, reason: &str) -> Result<Assignment> {
        self.atomically(|tx| tx.create(subject, feature, reason))
    }

    pub fn list_by_subject(&self, subject: &Subject) -> Result<Vec<Assignment>> {
        self.snapshot(|tx| tx.list_by_subject(subject))
    }

    pub fn list_active_subjects_by_feature(&self, name: FeatureName) -> Result<Vec<Subject>> {
        self.snapshot(|tx| tx.list_active_subjects_by_feature(name))
    }

    pub fn find_active(&self, subject: &Subject, name: FeatureName) -> Result<Option<Assignment>> {
        self.snapshot(|tx| tx.find_active(subject, name))
    }

    pub fn find_latest_inactive(
        &self,
        subject: &Subject,
        name: FeatureName,
    ) -> Result<Option<Assignment>> {
        self.snapshot(|tx| tx.find_latest_inactive(subject, name))
    }

    pub fn deactivate(&self, assignment: &Assignment) -> Result<()> {
        self.atomically(|tx| tx.deactivate(assignment))
    }

    pub fn reactivate(&self, assignment: &Assignment) -> Result<Assignment> {
        self.atomically(|tx| tx.reactivate(assignment))
    }
}

/// The store's operations scoped to one open transaction.
pub struct StoreTx<'a> {
    conn: &'a Connection,
}

impl StoreTx<'_> {
    /// Insert a new, active assignment.
    pub fn create(&self, subject: &Subject, feature: &Feature, reason: &str) -> Result<Assignment> {
        let id = Uuid::new_v4();
        let now = Utc::now();

        self.conn.execute(
            "INSERT INTO feature_assignments
                 (id, subject_kind, subject_id, feature_name, feature_version, activated, reason, created_at)
             VALUES (?, ?, ?, ?, ?, 1, ?, ?)",
            (
                id.to_string(),
                subject.kind,
                &subject.id,
                feature.name(),
                feature.version(),
                reason,
                now.to_rfc3339(),
            ),
        )?;

        Ok(Assignment {
            id,
            subject: subject.clone(),
            feature_name: feature.name(),
            feature_version: feature.version(),
            activated: true,
            reason: reason.to_string(),
            created_at: now,
        })
    }

    /// Every assignment the subject has ever had, oldest first.
    pub fn list_by_subject(&self, subject: &Subject) -> Result<Vec<Assignment>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT {ASSIGNMENT_COLUMNS} FROM feature_assignments
             WHERE subject_kind = ? AND subject_id = ? ORDER BY seq"
        ))?;

        let assignments = stmt
            .query_map((subject.kind, &subject.id), read_assignment)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(assignments)
    }

    /// Subjects holding an active assignment of any version of `name`.
    pub fn list_active_subjects_by_feature(&self, name: FeatureName) -> Result<Vec<Subject>> {
        let mut stmt = self.conn.prepare(
            "SELECT DISTINCT subject_kind, subject_id FROM feature_assignments
             WHERE feature_name = ? AND activated = 1
             ORDER BY subject_kind, subject_id",
        )?;

        let subjects = stmt
            .query_map([name], |row| {
                Ok(Subject {
                    kind: row.get(0)?,
                    id: row.get(1)?,
                })
            })?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(subjects)
    }

    pub fn find_active(&self, subject: &Subject, name: FeatureName) -> Result<Option<Assignment>> {
        self.find_one(subject, name, true)
    }

    /// The most recently created inactive assignment, if any.
    pub fn find_latest_inactive(
        &self,
        subject: &Subject,
        name: FeatureName,
    ) -> Result<Option<Assignment>> {
        self.find_one(subject, name, false)
    }

    /// The most recently created inactive assignment of exactly `version`.
    pub fn find_latest_inactive_version(
        &self,
        subject: &Subject,
        name: FeatureName,
        version: u32,
    ) -> Result<Option<Assignment>> {
        let assignment = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM feature_assignments
                     WHERE subject_kind = ? AND subject_id = ? AND feature_name = ?
                       AND feature_version = ? AND activated = 0
                     ORDER BY seq DESC LIMIT 1"
                ),
                (subject.kind, &subject.id, name, version),
                read_assignment,
            )
            .optional()?;
        Ok(assignment)
    }

    fn find_one(
        &self,
        subject: &Subject,
        name: FeatureName,
        activated: bool,
    ) -> Result<Option<Assignment>> {
        let assignment = self
            .conn
            .query_row(
                &format!(
                    "SELECT {ASSIGNMENT_COLUMNS} FROM feature_assignments
                     WHERE subject_kind = ? AND subject_id = ? AND feature_name = ? AND activated = ?
                     ORDER BY seq DESC LIMIT 1"
                ),
                (subject.kind, &subject.id, name, activated),
                read_assignment,
            )
            .optional()?;
        Ok(assignment)
    }

    /// Switch the assignment off in place. Already-inactive rows are left alone.
    pub fn deactivate(&self, assignment: &Assignment) -> Result<()> {
        self.conn.execute(
            "UPDATE feature_assignments SET activated = 0 WHERE id = ? AND activated = 1",
            [assignment.id.to_string()],
        )?;
        Ok(())
    }

    /// Switch the same row back on, keeping its identity.
    pub fn reactivate(&self, assignment: &Assignment) -> Result<Assignment> {
        let rows = self.conn.execute(
            "UPDATE feature_assignments SET activated = 1 WHERE id = ?",
            [assignment.id.to_string()],
        )?;
        if rows == 0 {
            return Err(Error::InvalidInput(format!(
                "assignment {} does not exist",
                assignment.id
            )));
        }

        Ok(Assignment {
            activated: true,
            ..assignment.clone()
        })
    }
}

fn read_assignment(row: &Row<'_>) -> rusqlite::Result<Assignment> {
    Ok(Assignment {
        id: parse_uuid(row.get::<_, String>(0)?),
        subject: Subject {
            kind: row.get(1)?,
            id: row.get(2)?,
        },
        feature_name: row.get(3)?,
        feature_version: row.get(4)?,
        activated: row.get(5)?,
        reason: row.get(6)?,
        created_at: parse_datetime(row.get::<_, String>(7)?),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::FeatureCatalog;

    fn setup() -> (AssignmentStore, Feature) {
        let db = Database::open_memory().unwrap();
        db.migrate().unwrap();
        let catalog = FeatureCatalog::new(db.clone());
        catalog.seed_defaults().unwrap();
        let copilot = catalog.resolve(FeatureName::Copilot).unwrap();
        (AssignmentStore::new(db), copilot)
    }

    #[test]
    fn test_find_latest_inactive_prefers_newest_row() {
        let (store, copilot) = setup();
        let ws = Subject::workspace("w1");

        let first = store.create(&ws, &copilot, "first").unwrap();
        store.deactivate(&first).unwrap();
        let second = store.create(&ws, &copilot, "second").unwrap();
        store.deactivate(&second).unwrap();

        let latest = store
            .find_latest_inactive(&ws, FeatureName::Copilot)
            .unwrap()
            .unwrap();
        assert_eq!(latest.id, second.id);
        assert!(store.find_active(&ws, FeatureName::Copilot).unwrap().is_none());
    }

    #[test]
    fn test_find_latest_inactive_version_skips_other_versions() {
        let (store, copilot) = setup();
        let user = Subject::user("u1");
        let catalog = FeatureCatalog::new(store.db.clone());
        let v1 = catalog.resolve_version(FeatureName::EarlyAccess, 1).unwrap();
        let v2 = catalog.resolve_version(FeatureName::EarlyAccess, 2).unwrap();

        let old = store.create(&user, &v1, "v1").unwrap();
        store.deactivate(&old).unwrap();
        let newer = store.create(&user, &v2, "v2").unwrap();
        store.deactivate(&newer).unwrap();
        store.create(&user, &copilot, "other feature").unwrap();

        let found = store
            .atomically(|tx| tx.find_latest_inactive_version(&user, FeatureName::EarlyAccess, 1))
            .unwrap()
            .unwrap();
        assert_eq!(found.id, old.id);
        assert!(store
            .atomically(|tx| tx.find_latest_inactive_version(&user, FeatureName::Copilot, 1))
            .unwrap()
            .is_none());
    }

    #[test]
    fn test_assignment_to_unregistered_version_is_not_retryable() {
        let (store, _) = setup();
        let ghost = Feature::new(
            999,
            FeatureName::Copilot,
            9,
            serde_json::json!({}),
            Utc::now(),
        );

        let err = store.create(&Subject::user("u1"), &ghost, "t").unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
        assert!(!err.is_retryable());
    }

    #[test]
    fn test_second_active_row_is_a_storage_conflict() {
        let (store, copilot) = setup();
        let ws = Subject::workspace("w1");

        store.create(&ws, &copilot, "first").unwrap();
        let err = store.create(&ws, &copilot, "again").unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.list_by_subject(&ws).unwrap().len(), 1);
    }

    #[test]
    fn test_reactivate_keeps_identity() {
        let (store, copilot) = setup();
        let ws = Subject::workspace("w1");

        let created = store.create(&ws, &copilot, "test").unwrap();
        store.deactivate(&created).unwrap();
        let reactivated = store.reactivate(&created).unwrap();

        assert_eq!(reactivated.id, created.id);
        assert!(reactivated.activated);
        let rows = store.list_by_subject(&ws).unwrap();
        assert_eq!(rows.len(), 1);
        assert!(rows[0].activated);
    }

    #[test]
    fn test_subject_kind_is_part_of_the_key() {
        let (store, copilot) = setup();

        store.create(&Subject::user("1"), &copilot, "user").unwrap();
        store.create(&Subject::workspace("1"), &copilot, "ws").unwrap();

        let subjects = store
            .list_active_subjects_by_feature(FeatureName::Copilot)
            .unwrap();
        assert_eq!(subjects, vec![Subject::user("1"), Subject::workspace("1")]);
    }
}
