use std::collections::HashMap;

use crate::db::{AssignmentStore, FeatureCatalog, StoreTx};
use crate::error::Result;
use crate::models::*;

/// Name-based access to the catalog and the assignment ledger.
#[derive(Clone)]
pub struct FeatureService {
    catalog: FeatureCatalog,
    store: AssignmentStore,
}

impl FeatureService {
    pub fn new(catalog: FeatureCatalog, store: AssignmentStore) -> Self {
        Self { catalog, store }
    }

    pub fn catalog(&self) -> &FeatureCatalog {
        &self.catalog
    }

    pub fn store(&self) -> &AssignmentStore {
        &self.store
    }

    /// Grant `name` at exactly `version` with a fresh assignment row.
    ///
    /// This always appends. If the subject already holds the feature, the
    /// active row is switched off first, so the new grant supersedes it and
    /// both remain in the subject's history. Use the management service for
    /// idempotent grants.
    pub fn add_feature(
        &self,
        subject: &Subject,
        name: FeatureName,
        version: u32,
        reason: &str,
    ) -> Result<Assignment> {
        let feature = self.catalog.resolve_version(name, version)?;
        self.store
            .atomically(|tx| self.append(tx, subject, &feature, reason))
    }

    pub(crate) fn append(
        &self,
        tx: &StoreTx<'_>,
        subject: &Subject,
        feature: &Feature,
        reason: &str,
    ) -> Result<Assignment> {
        if let Some(active) = tx.find_active(subject, feature.name())? {
            tx.deactivate(&active)?;
            tracing::debug!(
                subject = %subject,
                feature = %feature.name(),
                superseded = %active.id,
                "Superseded active assignment"
            );
        }
        let assignment = tx.create(subject, feature, reason)?;
        tracing::info!(
            subject = %subject,
            feature = %feature.name(),
            version = feature.version(),
            "Granted feature: {}",
            reason
        );
        Ok(assignment)
    }

    /// Every assignment of the subject, oldest first, with its definition.
    pub fn get_features(&self, subject: &Subject) -> Result<Vec<FeatureAssignment>> {
        let assignments = self.store.list_by_subject(subject)?;

        let mut definitions: HashMap<(FeatureName, u32), Feature> = HashMap::new();
        let mut features = Vec::with_capacity(assignments.len());
        for assignment in assignments {
            let key = (assignment.feature_name, assignment.feature_version);
            let feature = match definitions.get(&key) {
                Some(feature) => feature.clone(),
                None => {
                    let feature = self.catalog.resolve_version(key.0, key.1)?;
                    definitions.insert(key, feature.clone());
                    feature
                }
            };
            features.push(FeatureAssignment {
                assignment,
                feature,
            });
        }

        Ok(features)
    }

    /// Subjects (of either kind) currently holding `name`.
    pub fn list_feature_subjects(&self, name: FeatureName) -> Result<Vec<Subject>> {
        self.store.list_active_subjects_by_feature(name)
    }

    // ============================================================
    // Users
    // ============================================================

    pub fn add_user_feature(
        &self,
        user_id: &str,
        name: FeatureName,
        version: u32,
        reason: &str,
    ) -> Result<Assignment> {
        self.add_feature(&Subject::user(user_id), name, version, reason)
    }

    pub fn get_user_features(&self, user_id: &str) -> Result<Vec<FeatureAssignment>> {
        self.get_features(&Subject::user(user_id))
    }

    pub fn list_feature_users(&self, name: FeatureName) -> Result<Vec<Subject>> {
        self.list_subjects_of_kind(name, SubjectKind::User)
    }

    // ============================================================
    // Workspaces
    // ============================================================

    pub fn add_workspace_feature(
        &self,
        workspace_id: &str,
        name: FeatureName,
        version: u32,
        reason: &str,
    ) -> Result<Assignment> {
        self.add_feature(&Subject::workspace(workspace_id), name, version, reason)
    }

    pub fn get_workspace_features(&self, workspace_id: &str) -> Result<Vec<FeatureAssignment>> {
        self.get_features(&Subject::workspace(workspace_id))
    }

    pub fn list_feature_workspaces(&self, name: FeatureName) -> Result<Vec<Subject>> {
        self.list_subjects_of_kind(name, SubjectKind::Workspace)
    }

    fn list_subjects_of_kind(&self, name: FeatureName, kind: SubjectKind) -> Result<Vec<Subject>> {
        let mut subjects = self.list_feature_subjects(name)?;
        subjects.retain(|s| s.kind == kind);
        Ok(subjects)
    }
}
