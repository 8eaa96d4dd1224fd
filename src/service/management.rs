use super::FeatureService;
use crate::error::Result;
use crate::models::*;

/// Reason recorded on grants made through the named capability helpers.
const EARLY_ACCESS_REASON: &str = "Early access user";
const ADMIN_REASON: &str = "Admin user";

/// Policy switches for the management layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagementConfig {
    /// When off, early access is open to everyone and
    /// [`FeatureManagementService::can_early_access`] is always true.
    pub early_access_preview: bool,
}

impl Default for ManagementConfig {
    fn default() -> Self {
        Self {
            early_access_preview: true,
        }
    }
}

/// Named capabilities built on top of raw feature assignments.
///
/// Grants are idempotent and revocations are soft, so callers may retry any
/// operation blindly.
#[derive(Clone)]
pub struct FeatureManagementService {
    features: FeatureService,
    config: ManagementConfig,
}

impl FeatureManagementService {
    pub fn new(features: FeatureService, config: ManagementConfig) -> Self {
        Self { features, config }
    }

    pub fn features(&self) -> &FeatureService {
        &self.features
    }

    // ============================================================
    // Generic capabilities
    // ============================================================

    /// Make sure `subject` holds `name`.
    ///
    /// Returns the active assignment if there is one. Otherwise the newest
    /// removed assignment of the requested version is switched back on, so
    /// identity survives a remove/add cycle even across version changes.
    /// Failing both, a new assignment is created. `version: None` means the
    /// catalog's latest. The whole lookup-then-write runs in one store
    /// transaction.
    pub fn add_capability(
        &self,
        subject: &Subject,
        name: FeatureName,
        version: Option<u32>,
        reason: &str,
    ) -> Result<Activation> {
        let feature = self.features.catalog().resolve_with(name, version)?;

        let activation = self.features.store().atomically(|tx| {
            if let Some(active) = tx.find_active(subject, name)? {
                return Ok(Activation::Found(active));
            }
            if let Some(inactive) =
                tx.find_latest_inactive_version(subject, name, feature.version())?
            {
                return tx.reactivate(&inactive).map(Activation::Reactivated);
            }
            self.features
                .append(tx, subject, &feature, reason)
                .map(Activation::Created)
        })?;

        if !activation.is_write() {
            tracing::debug!(subject = %subject, feature = %name, "Feature already active");
        } else if let Activation::Reactivated(a) = &activation {
            tracing::info!(subject = %subject, feature = %name, assignment = %a.id, "Reactivated feature");
        }

        Ok(activation)
    }

    /// Switch off the subject's active assignment of `name`.
    ///
    /// Returns `false` when there was nothing to remove.
    pub fn remove_capability(&self, subject: &Subject, name: FeatureName) -> Result<bool> {
        let removed = self.features.store().atomically(|tx| {
            match tx.find_active(subject, name)? {
                Some(active) => {
                    tx.deactivate(&active)?;
                    Ok(true)
                }
                None => Ok(false),
            }
        })?;

        if removed {
            tracing::info!(subject = %subject, feature = %name, "Revoked feature");
        }
        Ok(removed)
    }

    /// Never-granted and granted-then-removed both answer `false`.
    pub fn has_capability(&self, subject: &Subject, name: FeatureName) -> Result<bool> {
        Ok(self.features.store().find_active(subject, name)?.is_some())
    }

    pub fn list_capability_subjects(&self, name: FeatureName) -> Result<Vec<Subject>> {
        self.features.list_feature_subjects(name)
    }

    // ============================================================
    // Early access
    // ============================================================

    pub fn add_early_access(&self, user_id: &str) -> Result<Activation> {
        self.add_capability(
            &Subject::user(user_id),
            FeatureName::EarlyAccess,
            None,
            EARLY_ACCESS_REASON,
        )
    }

    pub fn remove_early_access(&self, user_id: &str) -> Result<bool> {
        self.remove_capability(&Subject::user(user_id), FeatureName::EarlyAccess)
    }

    pub fn can_early_access(&self, user_id: &str) -> Result<bool> {
        if !self.config.early_access_preview {
            return Ok(true);
        }
        self.has_capability(&Subject::user(user_id), FeatureName::EarlyAccess)
    }

    pub fn list_early_access(&self) -> Result<Vec<Subject>> {
        self.features.list_feature_users(FeatureName::EarlyAccess)
    }

    // ============================================================
    // Admin
    // ============================================================

    pub fn add_admin(&self, user_id: &str) -> Result<Activation> {
        self.add_capability(&Subject::user(user_id), FeatureName::Admin, None, ADMIN_REASON)
    }

    pub fn remove_admin(&self, user_id: &str) -> Result<bool> {
        self.remove_capability(&Subject::user(user_id), FeatureName::Admin)
    }

    pub fn is_admin(&self, user_id: &str) -> Result<bool> {
        self.has_capability(&Subject::user(user_id), FeatureName::Admin)
    }

    // ============================================================
    // Workspace features
    // ============================================================

    pub fn add_workspace_feature(
        &self,
        workspace_id: &str,
        name: FeatureName,
        version: u32,
        reason: &str,
    ) -> Result<Activation> {
        self.add_capability(&Subject::workspace(workspace_id), name, Some(version), reason)
    }

    pub fn remove_workspace_feature(&self, workspace_id: &str, name: FeatureName) -> Result<bool> {
        self.remove_capability(&Subject::workspace(workspace_id), name)
    }

    pub fn has_workspace_feature(&self, workspace_id: &str, name: FeatureName) -> Result<bool> {
        self.has_capability(&Subject::workspace(workspace_id), name)
    }

    pub fn list_feature_workspaces(&self, name: FeatureName) -> Result<Vec<Subject>> {
        self.features.list_feature_workspaces(name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{AssignmentStore, Database, FeatureCatalog};

    fn management(config: ManagementConfig) -> FeatureManagementService {
        let db = Database::open_memory().unwrap();
        db.migrate().unwrap();
        let catalog = FeatureCatalog::new(db.clone());
        catalog.seed_defaults().unwrap();
        let features = FeatureService::new(catalog, AssignmentStore::new(db));
        FeatureManagementService::new(features, config)
    }

    #[test]
    fn test_activation_branches() {
        let m = management(ManagementConfig::default());
        let user = Subject::user("u1");

        let created = m.add_capability(&user, FeatureName::Copilot, None, "t").unwrap();
        assert!(matches!(created, Activation::Created(_)));

        let found = m.add_capability(&user, FeatureName::Copilot, None, "t").unwrap();
        assert!(matches!(found, Activation::Found(_)));
        assert!(!found.is_write());

        m.remove_capability(&user, FeatureName::Copilot).unwrap();
        let reactivated = m.add_capability(&user, FeatureName::Copilot, None, "t").unwrap();
        assert!(matches!(reactivated, Activation::Reactivated(_)));
        assert_eq!(reactivated.assignment().id, created.assignment().id);
    }

    #[test]
    fn test_version_change_creates_new_row_instead_of_reactivating() {
        let m = management(ManagementConfig::default());
        let user = Subject::user("u1");

        let v1 = m
            .add_capability(&user, FeatureName::EarlyAccess, Some(1), "t")
            .unwrap();
        m.remove_capability(&user, FeatureName::EarlyAccess).unwrap();
        let v2 = m
            .add_capability(&user, FeatureName::EarlyAccess, Some(2), "t")
            .unwrap();

        assert!(matches!(v2, Activation::Created(_)));
        assert_ne!(v1.assignment().id, v2.assignment().id);
        assert_eq!(v2.assignment().feature_version, 2);
    }

    #[test]
    fn test_reactivates_older_row_of_requested_version() {
        let m = management(ManagementConfig::default());
        let user = Subject::user("u1");

        let v1 = m
            .add_capability(&user, FeatureName::EarlyAccess, Some(1), "t")
            .unwrap();
        m.remove_capability(&user, FeatureName::EarlyAccess).unwrap();
        m.add_capability(&user, FeatureName::EarlyAccess, Some(2), "t")
            .unwrap();
        m.remove_capability(&user, FeatureName::EarlyAccess).unwrap();

        let again = m
            .add_capability(&user, FeatureName::EarlyAccess, Some(1), "t")
            .unwrap();
        assert!(matches!(again, Activation::Reactivated(_)));
        assert_eq!(again.assignment().id, v1.assignment().id);

        let rows = m.features().get_user_features("u1").unwrap();
        assert_eq!(rows.len(), 2);
        let v1_rows: Vec<_> = rows
            .iter()
            .filter(|r| r.assignment.feature_version == 1)
            .collect();
        assert_eq!(v1_rows.len(), 1);
        assert!(v1_rows[0].assignment.activated);
    }

    #[test]
    fn test_remove_without_grant_is_a_no_op() {
        let m = management(ManagementConfig::default());
        assert!(!m.remove_early_access("ghost").unwrap());
        assert!(m.features().get_user_features("ghost").unwrap().is_empty());
    }

    #[test]
    fn test_early_access_gate_open_when_preview_disabled() {
        let m = management(ManagementConfig {
            early_access_preview: false,
        });
        assert!(m.can_early_access("anyone").unwrap());
        assert!(m.list_early_access().unwrap().is_empty());
    }

    #[test]
    fn test_admin_round_trip() {
        let m = management(ManagementConfig::default());
        assert!(!m.is_admin("root").unwrap());
        m.add_admin("root").unwrap();
        assert!(m.is_admin("root").unwrap());
        assert!(m.remove_admin("root").unwrap());
        assert!(!m.is_admin("root").unwrap());
    }
}
