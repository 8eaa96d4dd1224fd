//! Services consumed by the transport layer.
//!
//! [`FeatureService`] is the plain, non-idempotent layer over the catalog and
//! the ledger. [`FeatureManagementService`] adds the grant/revoke/check policy
//! that the rest of the system relies on.

mod feature;
mod management;

pub use feature::FeatureService;
pub use management::{FeatureManagementService, ManagementConfig};

use crate::db::{AssignmentStore, Database, FeatureCatalog};

/// Wire both services to one database.
pub fn build(db: &Database, config: ManagementConfig) -> FeatureManagementService {
    let features = FeatureService::new(
        FeatureCatalog::new(db.clone()),
        AssignmentStore::new(db.clone()),
    );
    FeatureManagementService::new(features, config)
}
