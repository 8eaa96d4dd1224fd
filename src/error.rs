//! Error type shared by the catalog, the store and both services.

use rusqlite::{ffi, ErrorCode};
use thiserror::Error;

use crate::models::FeatureName;

pub type Result<T, E = Error> = std::result::Result<T, E>;

#[derive(Debug, Error)]
pub enum Error {
    /// No version of this feature has been registered (or the name is not a feature at all).
    #[error("Unknown feature: {0}")]
    UnknownFeature(String),

    #[error("Unknown feature version: {name} v{version}")]
    UnknownFeatureVersion { name: FeatureName, version: u32 },

    /// Registration would rewrite history: the version is not newer than `latest`,
    /// or it already exists with different content.
    #[error("Version conflict for {name} v{version} (latest registered: v{latest})")]
    VersionConflict {
        name: FeatureName,
        version: u32,
        latest: u32,
    },

    /// A transaction lost a race on an assignment key. Safe to retry.
    #[error("Storage conflict: {0}")]
    StorageConflict(String),

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),
}

impl Error {
    /// Only lost races are worth retrying; every other error needs a configuration
    /// or input change first.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageConflict(_))
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        let rusqlite::Error::SqliteFailure(failure, _) = &e else {
            return Self::StorageUnavailable(e.to_string());
        };
        match failure.code {
            ErrorCode::DatabaseBusy | ErrorCode::DatabaseLocked => {
                Self::StorageConflict(e.to_string())
            }
            // Unique keys are the one-active index racing another writer.
            // Triggers, foreign keys and checks reject the write itself.
            ErrorCode::ConstraintViolation
                if failure.extended_code == ffi::SQLITE_CONSTRAINT_UNIQUE =>
            {
                Self::StorageConflict(e.to_string())
            }
            ErrorCode::ConstraintViolation => Self::InvalidInput(e.to_string()),
            _ => Self::StorageUnavailable(e.to_string()),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Self::InvalidInput(format!("invalid configuration payload: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sqlite_failure(code: std::os::raw::c_int) -> rusqlite::Error {
        rusqlite::Error::SqliteFailure(ffi::Error::new(code), None)
    }

    #[test]
    fn test_busy_and_locked_are_conflicts() {
        assert!(Error::from(sqlite_failure(ffi::SQLITE_BUSY)).is_retryable());
        assert!(Error::from(sqlite_failure(ffi::SQLITE_LOCKED)).is_retryable());
    }

    #[test]
    fn test_unique_violation_is_conflict() {
        let err = Error::from(sqlite_failure(ffi::SQLITE_CONSTRAINT_UNIQUE));
        assert!(matches!(err, Error::StorageConflict(_)));
    }

    #[test]
    fn test_other_constraint_violations_are_not_retryable() {
        for code in [
            ffi::SQLITE_CONSTRAINT_TRIGGER,
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY,
            ffi::SQLITE_CONSTRAINT_CHECK,
        ] {
            let err = Error::from(sqlite_failure(code));
            assert!(matches!(err, Error::InvalidInput(_)), "{code}: {err}");
            assert!(!err.is_retryable());
        }
    }

    #[test]
    fn test_other_failures_are_unavailable() {
        let err = Error::from(sqlite_failure(ffi::SQLITE_CANTOPEN));
        assert!(matches!(err, Error::StorageUnavailable(_)));
        assert!(!err.is_retryable());

        let err = Error::from(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, Error::StorageUnavailable(_)));
    }

    #[test]
    fn test_catalog_errors_are_not_retryable() {
        assert!(!Error::UnknownFeature("nope".to_string()).is_retryable());
        let err = Error::VersionConflict {
            name: FeatureName::Copilot,
            version: 1,
            latest: 2,
        };
        assert!(!err.is_retryable());
        assert_eq!(
            err.to_string(),
            "Version conflict for copilot v1 (latest registered: v2)"
        );
    }
}
