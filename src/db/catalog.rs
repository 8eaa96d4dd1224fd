//! Registry of feature definitions.

use std::path::Path;

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension, Row};
use serde::Deserialize;
use serde_json::{json, Value};

use super::{parse_datetime, Database};
use crate::error::{Error, Result};
use crate::models::{Feature, FeatureDefinition, FeatureName};

/// The features every deployment starts with.
pub fn default_definitions() -> Vec<FeatureDefinition> {
    vec![
        FeatureDefinition::new(
            FeatureName::EarlyAccess,
            1,
            json!({ "whitelist": ["@toeverything.info"] }),
        ),
        FeatureDefinition::new(FeatureName::EarlyAccess, 2, json!({ "whitelist": [] })),
        FeatureDefinition::new(FeatureName::AiEarlyAccess, 1, json!({})),
        FeatureDefinition::new(FeatureName::Copilot, 1, json!({})),
        FeatureDefinition::new(FeatureName::UnlimitedWorkspace, 1, json!({})),
        FeatureDefinition::new(FeatureName::UnlimitedCopilot, 1, json!({})),
        FeatureDefinition::new(FeatureName::Admin, 1, json!({})),
    ]
}

#[derive(Clone)]
pub struct FeatureCatalog {
    db: Database,
}

impl FeatureCatalog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Register a feature version.
    ///
    /// Registering a version that already exists with identical configuration
    /// returns the stored definition. Any other attempt to register a version
    /// at or below the latest one is a `VersionConflict`.
    pub fn register(&self, definition: FeatureDefinition) -> Result<Feature> {
        let FeatureDefinition {
            name,
            version,
            configuration,
        } = definition;
        if version == 0 {
            return Err(Error::InvalidInput(format!(
                "{} version must be at least 1",
                name
            )));
        }

        self.db.transaction(|conn| {
            let latest = select_latest(conn, name)?;

            if let Some(existing) = select_version(conn, name, version)? {
                if existing.configuration() == &configuration {
                    return Ok(existing);
                }
            }
            if let Some(latest) = &latest {
                if version <= latest.version() {
                    return Err(Error::VersionConflict {
                        name,
                        version,
                        latest: latest.version(),
                    });
                }
            }

            let now = Utc::now();
            conn.execute(
                "INSERT INTO features (name, version, configuration, created_at)
                 VALUES (?, ?, ?, ?)",
                (
                    name,
                    version,
                    serde_json::to_string(&configuration)?,
                    now.to_rfc3339(),
                ),
            )?;
            tracing::info!("Registered feature {} v{}", name, version);

            Ok(Feature::new(
                conn.last_insert_rowid(),
                name,
                version,
                configuration,
                now,
            ))
        })
    }

    /// Latest registered version of `name`.
    pub fn resolve(&self, name: FeatureName) -> Result<Feature> {
        self.db
            .read(|conn| select_latest(conn, name))?
            .ok_or_else(|| Error::UnknownFeature(name.to_string()))
    }

    /// Exact `(name, version)` definition.
    pub fn resolve_version(&self, name: FeatureName, version: u32) -> Result<Feature> {
        self.db
            .read(|conn| select_version(conn, name, version))?
            .ok_or(Error::UnknownFeatureVersion { name, version })
    }

    /// Exact version when one is given, latest otherwise.
    pub fn resolve_with(&self, name: FeatureName, version: Option<u32>) -> Result<Feature> {
        match version {
            Some(version) => self.resolve_version(name, version),
            None => self.resolve(name),
        }
    }

    pub fn list(&self) -> Result<Vec<Feature>> {
        self.db.read(|conn| {
            let mut stmt = conn.prepare(
                "SELECT id, name, version, configuration, created_at
                 FROM features ORDER BY name, version",
            )?;
            let features = stmt
                .query_map([], read_feature)?
                .collect::<Result<Vec<_>, _>>()?;
            Ok(features)
        })
    }

    /// Register each definition in order. Safe to run on every startup.
    pub fn seed(&self, definitions: &[FeatureDefinition]) -> Result<Vec<Feature>> {
        definitions
            .iter()
            .cloned()
            .map(|definition| self.register(definition))
            .collect()
    }

    pub fn seed_defaults(&self) -> Result<Vec<Feature>> {
        self.seed(&default_definitions())
    }

    /// Read a JSON array of definitions, e.g. `[{"name": "copilot", "version": 1, "configuration": {}}]`.
    pub fn load_definitions(path: &Path) -> Result<Vec<FeatureDefinition>> {
        let raw = std::fs::read_to_string(path).map_err(|e| {
            Error::InvalidInput(format!("cannot read catalog {}: {}", path.display(), e))
        })?;
        let entries: Vec<SeedEntry> = serde_json::from_str(&raw)?;
        entries
            .into_iter()
            .map(|entry| {
                Ok(FeatureDefinition::new(
                    FeatureName::parse(&entry.name)?,
                    entry.version,
                    entry.configuration,
                ))
            })
            .collect()
    }
}

/// Seed file row. Names stay strings until parsed so an unknown one reports
/// `UnknownFeature` rather than a JSON error.
#[derive(Deserialize)]
struct SeedEntry {
    name: String,
    version: u32,
    #[serde(default)]
    configuration: Value,
}

fn select_latest(conn: &Connection, name: FeatureName) -> Result<Option<Feature>> {
    let feature = conn
        .query_row(
            "SELECT id, name, version, configuration, created_at
             FROM features WHERE name = ? ORDER BY version DESC LIMIT 1",
            [name],
            read_feature,
        )
        .optional()?;
    Ok(feature)
}

fn select_version(conn: &Connection, name: FeatureName, version: u32) -> Result<Option<Feature>> {
    let feature = conn
        .query_row(
            "SELECT id, name, version, configuration, created_at
             FROM features WHERE name = ? AND version = ?",
            (name, version),
            read_feature,
        )
        .optional()?;
    Ok(feature)
}

fn read_feature(row: &Row<'_>) -> rusqlite::Result<Feature> {
    let configuration: String = row.get(3)?;
    let configuration = serde_json::from_str(&configuration).map_err(|e| {
        rusqlite::Error::FromSqlConversionFailure(3, rusqlite::types::Type::Text, Box::new(e))
    })?;
    Ok(Feature::new(
        row.get(0)?,
        row.get(1)?,
        row.get(2)?,
        configuration,
        parse_datetime(row.get::<_, String>(4)?),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn catalog() -> FeatureCatalog {
        let db = Database::open_memory().unwrap();
        db.migrate().unwrap();
        FeatureCatalog::new(db)
    }

    #[test]
    fn test_resolve_before_seeding_fails_closed() {
        let catalog = catalog();
        let err = catalog.resolve(FeatureName::EarlyAccess).unwrap_err();
        assert!(matches!(err, Error::UnknownFeature(_)));
    }

    #[test]
    fn test_resolve_returns_latest_version() {
        let catalog = catalog();
        catalog.seed_defaults().unwrap();

        let feature = catalog.resolve(FeatureName::EarlyAccess).unwrap();
        assert_eq!(feature.version(), 2);
        assert_eq!(feature.configuration(), &json!({ "whitelist": [] }));
    }

    #[test]
    fn test_seeding_twice_is_a_no_op() {
        let catalog = catalog();
        let first = catalog.seed_defaults().unwrap();
        let second = catalog.seed_defaults().unwrap();

        assert_eq!(first, second);
        assert_eq!(catalog.list().unwrap().len(), default_definitions().len());
    }

    #[test]
    fn test_zero_version_is_invalid() {
        let catalog = catalog();
        let err = catalog
            .register(FeatureDefinition::new(FeatureName::Admin, 0, json!({})))
            .unwrap_err();
        assert!(matches!(err, Error::InvalidInput(_)));
    }
}
