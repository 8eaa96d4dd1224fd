use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// The named features a subject can be granted.
///
/// Stored and exchanged in snake_case (`early_access`, `copilot`, ...).
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum FeatureName {
    EarlyAccess,
    AiEarlyAccess,
    Copilot,
    UnlimitedWorkspace,
    UnlimitedCopilot,
    Admin,
}

impl FeatureName {
    pub const ALL: [FeatureName; 6] = [
        Self::EarlyAccess,
        Self::AiEarlyAccess,
        Self::Copilot,
        Self::UnlimitedWorkspace,
        Self::UnlimitedCopilot,
        Self::Admin,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EarlyAccess => "early_access",
            Self::AiEarlyAccess => "ai_early_access",
            Self::Copilot => "copilot",
            Self::UnlimitedWorkspace => "unlimited_workspace",
            Self::UnlimitedCopilot => "unlimited_copilot",
            Self::Admin => "admin",
        }
    }

    pub fn from_str(s: &str) -> Option<Self> {
        match s {
            "early_access" => Some(Self::EarlyAccess),
            "ai_early_access" => Some(Self::AiEarlyAccess),
            "copilot" => Some(Self::Copilot),
            "unlimited_workspace" => Some(Self::UnlimitedWorkspace),
            "unlimited_copilot" => Some(Self::UnlimitedCopilot),
            "admin" => Some(Self::Admin),
            _ => None,
        }
    }

    /// Like [`FeatureName::from_str`], but an unrecognised name is an `UnknownFeature` error.
    pub fn parse(s: &str) -> crate::Result<Self> {
        Self::from_str(s).ok_or_else(|| crate::Error::UnknownFeature(s.to_string()))
    }
}

impl std::fmt::Display for FeatureName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An immutable feature definition.
///
/// A `(name, version)` pair is written once by the catalog and never edited;
/// a configuration change is a new version. Fields are read-only so a `Feature`
/// handed out by the catalog can't drift from what is stored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Feature {
    id: i64,
    name: FeatureName,
    version: u32,
    configuration: serde_json::Value,
    created_at: DateTime<Utc>,
}

impl Feature {
    pub(crate) fn new(
        id: i64,
        name: FeatureName,
        version: u32,
        configuration: serde_json::Value,
        created_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id,
            name,
            version,
            configuration,
            created_at,
        }
    }

    /// Catalog row id.
    pub fn id(&self) -> i64 {
        self.id
    }

    pub fn name(&self) -> FeatureName {
        self.name
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Opaque payload, e.g. a quota or a whitelist.
    pub fn configuration(&self) -> &serde_json::Value {
        &self.configuration
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }
}

/// Input for registering a feature version in the catalog.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeatureDefinition {
    pub name: FeatureName,
    pub version: u32,
    #[serde(default)]
    pub configuration: serde_json::Value,
}

impl FeatureDefinition {
    pub fn new(name: FeatureName, version: u32, configuration: serde_json::Value) -> Self {
        Self {
            name,
            version,
            configuration,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_feature_name_round_trips_through_str() {
        for name in FeatureName::ALL {
            assert_eq!(FeatureName::from_str(name.as_str()), Some(name));
        }
    }

    #[test]
    fn test_unknown_feature_name_is_an_error() {
        let err = FeatureName::parse("time_travel").unwrap_err();
        assert!(matches!(err, crate::Error::UnknownFeature(ref n) if n == "time_travel"));
    }

    #[test]
    fn test_feature_name_serializes_snake_case() {
        let json = serde_json::to_string(&FeatureName::UnlimitedWorkspace).unwrap();
        assert_eq!(json, "\"unlimited_workspace\"");
    }

    #[test]
    fn test_definition_configuration_defaults_to_null() {
        let def: FeatureDefinition =
            serde_json::from_str(r#"{"name": "copilot", "version": 1}"#).unwrap();
        assert_eq!(def.name, FeatureName::Copilot);
        assert!(def.configuration.is_null());
    }
}
