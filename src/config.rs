//! Runtime configuration loaded from environment variables.

use std::path::PathBuf;

use crate::service::ManagementConfig;

/// Default number of attempts the HTTP layer makes on a storage conflict.
const DEFAULT_CONFLICT_RETRIES: u32 = 3;

#[derive(Clone, Debug)]
pub struct Config {
    /// Database file (from ENTITLEMENTS_DB_PATH). `None` uses the platform data directory.
    pub database_path: Option<PathBuf>,
    /// Seed file with extra catalog entries (from ENTITLEMENTS_CATALOG)
    pub catalog_path: Option<PathBuf>,
    /// Early access gate (from ENTITLEMENTS_EARLY_ACCESS_PREVIEW, default true)
    pub early_access_preview: bool,
    /// Attempts per request when a write loses a race (from ENTITLEMENTS_CONFLICT_RETRIES)
    pub conflict_retries: u32,
}

impl Config {
    pub fn from_env() -> Self {
        let database_path = std::env::var_os("ENTITLEMENTS_DB_PATH").map(PathBuf::from);
        let catalog_path = std::env::var_os("ENTITLEMENTS_CATALOG").map(PathBuf::from);

        let early_access_preview = std::env::var("ENTITLEMENTS_EARLY_ACCESS_PREVIEW")
            .ok()
            .map(|s| parse_flag(&s))
            .unwrap_or(true);

        let conflict_retries = std::env::var("ENTITLEMENTS_CONFLICT_RETRIES")
            .ok()
            .and_then(|s| s.parse::<u32>().ok())
            .filter(|n| *n > 0)
            .unwrap_or(DEFAULT_CONFLICT_RETRIES);

        Self {
            database_path,
            catalog_path,
            early_access_preview,
            conflict_retries,
        }
    }

    pub fn management(&self) -> ManagementConfig {
        ManagementConfig {
            early_access_preview: self.early_access_preview,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_path: None,
            catalog_path: None,
            early_access_preview: true,
            conflict_retries: DEFAULT_CONFLICT_RETRIES,
        }
    }
}

fn parse_flag(s: &str) -> bool {
    !matches!(
        s.trim().to_ascii_lowercase().as_str(),
        "0" | "false" | "no" | "off"
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_flag() {
        assert!(parse_flag("true"));
        assert!(parse_flag("1"));
        assert!(!parse_flag("false"));
        assert!(!parse_flag(" OFF "));
    }

    #[test]
    fn test_default_keeps_preview_gate_closed() {
        let config = Config::default();
        assert!(config.management().early_access_preview);
        assert_eq!(config.conflict_retries, 3);
    }
}
