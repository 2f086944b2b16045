//! Store configuration.
//!
//! # Responsibility
//! - Describe where the store lives and which driver semantics apply.
//! - Load the same settings from environment variables for process entry
//!   points.
//!
//! # Invariants
//! - Missing `path` means an in-memory database.
//! - Driver names are matched case-insensitively.

use super::{DbError, DbResult};
use serde::{Deserialize, Deserializer};
use std::fmt::{Display, Formatter};
use std::path::PathBuf;
use std::str::FromStr;

const ENV_DB_PATH: &str = "SCANTREE_DB_PATH";
const ENV_DB_DRIVER: &str = "SCANTREE_DB_DRIVER";
const ENV_DB_BUSY_TIMEOUT_MS: &str = "SCANTREE_DB_BUSY_TIMEOUT_MS";
const DEFAULT_BUSY_TIMEOUT_MS: u64 = 5_000;

/// Database driver the store is deployed against.
///
/// The driver decides whether shared-row upserts need an explicit table lock.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum DbDriver {
    /// Embedded SQLite. Single writer, table locks are not needed.
    #[default]
    Local,
    /// PostgreSQL. Concurrent writers, shared rows are guarded by table locks.
    Postgres,
    /// Driver without lock support; locks are skipped with a warning.
    Other(String),
}

impl DbDriver {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Local => "LOCAL",
            Self::Postgres => "POSTGRES",
            Self::Other(name) => name.as_str(),
        }
    }
}

impl Display for DbDriver {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for DbDriver {
    type Err = DbError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            return Err(DbError::InvalidConfig("db driver cannot be empty".to_string()));
        }
        Ok(match trimmed.to_ascii_uppercase().as_str() {
            "LOCAL" | "SQLITE" => Self::Local,
            "POSTGRES" | "POSTGRESQL" => Self::Postgres,
            _ => Self::Other(trimmed.to_string()),
        })
    }
}

impl<'de> Deserialize<'de> for DbDriver {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// Connection settings for opening the scan tree store.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Database file. `None` opens an in-memory database.
    pub path: Option<PathBuf>,
    pub driver: DbDriver,
    /// How long a writer waits for the engine write lock before failing.
    pub busy_timeout_ms: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: None,
            driver: DbDriver::Local,
            busy_timeout_ms: DEFAULT_BUSY_TIMEOUT_MS,
        }
    }
}

impl StoreConfig {
    /// Builds a config for one database file with default driver/timeouts.
    pub fn file(path: impl Into<PathBuf>) -> Self {
        Self {
            path: Some(path.into()),
            ..Self::default()
        }
    }

    /// Reads `SCANTREE_DB_PATH`, `SCANTREE_DB_DRIVER` and
    /// `SCANTREE_DB_BUSY_TIMEOUT_MS`, falling back to defaults for unset keys.
    pub fn from_env() -> DbResult<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> DbResult<Self> {
        let mut config = Self::default();

        if let Some(path) = lookup(ENV_DB_PATH).filter(|value| !value.trim().is_empty()) {
            config.path = Some(PathBuf::from(path.trim()));
        }
        if let Some(driver) = lookup(ENV_DB_DRIVER) {
            config.driver = driver.parse()?;
        }
        if let Some(timeout) = lookup(ENV_DB_BUSY_TIMEOUT_MS) {
            config.busy_timeout_ms = timeout.trim().parse().map_err(|_| {
                DbError::InvalidConfig(format!(
                    "{ENV_DB_BUSY_TIMEOUT_MS} must be an integer, got `{timeout}`"
                ))
            })?;
        }

        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::{DbDriver, StoreConfig};
    use std::collections::HashMap;
    use std::path::PathBuf;

    #[test]
    fn driver_parses_known_names_case_insensitively() {
        assert_eq!("local".parse::<DbDriver>().unwrap(), DbDriver::Local);
        assert_eq!(" Postgres ".parse::<DbDriver>().unwrap(), DbDriver::Postgres);
        assert_eq!(
            "mysql".parse::<DbDriver>().unwrap(),
            DbDriver::Other("mysql".to_string())
        );
        assert!("  ".parse::<DbDriver>().is_err());
    }

    #[test]
    fn from_lookup_applies_overrides_and_defaults() {
        let env: HashMap<&str, &str> = HashMap::from([
            ("SCANTREE_DB_PATH", "/var/lib/scantree/store.db"),
            ("SCANTREE_DB_DRIVER", "POSTGRES"),
        ]);
        let config =
            StoreConfig::from_lookup(|key| env.get(key).map(|value| value.to_string())).unwrap();

        assert_eq!(
            config.path,
            Some(PathBuf::from("/var/lib/scantree/store.db"))
        );
        assert_eq!(config.driver, DbDriver::Postgres);
        assert_eq!(config.busy_timeout_ms, 5_000);
    }

    #[test]
    fn from_lookup_rejects_non_numeric_timeout() {
        let err = StoreConfig::from_lookup(|key| {
            (key == "SCANTREE_DB_BUSY_TIMEOUT_MS").then(|| "soon".to_string())
        })
        .unwrap_err();
        assert!(err.to_string().contains("must be an integer"));
    }

    #[test]
    fn config_deserializes_from_json_with_defaults() {
        let config: StoreConfig = serde_json::from_str(r#"{"driver":"local"}"#).unwrap();
        assert_eq!(config, StoreConfig::default());
    }
}
