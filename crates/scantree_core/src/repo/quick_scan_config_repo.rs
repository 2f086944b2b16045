//! Quick-scan configuration repository.
//!
//! # Responsibility
//! - Read and write the single persisted quick-scan configuration record.
//!
//! # Invariants
//! - The record always lives under `QUICK_SCAN_CONFIG_ID`.
//! - `set` and `set_default` upsert; they never create a second row.

use crate::db::DbError;
use crate::model::quick_scan_config::QuickScanConfig;
use log::info;
use rusqlite::{params, Connection, OptionalExtension};
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Fixed primary key of the configuration record.
pub const QUICK_SCAN_CONFIG_ID: &str = "1";

pub type ConfigRepoResult<T> = Result<T, ConfigRepoError>;

#[derive(Debug)]
pub enum ConfigRepoError {
    Db(DbError),
    /// No configuration was stored yet.
    NotFound,
    /// Rejected before reaching the store.
    Validation(String),
}

impl Display for ConfigRepoError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::NotFound => write!(f, "quick scan config not found"),
            Self::Validation(message) => write!(f, "invalid quick scan config: {message}"),
        }
    }
}

impl Error for ConfigRepoError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::NotFound => None,
            Self::Validation(_) => None,
        }
    }
}

impl From<DbError> for ConfigRepoError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for ConfigRepoError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

pub trait QuickScanConfigRepository {
    fn get(&self) -> ConfigRepoResult<QuickScanConfig>;
    fn set(&self, config: &QuickScanConfig) -> ConfigRepoResult<()>;
    /// Overwrites the stored record with `QuickScanConfig::default()`.
    fn set_default(&self) -> ConfigRepoResult<QuickScanConfig>;
}

pub struct SqliteQuickScanConfigRepository<'conn> {
    conn: &'conn Connection,
}

impl<'conn> SqliteQuickScanConfigRepository<'conn> {
    pub fn new(conn: &'conn Connection) -> Self {
        Self { conn }
    }
}

impl QuickScanConfigRepository for SqliteQuickScanConfigRepository<'_> {
    fn get(&self) -> ConfigRepoResult<QuickScanConfig> {
        self.conn
            .query_row(
                "SELECT cis_docker_benchmark_enabled, max_scan_parallelism
                 FROM quick_scan_config
                 WHERE id = ?1;",
                [QUICK_SCAN_CONFIG_ID],
                |row| {
                    Ok(QuickScanConfig {
                        cis_docker_benchmark_enabled: row.get::<_, i64>(0)? == 1,
                        max_scan_parallelism: row.get(1)?,
                    })
                },
            )
            .optional()?
            .ok_or(ConfigRepoError::NotFound)
    }

    fn set(&self, config: &QuickScanConfig) -> ConfigRepoResult<()> {
        if config.max_scan_parallelism <= 0 {
            return Err(ConfigRepoError::Validation(format!(
                "max_scan_parallelism must be positive, got {}",
                config.max_scan_parallelism
            )));
        }

        self.conn.execute(
            "INSERT INTO quick_scan_config (id, cis_docker_benchmark_enabled, max_scan_parallelism)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET
                cis_docker_benchmark_enabled = excluded.cis_docker_benchmark_enabled,
                max_scan_parallelism = excluded.max_scan_parallelism,
                updated_at = (strftime('%s', 'now') * 1000);",
            params![
                QUICK_SCAN_CONFIG_ID,
                i64::from(config.cis_docker_benchmark_enabled),
                config.max_scan_parallelism,
            ],
        )?;

        info!(
            "event=quick_scan_config_set module=quick_scan_config status=ok cis_docker_benchmark_enabled={} max_scan_parallelism={}",
            config.cis_docker_benchmark_enabled,
            config.max_scan_parallelism
        );
        Ok(())
    }

    fn set_default(&self) -> ConfigRepoResult<QuickScanConfig> {
        let config = QuickScanConfig::default();
        self.set(&config)?;
        Ok(config)
    }
}
