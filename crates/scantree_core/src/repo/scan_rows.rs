//! Scalar row upserts for scan tree entities.
//!
//! # Responsibility
//! - Persist one entity's own columns, never its child collections.
//! - Keep column encoding (enum text, JSON lists) in one place.
//!
//! # Invariants
//! - Every upsert is `INSERT ... ON CONFLICT(id) DO UPDATE`: insert if
//!   absent, otherwise update by primary key. Concurrent writers of the same
//!   key end with one row.
//! - `created_at` is never touched by the update branch.

use crate::db::DbError;
use crate::model::application::Application;
use crate::model::cis_check::CisDockerBenchmarkCheck;
use crate::model::package::Package;
use crate::model::resource::Resource;
use crate::model::vulnerability::Vulnerability;
use rusqlite::{params, Connection};
use std::error::Error;
use std::fmt::{Display, Formatter};

pub const APPLICATIONS_TABLE: &str = "applications";
pub const RESOURCES_TABLE: &str = "resources";
pub const PACKAGES_TABLE: &str = "packages";
pub const VULNERABILITIES_TABLE: &str = "vulnerabilities";
pub const CIS_CHECKS_TABLE: &str = "cis_docker_benchmark_checks";

pub type RowResult<T> = Result<T, RowError>;

/// Failure to write one entity row.
#[derive(Debug)]
pub enum RowError {
    Db(DbError),
    /// A list column could not be encoded as JSON.
    Encode {
        column: &'static str,
        source: serde_json::Error,
    },
}

impl RowError {
    pub fn is_constraint_violation(&self) -> bool {
        match self {
            Self::Db(err) => err.is_constraint_violation(),
            Self::Encode { .. } => false,
        }
    }
}

impl Display for RowError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::Encode { column, source } => {
                write!(f, "failed to encode column `{column}`: {source}")
            }
        }
    }
}

impl Error for RowError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::Encode { source, .. } => Some(source),
        }
    }
}

impl From<DbError> for RowError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for RowError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

pub(crate) fn upsert_application(conn: &Connection, app: &Application) -> RowResult<()> {
    conn.execute(
        "INSERT INTO applications (id, name, app_type, labels, environments)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            app_type = excluded.app_type,
            labels = excluded.labels,
            environments = excluded.environments,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![
            app.id.as_str(),
            app.name.as_str(),
            app.app_type.as_str(),
            encode_list("applications.labels", &app.labels)?,
            encode_list("applications.environments", &app.environments)?,
        ],
    )?;
    Ok(())
}

pub(crate) fn upsert_resource(conn: &Connection, resource: &Resource) -> RowResult<()> {
    conn.execute(
        "INSERT INTO resources (
            id,
            name,
            hash,
            resource_type,
            sbom_analyzers,
            vulnerability_scanners
         ) VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            hash = excluded.hash,
            resource_type = excluded.resource_type,
            sbom_analyzers = excluded.sbom_analyzers,
            vulnerability_scanners = excluded.vulnerability_scanners,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![
            resource.id.as_str(),
            resource.name.as_str(),
            resource.hash.as_str(),
            resource.resource_type.as_str(),
            encode_list("resources.sbom_analyzers", &resource.sbom_analyzers)?,
            encode_list(
                "resources.vulnerability_scanners",
                &resource.vulnerability_scanners
            )?,
        ],
    )?;
    Ok(())
}

pub(crate) fn upsert_package(conn: &Connection, package: &Package) -> RowResult<()> {
    conn.execute(
        "INSERT INTO packages (id, name, version, license, language)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            version = excluded.version,
            license = excluded.license,
            language = excluded.language,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![
            package.id.as_str(),
            package.name.as_str(),
            package.version.as_str(),
            package.license.as_str(),
            package.language.as_str(),
        ],
    )?;
    Ok(())
}

pub(crate) fn upsert_vulnerability(
    conn: &Connection,
    vulnerability: &Vulnerability,
) -> RowResult<()> {
    conn.execute(
        "INSERT INTO vulnerabilities (id, name, severity, description, fix_version, links)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)
         ON CONFLICT(id) DO UPDATE SET
            name = excluded.name,
            severity = excluded.severity,
            description = excluded.description,
            fix_version = excluded.fix_version,
            links = excluded.links,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![
            vulnerability.id.as_str(),
            vulnerability.name.as_str(),
            vulnerability.severity.as_str(),
            vulnerability.description.as_str(),
            vulnerability.fix_version.as_deref(),
            encode_list("vulnerabilities.links", &vulnerability.links)?,
        ],
    )?;
    Ok(())
}

/// Upserts one check and (re)assigns it to `resource_id`.
pub(crate) fn upsert_cis_check(
    conn: &Connection,
    resource_id: &str,
    check: &CisDockerBenchmarkCheck,
) -> RowResult<()> {
    conn.execute(
        "INSERT INTO cis_docker_benchmark_checks (id, resource_id, code, level, descriptions)
         VALUES (?1, ?2, ?3, ?4, ?5)
         ON CONFLICT(id) DO UPDATE SET
            resource_id = excluded.resource_id,
            code = excluded.code,
            level = excluded.level,
            descriptions = excluded.descriptions,
            updated_at = (strftime('%s', 'now') * 1000);",
        params![
            check.id.as_str(),
            resource_id,
            check.code.as_str(),
            check.level.as_str(),
            check.descriptions.as_str(),
        ],
    )?;
    Ok(())
}

fn encode_list(column: &'static str, values: &[String]) -> RowResult<String> {
    serde_json::to_string(values).map_err(|source| RowError::Encode { column, source })
}
