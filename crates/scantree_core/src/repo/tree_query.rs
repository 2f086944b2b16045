//! Read-back of persisted scan trees.
//!
//! # Responsibility
//! - Rebuild application and resource subtrees from their rows and links.
//! - Provide membership lookups used by callers and tests to observe the
//!   result of a tree update.
//!
//! # Invariants
//! - Child collections are ordered by id.
//! - Rows holding unknown enum text or malformed JSON lists are reported as
//!   `InvalidData`, never silently defaulted.

use crate::db::DbError;
use crate::model::application::{Application, ApplicationType};
use crate::model::cis_check::{CisCheckLevel, CisDockerBenchmarkCheck};
use crate::model::package::Package;
use crate::model::resource::{Resource, ResourceType};
use crate::model::vulnerability::{Vulnerability, VulnerabilitySeverity};
use crate::repo::association::{linked_child_ids, Relation};
use crate::repo::scan_rows::{
    RowError, APPLICATIONS_TABLE, CIS_CHECKS_TABLE, PACKAGES_TABLE, RESOURCES_TABLE,
    VULNERABILITIES_TABLE,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type QueryResult<T> = Result<T, QueryError>;

#[derive(Debug)]
pub enum QueryError {
    Db(DbError),
    InvalidData(String),
}

impl Display for QueryError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Db(err) => write!(f, "{err}"),
            Self::InvalidData(message) => write!(f, "invalid persisted scan data: {message}"),
        }
    }
}

impl Error for QueryError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Db(err) => Some(err),
            Self::InvalidData(_) => None,
        }
    }
}

impl From<DbError> for QueryError {
    fn from(value: DbError) -> Self {
        Self::Db(value)
    }
}

impl From<rusqlite::Error> for QueryError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Db(DbError::Sqlite(value))
    }
}

impl From<RowError> for QueryError {
    fn from(value: RowError) -> Self {
        match value {
            RowError::Db(err) => Self::Db(err),
            other @ RowError::Encode { .. } => Self::InvalidData(other.to_string()),
        }
    }
}

/// Loads an application with its full subtree, or `None` if absent.
pub fn load_application(conn: &Connection, id: &str) -> QueryResult<Option<Application>> {
    let row = conn
        .query_row(
            "SELECT id, name, app_type, labels, environments
             FROM applications
             WHERE id = ?1;",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                ))
            },
        )
        .optional()?;

    let Some((id, name, app_type, labels, environments)) = row else {
        return Ok(None);
    };

    let app_type = ApplicationType::parse(&app_type).ok_or_else(|| {
        QueryError::InvalidData(format!("unknown application type `{app_type}` for `{id}`"))
    })?;

    let mut resources = Vec::new();
    for resource_id in application_resource_ids(conn, &id)? {
        let resource = load_resource(conn, &resource_id)?.ok_or_else(|| {
            QueryError::InvalidData(format!(
                "application `{id}` links missing resource `{resource_id}`"
            ))
        })?;
        resources.push(resource);
    }

    Ok(Some(Application {
        labels: decode_list("applications.labels", &labels)?,
        environments: decode_list("applications.environments", &environments)?,
        id,
        name,
        app_type,
        resources,
    }))
}

/// Loads a resource with its packages (and their vulnerabilities) and CIS
/// checks, or `None` if absent.
pub fn load_resource(conn: &Connection, id: &str) -> QueryResult<Option<Resource>> {
    let row = conn
        .query_row(
            "SELECT id, name, hash, resource_type, sbom_analyzers, vulnerability_scanners
             FROM resources
             WHERE id = ?1;",
            [id],
            |row| {
                Ok((
                    row.get::<_, String>(0)?,
                    row.get::<_, String>(1)?,
                    row.get::<_, String>(2)?,
                    row.get::<_, String>(3)?,
                    row.get::<_, String>(4)?,
                    row.get::<_, String>(5)?,
                ))
            },
        )
        .optional()?;

    let Some((id, name, hash, resource_type, sbom_analyzers, vulnerability_scanners)) = row else {
        return Ok(None);
    };

    let resource_type = ResourceType::parse(&resource_type).ok_or_else(|| {
        QueryError::InvalidData(format!("unknown resource type `{resource_type}` for `{id}`"))
    })?;

    let mut packages = Vec::new();
    for package_id in resource_package_ids(conn, &id)? {
        packages.push(load_package(conn, &package_id)?);
    }
    let cis_docker_benchmark_checks = load_resource_checks(conn, &id)?;

    Ok(Some(Resource {
        sbom_analyzers: decode_list("resources.sbom_analyzers", &sbom_analyzers)?,
        vulnerability_scanners: decode_list(
            "resources.vulnerability_scanners",
            &vulnerability_scanners,
        )?,
        id,
        name,
        hash,
        resource_type,
        packages,
        cis_docker_benchmark_checks,
    }))
}

pub fn application_resource_ids(conn: &Connection, id: &str) -> QueryResult<BTreeSet<String>> {
    Ok(linked_child_ids(conn, Relation::ApplicationResources, id)?)
}

pub fn resource_package_ids(conn: &Connection, id: &str) -> QueryResult<BTreeSet<String>> {
    Ok(linked_child_ids(conn, Relation::ResourcePackages, id)?)
}

pub fn resource_check_ids(conn: &Connection, id: &str) -> QueryResult<BTreeSet<String>> {
    Ok(linked_child_ids(conn, Relation::ResourceCisChecks, id)?)
}

pub fn package_vulnerability_ids(conn: &Connection, id: &str) -> QueryResult<BTreeSet<String>> {
    Ok(linked_child_ids(conn, Relation::PackageVulnerabilities, id)?)
}

/// Returns whether `table` holds a row with primary key `id`.
///
/// `table` must be one of the scan entity tables.
pub fn row_exists(conn: &Connection, table: &str, id: &str) -> QueryResult<bool> {
    let table = entity_table(table)?;
    let exists: i64 = conn.query_row(
        &format!("SELECT EXISTS(SELECT 1 FROM {table} WHERE id = ?1);"),
        [id],
        |row| row.get(0),
    )?;
    Ok(exists == 1)
}

/// Counts rows of a scan entity or junction table.
pub fn count_rows(conn: &Connection, table: &str) -> QueryResult<i64> {
    let table = match table {
        "application_resources" | "resource_packages" | "package_vulnerabilities" => table,
        other => entity_table(other)?,
    };
    Ok(conn.query_row(&format!("SELECT COUNT(*) FROM {table};"), [], |row| {
        row.get(0)
    })?)
}

fn entity_table(table: &str) -> QueryResult<&'static str> {
    [
        APPLICATIONS_TABLE,
        RESOURCES_TABLE,
        PACKAGES_TABLE,
        VULNERABILITIES_TABLE,
        CIS_CHECKS_TABLE,
    ]
    .into_iter()
    .find(|known| *known == table)
    .ok_or_else(|| QueryError::InvalidData(format!("unknown scan table `{table}`")))
}

fn load_package(conn: &Connection, id: &str) -> QueryResult<Package> {
    let mut package = conn
        .query_row(
            "SELECT id, name, version, license, language
             FROM packages
             WHERE id = ?1;",
            [id],
            |row| {
                Ok(Package {
                    id: row.get(0)?,
                    name: row.get(1)?,
                    version: row.get(2)?,
                    license: row.get(3)?,
                    language: row.get(4)?,
                    vulnerabilities: Vec::new(),
                })
            },
        )
        .optional()?
        .ok_or_else(|| QueryError::InvalidData(format!("linked package `{id}` is missing")))?;

    let mut stmt = conn.prepare(
        "SELECT v.id, v.name, v.severity, v.description, v.fix_version, v.links
         FROM vulnerabilities v
         JOIN package_vulnerabilities pv ON pv.vulnerability_id = v.id
         WHERE pv.package_id = ?1
         ORDER BY v.id ASC;",
    )?;
    let mut rows = stmt.query(params![id])?;
    while let Some(row) = rows.next()? {
        package.vulnerabilities.push(parse_vulnerability_row(row)?);
    }

    Ok(package)
}

fn load_resource_checks(
    conn: &Connection,
    resource_id: &str,
) -> QueryResult<Vec<CisDockerBenchmarkCheck>> {
    let mut stmt = conn.prepare(
        "SELECT id, code, level, descriptions
         FROM cis_docker_benchmark_checks
         WHERE resource_id = ?1
         ORDER BY id ASC;",
    )?;
    let mut rows = stmt.query(params![resource_id])?;
    let mut checks = Vec::new();
    while let Some(row) = rows.next()? {
        let id: String = row.get(0)?;
        let level: String = row.get(2)?;
        let level = CisCheckLevel::parse(&level).ok_or_else(|| {
            QueryError::InvalidData(format!("unknown check level `{level}` for `{id}`"))
        })?;
        checks.push(CisDockerBenchmarkCheck {
            code: row.get(1)?,
            descriptions: row.get(3)?,
            id,
            level,
        });
    }
    Ok(checks)
}

fn parse_vulnerability_row(row: &Row<'_>) -> QueryResult<Vulnerability> {
    let id: String = row.get(0)?;
    let severity: String = row.get(2)?;
    let links: String = row.get(5)?;
    let severity = VulnerabilitySeverity::parse(&severity).ok_or_else(|| {
        QueryError::InvalidData(format!("unknown severity `{severity}` for `{id}`"))
    })?;

    Ok(Vulnerability {
        name: row.get(1)?,
        description: row.get(3)?,
        fix_version: row.get(4)?,
        links: decode_list("vulnerabilities.links", &links)?,
        id,
        severity,
    })
}

fn decode_list(column: &str, raw: &str) -> QueryResult<Vec<String>> {
    serde_json::from_str(raw)
        .map_err(|err| QueryError::InvalidData(format!("column `{column}` is not a JSON list: {err}")))
}

#[cfg(test)]
mod tests {
    use super::{count_rows, decode_list, row_exists, QueryError};
    use crate::db::open_db_in_memory;

    #[test]
    fn decode_list_rejects_non_list_json() {
        assert_eq!(
            decode_list("resources.sbom_analyzers", "[\"syft\"]").unwrap(),
            vec!["syft".to_string()]
        );
        assert!(matches!(
            decode_list("resources.sbom_analyzers", "{}"),
            Err(QueryError::InvalidData(_))
        ));
    }

    #[test]
    fn lookups_reject_unknown_tables() {
        let conn = open_db_in_memory().unwrap();
        assert!(matches!(
            row_exists(&conn, "sqlite_master", "x"),
            Err(QueryError::InvalidData(_))
        ));
        assert_eq!(count_rows(&conn, "resource_packages").unwrap(), 0);
    }
}
