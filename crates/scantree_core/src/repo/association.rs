//! Association reconciliation with replace semantics.
//!
//! # Responsibility
//! - Make one parent's persisted child set for a relation equal to a
//!   desired child collection, using discrete insert/update/delete
//!   statements inside the caller's transaction.
//!
//! # Invariants
//! - After `replace` succeeds the link set equals the desired ids exactly.
//! - Shared relations only ever delete junction rows, never child rows.
//! - Owned relations delete the child row when it leaves the collection.
//! - Relations whose children were saved by the tree walk only maintain
//!   links; their child rows are not written a second time.

use crate::model::cis_check::CisDockerBenchmarkCheck;
use crate::model::package::Package;
use crate::model::resource::Resource;
use crate::model::vulnerability::Vulnerability;
use crate::repo::scan_rows::{
    upsert_cis_check, upsert_vulnerability, RowError, RowResult, APPLICATIONS_TABLE,
    CIS_CHECKS_TABLE, PACKAGES_TABLE, RESOURCES_TABLE, VULNERABILITIES_TABLE,
};
use log::trace;
use rusqlite::{params, Connection};
use std::collections::BTreeSet;
use std::error::Error;
use std::fmt::{Display, Formatter};

pub type ReplaceResult<T> = Result<T, ReplaceError>;

/// Closed set of parent -> child relations in the scan tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Relation {
    ApplicationResources,
    ResourcePackages,
    ResourceCisChecks,
    PackageVulnerabilities,
}

/// How a child is attached to its parent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkKind {
    /// Many-to-many junction table; child rows are shared.
    Junction {
        table: &'static str,
        parent_column: &'static str,
        child_column: &'static str,
    },
    /// Foreign key on the child row; child rows are owned.
    OwnerColumn { column: &'static str },
}

impl Relation {
    pub fn name(self) -> &'static str {
        match self {
            Self::ApplicationResources => "application_resources",
            Self::ResourcePackages => "resource_packages",
            Self::ResourceCisChecks => "resource_cis_docker_benchmark_checks",
            Self::PackageVulnerabilities => "package_vulnerabilities",
        }
    }

    pub fn parent_table(self) -> &'static str {
        match self {
            Self::ApplicationResources => APPLICATIONS_TABLE,
            Self::ResourcePackages | Self::ResourceCisChecks => RESOURCES_TABLE,
            Self::PackageVulnerabilities => PACKAGES_TABLE,
        }
    }

    pub fn child_table(self) -> &'static str {
        match self {
            Self::ApplicationResources => RESOURCES_TABLE,
            Self::ResourcePackages => PACKAGES_TABLE,
            Self::ResourceCisChecks => CIS_CHECKS_TABLE,
            Self::PackageVulnerabilities => VULNERABILITIES_TABLE,
        }
    }

    pub fn link(self) -> LinkKind {
        match self {
            Self::ApplicationResources => LinkKind::Junction {
                table: "application_resources",
                parent_column: "application_id",
                child_column: "resource_id",
            },
            Self::ResourcePackages => LinkKind::Junction {
                table: "resource_packages",
                parent_column: "resource_id",
                child_column: "package_id",
            },
            Self::PackageVulnerabilities => LinkKind::Junction {
                table: "package_vulnerabilities",
                parent_column: "package_id",
                child_column: "vulnerability_id",
            },
            Self::ResourceCisChecks => LinkKind::OwnerColumn {
                column: "resource_id",
            },
        }
    }

    /// Whether unlinking a child also deletes its row.
    pub fn owns_children(self) -> bool {
        matches!(self.link(), LinkKind::OwnerColumn { .. })
    }

    /// Whether `replace` writes child rows itself. `false` means the tree
    /// walk already persisted them before the parent was reconciled.
    pub fn saves_children(self) -> bool {
        matches!(self, Self::ResourceCisChecks | Self::PackageVulnerabilities)
    }
}

impl Display for Relation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Step of `replace` that failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReplaceStage {
    LoadLinks,
    SaveChild,
    Link,
    Unlink,
}

impl ReplaceStage {
    fn as_str(self) -> &'static str {
        match self {
            Self::LoadLinks => "load current links",
            Self::SaveChild => "save child",
            Self::Link => "link child",
            Self::Unlink => "unlink child",
        }
    }
}

/// Reconciliation failure with the relation and child it happened on.
#[derive(Debug)]
pub struct ReplaceError {
    pub relation: Relation,
    pub stage: ReplaceStage,
    pub child_id: Option<String>,
    pub source: RowError,
}

impl ReplaceError {
    pub fn is_constraint_violation(&self) -> bool {
        self.source.is_constraint_violation()
    }
}

impl Display for ReplaceError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self.child_id.as_deref() {
            Some(child_id) => write!(
                f,
                "{} `{child_id}` in {}: {}",
                self.stage.as_str(),
                self.relation,
                self.source
            ),
            None => write!(
                f,
                "{} in {}: {}",
                self.stage.as_str(),
                self.relation,
                self.source
            ),
        }
    }
}

impl Error for ReplaceError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        Some(&self.source)
    }
}

/// Applied diff of one `replace` call.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplaceOutcome {
    /// Children that were not linked before.
    pub linked: usize,
    /// Children that stayed linked.
    pub kept: usize,
    /// Children that were linked before and are no longer desired.
    pub unlinked: usize,
}

/// Child entity that belongs to exactly one relation.
pub trait LinkedChild {
    const RELATION: Relation;

    fn child_id(&self) -> &str;

    /// Persists the child's own row. Only called when
    /// `Self::RELATION.saves_children()`; walked children keep the no-op.
    fn save(&self, _conn: &Connection, _parent_id: &str) -> RowResult<()> {
        Ok(())
    }
}

impl LinkedChild for Resource {
    const RELATION: Relation = Relation::ApplicationResources;

    fn child_id(&self) -> &str {
        &self.id
    }
}

impl LinkedChild for Package {
    const RELATION: Relation = Relation::ResourcePackages;

    fn child_id(&self) -> &str {
        &self.id
    }
}

impl LinkedChild for Vulnerability {
    const RELATION: Relation = Relation::PackageVulnerabilities;

    fn child_id(&self) -> &str {
        &self.id
    }

    fn save(&self, conn: &Connection, _parent_id: &str) -> RowResult<()> {
        upsert_vulnerability(conn, self)
    }
}

impl LinkedChild for CisDockerBenchmarkCheck {
    const RELATION: Relation = Relation::ResourceCisChecks;

    fn child_id(&self) -> &str {
        &self.id
    }

    fn save(&self, conn: &Connection, parent_id: &str) -> RowResult<()> {
        upsert_cis_check(conn, parent_id, self)
    }
}

/// Replaces the `C::RELATION` child set of `parent_id` with `children`.
///
/// Duplicate ids in `children` collapse into one link; the last occurrence
/// wins for saved child rows.
pub fn replace<C: LinkedChild>(
    conn: &Connection,
    parent_id: &str,
    children: &[C],
) -> ReplaceResult<ReplaceOutcome> {
    let relation = C::RELATION;

    let current = linked_child_ids(conn, relation, parent_id)
        .map_err(failure(relation, ReplaceStage::LoadLinks, None))?;

    if relation.saves_children() {
        for child in children {
            child.save(conn, parent_id).map_err(failure(
                relation,
                ReplaceStage::SaveChild,
                Some(child.child_id()),
            ))?;
        }
    }

    let desired: BTreeSet<&str> = children.iter().map(|child| child.child_id()).collect();
    let mut outcome = ReplaceOutcome::default();

    for &child_id in &desired {
        if current.contains(child_id) {
            outcome.kept += 1;
            continue;
        }
        link_child(conn, relation, parent_id, child_id)
            .map_err(failure(relation, ReplaceStage::Link, Some(child_id)))?;
        outcome.linked += 1;
    }

    for child_id in current.iter().filter(|id| !desired.contains(id.as_str())) {
        unlink_child(conn, relation, parent_id, child_id)
            .map_err(failure(relation, ReplaceStage::Unlink, Some(child_id.as_str())))?;
        outcome.unlinked += 1;
    }

    trace!(
        "event=association_replace module=association status=ok relation={} parent_id={} linked={} kept={} unlinked={}",
        relation,
        parent_id,
        outcome.linked,
        outcome.kept,
        outcome.unlinked
    );
    Ok(outcome)
}

/// Returns the ids currently linked to `parent_id` through `relation`.
pub fn linked_child_ids(
    conn: &Connection,
    relation: Relation,
    parent_id: &str,
) -> RowResult<BTreeSet<String>> {
    let sql = match relation.link() {
        LinkKind::Junction {
            table,
            parent_column,
            child_column,
        } => format!("SELECT {child_column} FROM {table} WHERE {parent_column} = ?1;"),
        LinkKind::OwnerColumn { column } => format!(
            "SELECT id FROM {} WHERE {column} = ?1;",
            relation.child_table()
        ),
    };

    let mut stmt = conn.prepare(&sql)?;
    let mut rows = stmt.query([parent_id])?;
    let mut ids = BTreeSet::new();
    while let Some(row) = rows.next()? {
        ids.insert(row.get::<_, String>(0)?);
    }
    Ok(ids)
}

fn link_child(
    conn: &Connection,
    relation: Relation,
    parent_id: &str,
    child_id: &str,
) -> RowResult<()> {
    match relation.link() {
        LinkKind::Junction {
            table,
            parent_column,
            child_column,
        } => {
            conn.execute(
                &format!(
                    "INSERT INTO {table} ({parent_column}, {child_column})
                     VALUES (?1, ?2)
                     ON CONFLICT DO NOTHING;"
                ),
                params![parent_id, child_id],
            )?;
        }
        // The owner column was written when the child row was saved.
        LinkKind::OwnerColumn { .. } => {}
    }
    Ok(())
}

fn unlink_child(
    conn: &Connection,
    relation: Relation,
    parent_id: &str,
    child_id: &str,
) -> RowResult<()> {
    let sql = match relation.link() {
        LinkKind::Junction {
            table,
            parent_column,
            child_column,
        } => format!("DELETE FROM {table} WHERE {parent_column} = ?1 AND {child_column} = ?2;"),
        LinkKind::OwnerColumn { column } => format!(
            "DELETE FROM {} WHERE {column} = ?1 AND id = ?2;",
            relation.child_table()
        ),
    };
    conn.execute(&sql, params![parent_id, child_id])?;
    Ok(())
}

fn failure(
    relation: Relation,
    stage: ReplaceStage,
    child_id: Option<&str>,
) -> impl FnOnce(RowError) -> ReplaceError {
    let child_id = child_id.map(str::to_string);
    move |source| ReplaceError {
        relation,
        stage,
        child_id,
        source,
    }
}
