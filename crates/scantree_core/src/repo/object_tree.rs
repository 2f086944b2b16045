//! Object tree repository: atomic upsert of whole scan trees.
//!
//! # Responsibility
//! - Persist an application (or a single resource) subtree in one
//!   transaction, depth first, deepest entities before their parents.
//! - Reconcile every level's child membership to exactly what was
//!   submitted.
//! - Tell the view refresh subsystem which tables changed, after commit.
//!
//! # Invariants
//! - One `IMMEDIATE` transaction per call; any failure rolls back every
//!   level of the call.
//! - After a child's subtree is persisted its nested collections are
//!   cleared in memory, so parent-level reconciliation only ever sees
//!   scalar/identity fields of that child.
//! - Package rows are upserted under the packages table lock guard.
//! - Package -> vulnerability links are left untouched when
//!   `update_vulnerabilities` is `false`.

use crate::db::migrations::verify_schema;
use crate::db::{DbDriver, DbError};
use crate::model::application::Application;
use crate::model::package::Package;
use crate::model::resource::Resource;
use crate::notify::{ChangedTables, TableChangeNotifier};
use crate::repo::association::{replace, ReplaceError};
use crate::repo::scan_rows::{
    upsert_application, upsert_package, upsert_resource, RowError, APPLICATIONS_TABLE,
    CIS_CHECKS_TABLE, PACKAGES_TABLE, RESOURCES_TABLE, VULNERABILITIES_TABLE,
};
use crate::repo::table_lock::{with_exclusive_lock, LockError};
use log::{error, info, trace};
use rusqlite::{Connection, Transaction, TransactionBehavior};
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::time::Instant;

/// Result type used by object tree operations.
pub type TreeResult<T> = Result<T, TreeError>;

/// Tree-level operation an error was raised in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TreeOperation {
    UpdateApplication,
    UpdateResource,
    UpdatePackage,
    UpdateApplicationResources,
    UpdateResourcePackages,
    UpdateResourceCisChecks,
    UpdatePackageVulnerabilities,
}

impl TreeOperation {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::UpdateApplication => "update application",
            Self::UpdateResource => "update resource",
            Self::UpdatePackage => "update package",
            Self::UpdateApplicationResources => "update application resources association",
            Self::UpdateResourcePackages => "update resource packages association",
            Self::UpdateResourceCisChecks => {
                "update resource cis_docker_benchmark_checks association"
            }
            Self::UpdatePackageVulnerabilities => "update package vulnerabilities association",
        }
    }
}

impl Display for TreeOperation {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Errors from object tree operations.
#[derive(Debug)]
pub enum TreeError {
    /// Connection handed to `try_new` is not a migrated scan store.
    Schema(DbError),
    /// Begin/commit of the call's transaction failed.
    Transaction(DbError),
    /// One entity's own row could not be written.
    Row {
        table: &'static str,
        id: String,
        source: RowError,
    },
    Lock(LockError),
    Replace(ReplaceError),
    /// Failure inside a nested level, tagged with the running operation.
    Failed {
        operation: TreeOperation,
        source: Box<TreeError>,
    },
}

impl TreeError {
    fn failed(operation: TreeOperation, source: TreeError) -> Self {
        Self::Failed {
            operation,
            source: Box::new(source),
        }
    }

    fn row(table: &'static str, id: &str, source: RowError) -> Self {
        Self::Row {
            table,
            id: id.to_string(),
            source,
        }
    }

    /// Outermost operation this error was wrapped with.
    pub fn operation(&self) -> Option<TreeOperation> {
        match self {
            Self::Failed { operation, .. } => Some(*operation),
            _ => None,
        }
    }

    /// Innermost error, with every `Failed` layer removed.
    pub fn root_cause(&self) -> &TreeError {
        let mut current = self;
        while let Self::Failed { source, .. } = current {
            current = source;
        }
        current
    }

    /// Whether the store rejected a write on a constraint. Callers may retry
    /// the whole tree update in that case.
    pub fn is_constraint_violation(&self) -> bool {
        match self.root_cause() {
            Self::Transaction(err) => err.is_constraint_violation(),
            Self::Row { source, .. } => source.is_constraint_violation(),
            Self::Lock(LockError::Statement { source, .. }) => source.is_constraint_violation(),
            Self::Replace(err) => err.is_constraint_violation(),
            _ => false,
        }
    }
}

impl Display for TreeError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Schema(err) => write!(f, "object tree store is not ready: {err}"),
            Self::Transaction(err) => write!(f, "transaction failed: {err}"),
            Self::Row { table, id, source } => {
                write!(f, "failed to save {table} row `{id}`: {source}")
            }
            Self::Lock(err) => write!(f, "{err}"),
            Self::Replace(err) => write!(f, "{err}"),
            Self::Failed { operation, source } => write!(f, "failed to {operation}: {source}"),
        }
    }
}

impl Error for TreeError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Schema(err) => Some(err),
            Self::Transaction(err) => Some(err),
            Self::Row { source, .. } => Some(source),
            Self::Lock(err) => Some(err),
            Self::Replace(err) => Some(err),
            Self::Failed { source, .. } => Some(source.as_ref()),
        }
    }
}

impl From<rusqlite::Error> for TreeError {
    fn from(value: rusqlite::Error) -> Self {
        Self::Transaction(DbError::Sqlite(value))
    }
}

/// Caller-scoped values carried through one tree update for log
/// correlation. Opaque to the update logic.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionParams {
    pub actor: Option<String>,
    pub request_id: Option<String>,
}

impl TransactionParams {
    pub fn with_actor(mut self, actor: impl Into<String>) -> Self {
        self.actor = Some(actor.into());
        self
    }

    pub fn with_request_id(mut self, request_id: impl Into<String>) -> Self {
        self.request_id = Some(request_id.into());
        self
    }

    fn log_context(&self) -> String {
        format!(
            "actor={} request_id={}",
            self.actor.as_deref().unwrap_or("-"),
            self.request_id.as_deref().unwrap_or("-")
        )
    }
}

/// Repository interface for whole-tree updates.
pub trait ObjectTree {
    /// Upserts `app` with all of its resources, packages, checks and
    /// (optionally) vulnerabilities, replacing every child set on the way.
    ///
    /// # Side effects
    /// - Clears the nested collections of `app.resources` in memory.
    /// - Emits table-changed signals after commit.
    fn set_application(
        &self,
        app: &mut Application,
        params: &TransactionParams,
        update_vulnerabilities: bool,
    ) -> TreeResult<()>;

    /// Upserts `resource` with its packages, checks and (optionally)
    /// vulnerabilities. Application links of the resource are untouched.
    ///
    /// # Side effects
    /// - Clears the vulnerabilities of `resource.packages` in memory.
    /// - Emits table-changed signals after commit.
    fn set_resource(
        &self,
        resource: &mut Resource,
        params: &TransactionParams,
        update_vulnerabilities: bool,
    ) -> TreeResult<()>;
}

/// SQLite-backed object tree.
pub struct SqliteObjectTree<'conn, N: TableChangeNotifier> {
    conn: &'conn Connection,
    driver: DbDriver,
    notifier: N,
}

impl<'conn, N: TableChangeNotifier> SqliteObjectTree<'conn, N> {
    /// Creates the object tree over a migrated connection.
    pub fn try_new(conn: &'conn Connection, driver: DbDriver, notifier: N) -> TreeResult<Self> {
        verify_schema(conn).map_err(TreeError::Schema)?;
        Ok(Self {
            conn,
            driver,
            notifier,
        })
    }

    pub fn driver(&self) -> &DbDriver {
        &self.driver
    }

    pub fn notifier(&self) -> &N {
        &self.notifier
    }

    /// Runs `body` inside one transaction and emits the changed tables once
    /// it committed. Dropping the transaction on error rolls it back.
    fn run_tree_update(
        &self,
        event: &'static str,
        params: &TransactionParams,
        body: impl FnOnce(&mut TreeWalk<'_>) -> TreeResult<()>,
    ) -> TreeResult<()> {
        let started_at = Instant::now();
        let context = params.log_context();
        trace!("event={event} module=object_tree status=start {context}");

        let result = (|| -> TreeResult<ChangedTables> {
            let tx = Transaction::new_unchecked(self.conn, TransactionBehavior::Immediate)?;
            let mut walk = TreeWalk {
                conn: &tx,
                driver: &self.driver,
                context: &context,
                changed: ChangedTables::default(),
            };
            body(&mut walk)?;
            let changed = walk.changed;
            tx.commit()?;
            Ok(changed)
        })();

        match result {
            Ok(changed) => {
                changed.emit(&self.notifier);
                info!(
                    "event={} module=object_tree status=ok {} duration_ms={} changed_tables={}",
                    event,
                    context,
                    started_at.elapsed().as_millis(),
                    changed.log_field()
                );
                Ok(())
            }
            Err(err) => {
                error!(
                    "event={} module=object_tree status=error {} duration_ms={} error={}",
                    event,
                    context,
                    started_at.elapsed().as_millis(),
                    err
                );
                Err(err)
            }
        }
    }
}

impl<N: TableChangeNotifier> ObjectTree for SqliteObjectTree<'_, N> {
    fn set_application(
        &self,
        app: &mut Application,
        params: &TransactionParams,
        update_vulnerabilities: bool,
    ) -> TreeResult<()> {
        self.run_tree_update("set_application", params, |walk| {
            walk.update_application(app, update_vulnerabilities)
                .map_err(|err| TreeError::failed(TreeOperation::UpdateApplication, err))
        })
    }

    fn set_resource(
        &self,
        resource: &mut Resource,
        params: &TransactionParams,
        update_vulnerabilities: bool,
    ) -> TreeResult<()> {
        self.run_tree_update("set_resource", params, |walk| {
            walk.update_resource(resource, update_vulnerabilities)
                .map_err(|err| TreeError::failed(TreeOperation::UpdateResource, err))
        })
    }
}

/// State of one post-order walk inside an open transaction.
struct TreeWalk<'a> {
    conn: &'a Connection,
    driver: &'a DbDriver,
    context: &'a str,
    changed: ChangedTables,
}

impl TreeWalk<'_> {
    fn update_application(
        &mut self,
        app: &mut Application,
        update_vulnerabilities: bool,
    ) -> TreeResult<()> {
        for resource in &mut app.resources {
            self.update_resource(resource, update_vulnerabilities)
                .map_err(|err| TreeError::failed(TreeOperation::UpdateResource, err))?;

            resource.packages.clear();
            resource.cis_docker_benchmark_checks.clear();
        }

        trace!(
            "event=tree_node_save module=object_tree kind=application id={} resources={} {}",
            app.id,
            app.resources.len(),
            self.context
        );
        upsert_application(self.conn, app)
            .map_err(|source| TreeError::row(APPLICATIONS_TABLE, &app.id, source))?;

        replace(self.conn, &app.id, &app.resources).map_err(|err| {
            TreeError::failed(
                TreeOperation::UpdateApplicationResources,
                TreeError::Replace(err),
            )
        })?;

        self.changed.record(&[APPLICATIONS_TABLE, RESOURCES_TABLE]);
        Ok(())
    }

    fn update_resource(
        &mut self,
        resource: &mut Resource,
        update_vulnerabilities: bool,
    ) -> TreeResult<()> {
        for package in &mut resource.packages {
            self.update_package(package, update_vulnerabilities)
                .map_err(|err| TreeError::failed(TreeOperation::UpdatePackage, err))?;

            package.vulnerabilities.clear();
        }

        trace!(
            "event=tree_node_save module=object_tree kind=resource id={} packages={} checks={} {}",
            resource.id,
            resource.packages.len(),
            resource.cis_docker_benchmark_checks.len(),
            self.context
        );
        upsert_resource(self.conn, resource)
            .map_err(|source| TreeError::row(RESOURCES_TABLE, &resource.id, source))?;

        replace(self.conn, &resource.id, &resource.packages).map_err(|err| {
            TreeError::failed(TreeOperation::UpdateResourcePackages, TreeError::Replace(err))
        })?;

        replace(
            self.conn,
            &resource.id,
            &resource.cis_docker_benchmark_checks,
        )
        .map_err(|err| {
            TreeError::failed(TreeOperation::UpdateResourceCisChecks, TreeError::Replace(err))
        })?;

        self.changed
            .record(&[RESOURCES_TABLE, PACKAGES_TABLE, CIS_CHECKS_TABLE]);
        Ok(())
    }

    fn update_package(&mut self, package: &Package, update_vulnerabilities: bool) -> TreeResult<()> {
        trace!(
            "event=tree_node_save module=object_tree kind=package id={} vulnerabilities={} {}",
            package.id,
            package.vulnerabilities.len(),
            self.context
        );

        {
            let _lock = with_exclusive_lock(self.conn, self.driver, PACKAGES_TABLE)
                .map_err(TreeError::Lock)?;
            upsert_package(self.conn, package)
                .map_err(|source| TreeError::row(PACKAGES_TABLE, &package.id, source))?;
        }

        if !update_vulnerabilities {
            self.changed.record(&[PACKAGES_TABLE]);
            return Ok(());
        }

        replace(self.conn, &package.id, &package.vulnerabilities).map_err(|err| {
            TreeError::failed(
                TreeOperation::UpdatePackageVulnerabilities,
                TreeError::Replace(err),
            )
        })?;

        self.changed.record(&[PACKAGES_TABLE, VULNERABILITIES_TABLE]);
        Ok(())
    }
}
