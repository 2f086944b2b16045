//! Driver-conditional exclusive table locks for shared-row upserts.
//!
//! # Responsibility
//! - Serialize concurrent tree updates that upsert the same shared row
//!   (packages), so the second writer waits instead of failing on a
//!   duplicate primary key.
//!
//! # Invariants
//! - Only used inside an open transaction; a taken lock lasts until that
//!   transaction commits or rolls back, not until the guard drops.
//! - `DbDriver::Local` never issues a statement: SQLite has one writer and
//!   tree transactions begin `IMMEDIATE`, so concurrent writers already wait
//!   on the engine write lock.
//! - Unknown drivers skip locking with a warning.

use crate::db::{DbDriver, DbError};
use log::{trace, warn};
use rusqlite::Connection;
use std::error::Error;
use std::fmt::{Display, Formatter};
use std::marker::PhantomData;

pub type LockResult<T> = Result<T, LockError>;

#[derive(Debug)]
pub enum LockError {
    /// The backend rejected the lock statement.
    Statement {
        table: &'static str,
        source: DbError,
    },
}

impl Display for LockError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Statement { table, source } => {
                write!(f, "failed to lock table `{table}`: {source}")
            }
        }
    }
}

impl Error for LockError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            Self::Statement { source, .. } => Some(source),
        }
    }
}

/// How a lock request was satisfied.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LockMode {
    /// Backend serializes writers itself; nothing was executed.
    EngineSerialized,
    /// An explicit table lock statement was executed.
    Exclusive,
    /// Driver has no lock support; the upsert runs unguarded.
    Unsupported,
}

/// Scope marker for one exclusive-lock section inside a transaction.
#[derive(Debug)]
pub struct TableLockGuard<'conn> {
    table: &'static str,
    mode: LockMode,
    _conn: PhantomData<&'conn Connection>,
}

impl TableLockGuard<'_> {
    pub fn table(&self) -> &'static str {
        self.table
    }

    pub fn mode(&self) -> LockMode {
        self.mode
    }
}

impl Drop for TableLockGuard<'_> {
    fn drop(&mut self) {
        trace!(
            "event=table_lock module=table_lock status=scope_end table={} mode={:?}",
            self.table,
            self.mode
        );
    }
}

/// Returns the statement that takes an exclusive lock on `table` for the
/// rest of the transaction, or `None` when `driver` needs no statement.
pub fn lock_statement(driver: &DbDriver, table: &str) -> Option<String> {
    match driver {
        DbDriver::Postgres => Some(format!("LOCK TABLE {table} IN ACCESS EXCLUSIVE MODE;")),
        DbDriver::Local | DbDriver::Other(_) => None,
    }
}

/// Takes an exclusive lock on `table` when `driver` requires one.
///
/// `conn` must be inside the transaction the lock should belong to.
pub fn with_exclusive_lock<'conn>(
    conn: &'conn Connection,
    driver: &DbDriver,
    table: &'static str,
) -> LockResult<TableLockGuard<'conn>> {
    let mode = match (driver, lock_statement(driver, table)) {
        (_, Some(statement)) => {
            conn.execute_batch(&statement)
                .map_err(|err| LockError::Statement {
                    table,
                    source: err.into(),
                })?;
            LockMode::Exclusive
        }
        (DbDriver::Other(name), None) => {
            warn!(
                "event=table_lock module=table_lock status=unsupported driver={} table={}",
                name, table
            );
            LockMode::Unsupported
        }
        (_, None) => LockMode::EngineSerialized,
    };

    trace!(
        "event=table_lock module=table_lock status=acquired table={} mode={:?}",
        table,
        mode
    );
    Ok(TableLockGuard {
        table,
        mode,
        _conn: PhantomData,
    })
}
