//! Table-changed signals for the view refresh subsystem.
//!
//! # Responsibility
//! - Define the outbound notification contract of the object tree.
//! - Collect tables touched during one tree update so they can be emitted
//!   once the transaction has committed.
//!
//! # Invariants
//! - Signals are at-least-once; receivers must tolerate duplicates.
//! - A rolled-back tree update emits no signal.

use log::debug;
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, PoisonError};

/// Receiver of "table X changed" signals. Fire-and-forget.
pub trait TableChangeNotifier {
    fn table_changed(&self, table: &str);
}

impl<N: TableChangeNotifier + ?Sized> TableChangeNotifier for &N {
    fn table_changed(&self, table: &str) {
        (**self).table_changed(table);
    }
}

impl<N: TableChangeNotifier + ?Sized> TableChangeNotifier for Arc<N> {
    fn table_changed(&self, table: &str) {
        (**self).table_changed(table);
    }
}

/// Notifier for callers without a view refresh subsystem.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopNotifier;

impl TableChangeNotifier for NoopNotifier {
    fn table_changed(&self, _table: &str) {}
}

/// Deduplicating set of tables whose dependent views need a refresh.
///
/// A refresh worker periodically calls `drain` and rebuilds the views over
/// the returned tables.
#[derive(Debug, Default)]
pub struct PendingViewRefresh {
    tables: Mutex<BTreeSet<String>>,
}

impl PendingViewRefresh {
    pub fn new() -> Self {
        Self::default()
    }

    /// Takes all pending table names, leaving the set empty.
    pub fn drain(&self) -> Vec<String> {
        let mut tables = self.tables.lock().unwrap_or_else(PoisonError::into_inner);
        std::mem::take(&mut *tables).into_iter().collect()
    }

    pub fn is_pending(&self, table: &str) -> bool {
        self.tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains(table)
    }
}

impl TableChangeNotifier for PendingViewRefresh {
    fn table_changed(&self, table: &str) {
        let inserted = self
            .tables
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(table.to_string());
        if inserted {
            debug!("event=view_refresh_pending module=notify table={table}");
        }
    }
}

/// Tables touched by one tree update, in deterministic order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ChangedTables {
    tables: BTreeSet<&'static str>,
}

impl ChangedTables {
    pub fn record(&mut self, tables: &[&'static str]) {
        self.tables.extend(tables.iter().copied());
    }

    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &'static str> + '_ {
        self.tables.iter().copied()
    }

    /// Comma-joined table names for log lines, `-` when nothing changed.
    pub fn log_field(&self) -> String {
        if self.is_empty() {
            return "-".to_string();
        }
        self.iter().collect::<Vec<_>>().join(",")
    }

    /// Sends every recorded table to `notifier`.
    pub fn emit<N: TableChangeNotifier + ?Sized>(&self, notifier: &N) {
        for table in &self.tables {
            notifier.table_changed(table);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{ChangedTables, PendingViewRefresh, TableChangeNotifier};

    #[test]
    fn pending_view_refresh_deduplicates_and_drains() {
        let pending = PendingViewRefresh::new();
        pending.table_changed("packages");
        pending.table_changed("resources");
        pending.table_changed("packages");

        assert!(pending.is_pending("packages"));
        assert_eq!(pending.drain(), vec!["packages", "resources"]);
        assert!(pending.drain().is_empty());
    }

    #[test]
    fn changed_tables_emit_each_table_once() {
        let mut changed = ChangedTables::default();
        changed.record(&["applications", "resources"]);
        changed.record(&["resources", "packages"]);

        let pending = PendingViewRefresh::new();
        changed.emit(&pending);
        assert_eq!(pending.drain(), vec!["applications", "packages", "resources"]);
        assert_eq!(changed.log_field(), "applications,packages,resources");
    }

    #[test]
    fn empty_changed_tables_emit_nothing() {
        let changed = ChangedTables::default();
        let pending = PendingViewRefresh::new();
        changed.emit(&pending);

        assert!(changed.is_empty());
        assert_eq!(changed.log_field(), "-");
        assert!(pending.drain().is_empty());
    }
}
