//! Core of the scan tree store.
//!
//! Persists application -> resource -> package -> vulnerability trees (plus
//! CIS Docker benchmark checks per resource) atomically, reconciling child
//! membership at every level and signalling changed tables after commit.

pub mod db;
pub mod logging;
pub mod model;
pub mod notify;
pub mod repo;

pub use db::{open_db, open_db_in_memory, open_store, DbDriver, DbError, StoreConfig};
pub use logging::{default_log_level, init_logging, logging_status, LoggingError};
pub use model::application::{Application, ApplicationType};
pub use model::cis_check::{CisCheckLevel, CisDockerBenchmarkCheck};
pub use model::package::Package;
pub use model::quick_scan_config::QuickScanConfig;
pub use model::resource::{Resource, ResourceType};
pub use model::vulnerability::{Vulnerability, VulnerabilitySeverity};
pub use notify::{NoopNotifier, PendingViewRefresh, TableChangeNotifier};
pub use repo::object_tree::{
    ObjectTree, SqliteObjectTree, TransactionParams, TreeError, TreeOperation, TreeResult,
};
pub use repo::quick_scan_config_repo::{
    ConfigRepoError, QuickScanConfigRepository, SqliteQuickScanConfigRepository,
};
pub use repo::tree_query::{load_application, load_resource, QueryError};

/// Returns the core crate version.
pub fn core_version() -> &'static str {
    env!("CARGO_PKG_VERSION")
}
