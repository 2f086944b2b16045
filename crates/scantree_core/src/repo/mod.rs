//! Persistence of scan trees and the runtime configuration record.
//!
//! # Responsibility
//! - Own every SQL statement that writes or reads scan entities.
//! - Expose the tree-level write API (`object_tree`) and its read-back
//!   (`tree_query`).
//!
//! # Invariants
//! - Tree writes happen inside exactly one transaction per call.
//! - Child membership is reconciled with replace semantics.

pub mod association;
pub mod object_tree;
pub mod quick_scan_config_repo;
pub mod scan_rows;
pub mod table_lock;
pub mod tree_query;
