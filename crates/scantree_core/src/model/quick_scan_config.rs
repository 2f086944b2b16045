//! Runtime quick-scan configuration record.
//!
//! # Invariants
//! - Exactly one record exists once set; it is stored under a fixed key.

use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_SCAN_PARALLELISM: i64 = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuickScanConfig {
    pub cis_docker_benchmark_enabled: bool,
    pub max_scan_parallelism: i64,
}

impl Default for QuickScanConfig {
    fn default() -> Self {
        Self {
            cis_docker_benchmark_enabled: false,
            max_scan_parallelism: DEFAULT_MAX_SCAN_PARALLELISM,
        }
    }
}
