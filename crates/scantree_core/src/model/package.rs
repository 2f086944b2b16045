//! Package entity.
//!
//! # Invariants
//! - Packages are deduplicated by `id` across all resources, so concurrent
//!   tree updates may write the same row.

use super::derive_stable_id;
use super::vulnerability::Vulnerability;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub id: String,
    pub name: String,
    pub version: String,
    #[serde(default)]
    pub license: String,
    #[serde(default)]
    pub language: String,
    #[serde(default)]
    pub vulnerabilities: Vec<Vulnerability>,
}

impl Package {
    /// Creates a package whose id is derived from `name` and `version`.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        let name = name.into();
        let version = version.into();
        Self {
            id: Self::derive_id(&name, &version),
            name,
            version,
            license: String::new(),
            language: String::new(),
            vulnerabilities: Vec::new(),
        }
    }

    pub fn derive_id(name: &str, version: &str) -> String {
        derive_stable_id(&format!("{name}.{version}"))
    }

    pub fn with_vulnerabilities(mut self, vulnerabilities: Vec<Vulnerability>) -> Self {
        self.vulnerabilities = vulnerabilities;
        self
    }
}
