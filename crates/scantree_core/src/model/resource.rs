//! Resource entity (image, directory or file that was scanned).

use super::cis_check::CisDockerBenchmarkCheck;
use super::derive_stable_id;
use super::package::Package;
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceType {
    Image,
    Directory,
    File,
}

impl ResourceType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Directory => "directory",
            Self::File => "file",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "image" => Some(Self::Image),
            "directory" => Some(Self::Directory),
            "file" => Some(Self::File),
            _ => None,
        }
    }
}

/// Scanned resource, identified by its content hash.
///
/// # Invariants
/// - `packages` are shared rows: unlinking never deletes a package.
/// - `cis_docker_benchmark_checks` are owned: a check dropped from the
///   collection is deleted with its link.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resource {
    pub id: String,
    pub name: String,
    pub hash: String,
    #[serde(rename = "type")]
    pub resource_type: ResourceType,
    #[serde(default)]
    pub sbom_analyzers: Vec<String>,
    #[serde(default)]
    pub vulnerability_scanners: Vec<String>,
    #[serde(default)]
    pub packages: Vec<Package>,
    #[serde(default)]
    pub cis_docker_benchmark_checks: Vec<CisDockerBenchmarkCheck>,
}

impl Resource {
    /// Creates a resource whose id is derived from `hash`.
    pub fn new(
        name: impl Into<String>,
        hash: impl Into<String>,
        resource_type: ResourceType,
    ) -> Self {
        let hash = hash.into();
        Self {
            id: Self::derive_id(&hash),
            name: name.into(),
            hash,
            resource_type,
            sbom_analyzers: Vec::new(),
            vulnerability_scanners: Vec::new(),
            packages: Vec::new(),
            cis_docker_benchmark_checks: Vec::new(),
        }
    }

    pub fn derive_id(hash: &str) -> String {
        derive_stable_id(hash)
    }

    pub fn with_packages(mut self, packages: Vec<Package>) -> Self {
        self.packages = packages;
        self
    }

    pub fn with_checks(mut self, checks: Vec<CisDockerBenchmarkCheck>) -> Self {
        self.cis_docker_benchmark_checks = checks;
        self
    }
}
