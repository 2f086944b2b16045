//! Vulnerability entity, keyed by its external advisory id.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VulnerabilitySeverity {
    Critical,
    High,
    Medium,
    Low,
    Negligible,
}

impl VulnerabilitySeverity {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::High => "high",
            Self::Medium => "medium",
            Self::Low => "low",
            Self::Negligible => "negligible",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "critical" => Some(Self::Critical),
            "high" => Some(Self::High),
            "medium" => Some(Self::Medium),
            "low" => Some(Self::Low),
            "negligible" => Some(Self::Negligible),
            _ => None,
        }
    }
}

/// Known vulnerability, shared by every package it affects.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vulnerability {
    /// External id, e.g. `CVE-2023-0286`.
    pub id: String,
    pub name: String,
    pub severity: VulnerabilitySeverity,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub fix_version: Option<String>,
    #[serde(default)]
    pub links: Vec<String>,
}

impl Vulnerability {
    /// Creates a vulnerability named after its external id.
    pub fn new(id: impl Into<String>, severity: VulnerabilitySeverity) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            severity,
            description: String::new(),
            fix_version: None,
            links: Vec::new(),
        }
    }
}
