//! CIS Docker benchmark check result, owned by exactly one resource.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CisCheckLevel {
    Info,
    Warn,
    Fatal,
}

impl CisCheckLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Info => "info",
            Self::Warn => "warn",
            Self::Fatal => "fatal",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "info" => Some(Self::Info),
            "warn" => Some(Self::Warn),
            "fatal" => Some(Self::Fatal),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CisDockerBenchmarkCheck {
    pub id: String,
    /// Benchmark rule code, e.g. `CIS-DI-0001`.
    pub code: String,
    pub level: CisCheckLevel,
    #[serde(default)]
    pub descriptions: String,
}

impl CisDockerBenchmarkCheck {
    pub fn new(id: impl Into<String>, code: impl Into<String>, level: CisCheckLevel) -> Self {
        Self {
            id: id.into(),
            code: code.into(),
            level,
            descriptions: String::new(),
        }
    }
}
