//! Application root entity.

use super::derive_stable_id;
use super::resource::Resource;
use serde::{Deserialize, Serialize};

/// Kind of workload an application was discovered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApplicationType {
    Pod,
    Directory,
    Lambda,
}

impl ApplicationType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pod => "pod",
            Self::Directory => "directory",
            Self::Lambda => "lambda",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "pod" => Some(Self::Pod),
            "directory" => Some(Self::Directory),
            "lambda" => Some(Self::Lambda),
            _ => None,
        }
    }
}

/// Root of one scan tree.
///
/// `resources` is many-to-many: the same resource (image digest) can be
/// referenced by several applications.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Application {
    pub id: String,
    pub name: String,
    #[serde(rename = "type")]
    pub app_type: ApplicationType,
    #[serde(default)]
    pub labels: Vec<String>,
    #[serde(default)]
    pub environments: Vec<String>,
    #[serde(default)]
    pub resources: Vec<Resource>,
}

impl Application {
    /// Creates an application with an id derived from `name` and `app_type`.
    pub fn new(name: impl Into<String>, app_type: ApplicationType) -> Self {
        let name = name.into();
        Self {
            id: Self::derive_id(&name, app_type),
            name,
            app_type,
            labels: Vec::new(),
            environments: Vec::new(),
            resources: Vec::new(),
        }
    }

    pub fn derive_id(name: &str, app_type: ApplicationType) -> String {
        derive_stable_id(&format!("{name}.{}", app_type.as_str()))
    }

    pub fn with_resources(mut self, resources: Vec<Resource>) -> Self {
        self.resources = resources;
        self
    }
}
