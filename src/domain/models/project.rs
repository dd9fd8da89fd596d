//! Project domain model
//!
//! A project is one independently-versioned repository taking part in a
//! verification batch.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;
use std::path::PathBuf;

/// Identifier of a project within a registry.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProjectId(String);

impl ProjectId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ProjectId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ProjectId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ProjectId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Health status of a project, updated by the orchestrator only.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthStatus {
    #[default]
    Unknown,
    Healthy,
    Issues,
    Failed,
}

impl HealthStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unknown => "unknown",
            Self::Healthy => "healthy",
            Self::Issues => "issues",
            Self::Failed => "failed",
        }
    }
}

/// A project definition as loaded from the registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier
    pub id: ProjectId,
    /// Repository root on disk (absolute after registry load)
    pub root: PathBuf,
    /// Projects this one depends on
    #[serde(default)]
    pub depends_on: BTreeSet<ProjectId>,
    /// Free-form category tag used by `--category`
    #[serde(default)]
    pub category: Option<String>,
    /// Test command argv, run from the isolated working directory
    #[serde(default)]
    pub test_command: Vec<String>,
    /// Directories or files holding test sources, relative to the root
    #[serde(default = "default_test_paths")]
    pub test_paths: Vec<PathBuf>,
    /// Optional structured results file written by the test command
    #[serde(default)]
    pub results_file: Option<PathBuf>,
    /// Optional honeypot command; `{name}` is replaced by the honeypot name
    #[serde(default)]
    pub honeypot_command: Option<Vec<String>>,
    /// Optional command checking that dependency interfaces are callable
    #[serde(default)]
    pub interface_check: Option<Vec<String>>,
    /// Dependency manifest used by the dependency installer
    #[serde(default)]
    pub manifest: Option<PathBuf>,
    /// Optional install command run after the manifest changes
    #[serde(default)]
    pub install_command: Option<Vec<String>>,
    /// Current health, never read from the registry file
    #[serde(skip)]
    pub health: HealthStatus,
}

fn default_test_paths() -> Vec<PathBuf> {
    vec![PathBuf::from("tests")]
}

impl Project {
    /// Create a project with defaults for everything but id and root.
    pub fn new(id: impl Into<ProjectId>, root: impl Into<PathBuf>) -> Self {
        Self {
            id: id.into(),
            root: root.into(),
            depends_on: BTreeSet::new(),
            category: None,
            test_command: Vec::new(),
            test_paths: default_test_paths(),
            results_file: None,
            honeypot_command: None,
            interface_check: None,
            manifest: None,
            install_command: None,
            health: HealthStatus::Unknown,
        }
    }

    pub fn with_dependency(mut self, id: impl Into<ProjectId>) -> Self {
        self.depends_on.insert(id.into());
        self
    }

    pub fn with_category(mut self, category: impl Into<String>) -> Self {
        self.category = Some(category.into());
        self
    }

    pub fn with_test_command(mut self, argv: &[&str]) -> Self {
        self.test_command = argv.iter().map(|s| (*s).to_string()).collect();
        self
    }
}
