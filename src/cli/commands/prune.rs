//! Removal of retained fix branches and baseline tags.

use anyhow::Result;
use serde::Serialize;
use tracing::warn;

use crate::cli::output::{output, CommandOutput};
use crate::cli::{EXIT_NOT_PASSED, EXIT_SUCCESS};
use crate::domain::models::Project;
use crate::services::SafetyManager;

#[derive(Debug, Serialize)]
pub struct PruneOutput {
    pub projects: Vec<PrunedProject>,
}

#[derive(Debug, Serialize)]
pub struct PrunedProject {
    pub project: String,
    pub removed: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl CommandOutput for PruneOutput {
    fn to_human(&self) -> String {
        let mut lines = Vec::new();
        for entry in &self.projects {
            match &entry.error {
                Some(error) => lines.push(format!("{}: {error}", entry.project)),
                None if entry.removed.is_empty() => {
                    lines.push(format!("{}: nothing to prune", entry.project));
                }
                None => {
                    lines.push(format!("{}: removed {} ref(s)", entry.project, entry.removed.len()));
                    lines.extend(entry.removed.iter().map(|r| format!("  {r}")));
                }
            }
        }
        lines.join("\n")
    }

    fn to_json(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or_default()
    }
}

/// Prune every selected project. A repository error on one project does not
/// stop the others but makes the exit code non-zero.
pub async fn execute(safety: &SafetyManager, projects: &[Project], json: bool) -> Result<i32> {
    let mut result = PruneOutput { projects: Vec::new() };
    for project in projects {
        let entry = match safety.prune(project).await {
            Ok(removed) => PrunedProject {
                project: project.id.to_string(),
                removed,
                error: None,
            },
            Err(e) => {
                warn!(project = %project.id, error = %e, "Prune failed");
                PrunedProject {
                    project: project.id.to_string(),
                    removed: Vec::new(),
                    error: Some(e.to_string()),
                }
            }
        };
        result.projects.push(entry);
    }

    output(&result, json);
    let failed = result.projects.iter().any(|p| p.error.is_some());
    Ok(if failed { EXIT_NOT_PASSED } else { EXIT_SUCCESS })
}
