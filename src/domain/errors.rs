//! Domain errors for the verification orchestrator.

use std::time::Duration;

use thiserror::Error;

use super::models::ProjectId;

/// Format a cycle path as a human-readable string: `A -> B -> C -> A`.
fn format_cycle_path(path: &[ProjectId]) -> String {
    path.iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(" -> ")
}

/// Errors raised while verifying and remediating projects.
///
/// Only [`VerifyError::Configuration`] and [`VerifyError::CyclicDependency`]
/// abort a whole batch. Every other variant is local to a single project and
/// is folded into that project's outcome.
#[derive(Debug, Error)]
pub enum VerifyError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Cyclic dependency detected: {}", format_cycle_path(.0))]
    CyclicDependency(Vec<ProjectId>),

    #[error("Repository error for project {project}: {reason}")]
    Repository { project: ProjectId, reason: String },

    #[error("Execution error for project {project}: {reason}")]
    Execution { project: ProjectId, reason: String },

    #[error("Authenticity violation for project {project}: {reason}")]
    AuthenticityViolation { project: ProjectId, reason: String },

    #[error("Project {project} exceeded its time budget of {}s", .budget.as_secs())]
    Timeout { project: ProjectId, budget: Duration },

    #[error("Verification of project {0} was cancelled")]
    Cancelled(ProjectId),

    #[error("Invalid change-set transition from {from} to {to}")]
    InvalidTransition { from: String, to: String },
}

impl VerifyError {
    /// Whether this error must abort the whole batch.
    pub const fn is_fatal_for_batch(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::CyclicDependency(_))
    }

    /// The test runner could not launch or finish a suite.
    pub fn execution(project: &ProjectId, reason: impl std::fmt::Display) -> Self {
        Self::Execution {
            project: project.clone(),
            reason: reason.to_string(),
        }
    }

    /// Build a repository error from anything displayable.
    pub fn repository(project: &ProjectId, reason: impl std::fmt::Display) -> Self {
        Self::Repository {
            project: project.clone(),
            reason: reason.to_string(),
        }
    }
}

pub type VerifyResult<T> = Result<T, VerifyError>;

impl From<serde_yaml::Error> for VerifyError {
    fn from(err: serde_yaml::Error) -> Self {
        Self::Configuration(err.to_string())
    }
}
