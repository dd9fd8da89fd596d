//! Command-line interface for the `ecoverify` binary.

pub mod commands;
pub mod output;

use std::path::PathBuf;

use clap::{ArgGroup, Parser};

use crate::domain::errors::VerifyError;
use crate::infrastructure::config::ConfigError;
use crate::services::ProjectSelector;

/// Exit code when every selected project passed.
pub const EXIT_SUCCESS: i32 = 0;
/// Exit code when any project failed, escalated or was blocked.
pub const EXIT_NOT_PASSED: i32 = 1;
/// Exit code for configuration errors.
pub const EXIT_CONFIG_ERROR: i32 = 2;

/// Verify, remediate and safely commit a set of inter-dependent projects.
#[derive(Parser, Debug)]
#[command(name = "ecoverify", version, about, long_about = None)]
#[command(group(
    ArgGroup::new("selection")
        .required(true)
        .args(["project", "all", "category"])
))]
pub struct Cli {
    /// Verify a single project
    #[arg(long, value_name = "NAME")]
    pub project: Option<String>,

    /// Verify every project in the registry
    #[arg(long)]
    pub all: bool,

    /// Verify every project with this category tag
    #[arg(long, value_name = "NAME")]
    pub category: Option<String>,

    /// Audit only: no automatic fixes and no negotiation
    #[arg(long)]
    pub tests_only: bool,

    /// Run each suite once per audit instead of repeating it
    #[arg(long)]
    pub quick: bool,

    /// Also fix issues of `info` severity
    #[arg(long)]
    pub force_fix: bool,

    /// Fix -> audit loops per project
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..=3))]
    pub max_iterations: Option<u32>,

    /// Projects verified concurrently within a wave
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u32).range(1..=64))]
    pub parallel: Option<u32>,

    /// Print the batch summary as JSON on stdout
    #[arg(long, conflicts_with = "report_dir")]
    pub json: bool,

    /// Write summary.json, per-project results and directives to this directory
    #[arg(long, value_name = "PATH")]
    pub report_dir: Option<PathBuf>,

    /// Project registry file
    #[arg(long, value_name = "PATH")]
    pub registry: Option<PathBuf>,

    /// Configuration file (replaces .ecoverify/config.yaml and local.yaml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Remove retained fix branches and baseline tags for the selection
    #[arg(long)]
    pub prune: bool,
}

impl Cli {
    pub fn selector(&self) -> ProjectSelector {
        if let Some(name) = &self.project {
            ProjectSelector::Project(name.as_str().into())
        } else if let Some(category) = &self.category {
            ProjectSelector::Category(category.clone())
        } else {
            ProjectSelector::All
        }
    }
}

/// Exit code for an error that aborted the command.
pub fn exit_code_for(err: &anyhow::Error) -> i32 {
    let is_config = err.chain().any(|cause| {
        cause
            .downcast_ref::<VerifyError>()
            .is_some_and(VerifyError::is_fatal_for_batch)
            || cause.downcast_ref::<ConfigError>().is_some()
            || cause.downcast_ref::<figment::Error>().is_some()
    });
    if is_config {
        EXIT_CONFIG_ERROR
    } else {
        EXIT_NOT_PASSED
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_structure() {
        use clap::CommandFactory;
        Cli::command().debug_assert();
    }

    #[test]
    fn test_configuration_errors_map_to_exit_two() {
        let err = anyhow::Error::new(VerifyError::CyclicDependency(vec!["a".into(), "b".into(), "a".into()]))
            .context("Failed to schedule projects");
        assert_eq!(exit_code_for(&err), EXIT_CONFIG_ERROR);

        let err = anyhow::Error::new(VerifyError::Cancelled("a".into()));
        assert_eq!(exit_code_for(&err), EXIT_NOT_PASSED);

        let err = anyhow::Error::new(ConfigError::InvalidWorkers(0));
        assert_eq!(exit_code_for(&err), EXIT_CONFIG_ERROR);
    }
}
