//! Test runner port.

use anyhow::Result;
use async_trait::async_trait;
use std::path::Path;

use crate::domain::models::{Honeypot, HoneypotResult, Project, SuiteExecution};

/// Executes a project's tests and its honeypot battery.
///
/// An `Err` from [`run_suite`](TestRunner::run_suite) means the suite could not
/// be launched at all; failing tests are reported inside the [`SuiteExecution`].
#[async_trait]
pub trait TestRunner: Send + Sync {
    /// Run the project's test suite once in `workdir`.
    async fn run_suite(&self, project: &Project, workdir: &Path) -> Result<SuiteExecution>;

    /// Run the honeypot battery through the project's own test harness.
    /// A correct harness reports every honeypot as failed.
    ///
    /// An `Err` means the battery could not be run through the harness; the
    /// caller must not read that as a clean result.
    async fn run_honeypots(
        &self,
        project: &Project,
        workdir: &Path,
        battery: &[Honeypot],
    ) -> Result<Vec<HoneypotResult>>;

    /// Run the project's interface-check command. `Ok(None)` when none is configured.
    async fn check_interface(&self, project: &Project, workdir: &Path) -> Result<Option<bool>>;
}
