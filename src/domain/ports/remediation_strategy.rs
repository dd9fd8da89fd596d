//! Remediation strategy port.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Component, Path, PathBuf};

use crate::domain::models::{Fix, FixProposal, Issue, Project, RemediationConfig};

/// Everything a strategy may touch while fixing one project.
#[derive(Debug, Clone, Copy)]
pub struct FixContext<'a> {
    pub project: &'a Project,
    /// Isolated working directory of the project's open change-set
    pub workdir: &'a Path,
    pub config: &'a RemediationConfig,
    /// Negotiated proposals; empty outside negotiation rounds
    pub proposals: &'a [FixProposal],
}

impl<'a> FixContext<'a> {
    pub fn new(project: &'a Project, workdir: &'a Path, config: &'a RemediationConfig) -> Self {
        Self {
            project,
            workdir,
            config,
            proposals: &[],
        }
    }

    pub fn with_proposals(mut self, proposals: &'a [FixProposal]) -> Self {
        self.proposals = proposals;
        self
    }

    /// Resolve `relative` inside the working directory.
    ///
    /// Absolute paths and paths that climb out through `..` are rejected
    /// lexically. The deepest existing ancestor of the result is then
    /// canonicalized and must stay under the canonical working directory,
    /// so symlinks cannot lead a write outside the project.
    pub fn resolve(&self, relative: &Path) -> Result<PathBuf> {
        let relative = relative.strip_prefix(self.workdir).unwrap_or(relative);
        let mut depth: usize = 0;
        for component in relative.components() {
            match component {
                Component::Normal(_) => depth += 1,
                Component::CurDir => {}
                Component::ParentDir => {
                    depth = depth.checked_sub(1).ok_or_else(|| {
                        anyhow::anyhow!("path {} escapes the project root", relative.display())
                    })?;
                }
                Component::RootDir | Component::Prefix(_) => {
                    anyhow::bail!("path {} escapes the project root", relative.display())
                }
            }
        }

        let joined = self.workdir.join(relative);
        let root = self.workdir.canonicalize().with_context(|| {
            format!("Failed to resolve working directory {}", self.workdir.display())
        })?;
        let Some(existing) = joined
            .ancestors()
            .find(|a| std::fs::symlink_metadata(a).is_ok())
        else {
            anyhow::bail!("path {} has no existing ancestor", joined.display());
        };
        // Dangling symlinks fail to canonicalize and are rejected with it
        let physical = existing
            .canonicalize()
            .with_context(|| format!("Failed to resolve {}", existing.display()))?;
        if !physical.starts_with(&root) {
            anyhow::bail!(
                "path {} escapes the project root through {}",
                relative.display(),
                physical.display()
            );
        }
        Ok(joined)
    }
}

/// One way of fixing a category of [`Issue`].
#[async_trait]
pub trait RemediationStrategy: Send + Sync {
    /// Name recorded as the origin of produced fixes.
    fn name(&self) -> &'static str;

    fn can_handle(&self, issue: &Issue, ctx: &FixContext<'_>) -> bool;

    /// Whether this strategy applies negotiated proposals rather than built-in repairs.
    fn accepts_proposals(&self) -> bool {
        false
    }

    /// Attempt the fix. `Ok` carries a [`Fix`] whose `success` flag says whether
    /// the issue was addressed; `Err` is an unexpected failure.
    async fn apply(&self, ctx: &FixContext<'_>, issue: &Issue) -> Result<Fix>;
}
