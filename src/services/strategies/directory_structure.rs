//! Creates a missing test directory.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::PathBuf;
use tracing::info;

use crate::domain::models::{Fix, FixKind, Issue, IssueCategory};
use crate::domain::ports::{FixContext, RemediationStrategy};

/// Placeholder so version control tracks the otherwise empty directory.
const PLACEHOLDER: &str = ".gitkeep";

#[derive(Debug, Default)]
pub struct DirectoryStructureStrategy;

#[async_trait]
impl RemediationStrategy for DirectoryStructureStrategy {
    fn name(&self) -> &'static str {
        "directory-structure"
    }

    fn can_handle(&self, issue: &Issue, _ctx: &FixContext<'_>) -> bool {
        issue.category == IssueCategory::MissingTestDirectory
    }

    async fn apply(&self, ctx: &FixContext<'_>, issue: &Issue) -> Result<Fix> {
        let relative: PathBuf = issue
            .files
            .first()
            .cloned()
            .unwrap_or_else(|| ctx.config.test_directory.clone());

        let dir = match ctx.resolve(&relative) {
            Ok(dir) => dir,
            Err(e) => {
                return Ok(Fix::failed(
                    FixKind::CreateDirectory,
                    self.name(),
                    issue.category,
                    format!("refused: {e}"),
                ))
            }
        };

        if dir.is_dir() {
            return Ok(Fix::succeeded(
                FixKind::CreateDirectory,
                self.name(),
                issue.category,
                format!("{} already exists", relative.display()),
            )
            .with_target(relative));
        }

        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        tokio::fs::write(dir.join(PLACEHOLDER), "")
            .await
            .with_context(|| format!("Failed to write placeholder in {}", dir.display()))?;

        info!(project = %ctx.project.id, dir = %relative.display(), "Created test directory");
        Ok(Fix::succeeded(
            FixKind::CreateDirectory,
            self.name(),
            issue.category,
            format!("created {} with a placeholder", relative.display()),
        )
        .with_target(relative))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Project, RemediationConfig};

    #[tokio::test]
    async fn test_creates_default_test_directory() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("p", dir.path());
        let config = RemediationConfig::default();
        let ctx = FixContext::new(&project, dir.path(), &config);
        let issue = Issue::warning(IssueCategory::MissingTestDirectory, "no tests/ directory");

        let fix = DirectoryStructureStrategy.apply(&ctx, &issue).await.unwrap();
        assert!(fix.success);
        assert!(dir.path().join("tests").join(PLACEHOLDER).exists());

        let again = DirectoryStructureStrategy.apply(&ctx, &issue).await.unwrap();
        assert!(again.success);
        assert!(again.description.contains("already exists"));
    }
}
