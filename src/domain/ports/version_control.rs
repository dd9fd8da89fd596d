//! Version control port.

use anyhow::Result;
use async_trait::async_trait;
use std::path::{Path, PathBuf};

/// Operations the safety manager needs from a version control system.
///
/// `repo` arguments are repository top-level directories; `dir` arguments
/// may be any working directory inside a repository or worktree.
#[async_trait]
pub trait VersionControl: Send + Sync {
    /// Top-level directory of the repository containing `dir`.
    async fn toplevel(&self, dir: &Path) -> Result<PathBuf>;

    /// Name of the checked-out branch. Fails on a detached HEAD.
    async fn current_branch(&self, repo: &Path) -> Result<String>;

    /// Commit id of HEAD.
    async fn head_commit(&self, repo: &Path) -> Result<String>;

    /// Whether the working tree has staged, unstaged or untracked changes.
    async fn is_dirty(&self, dir: &Path) -> Result<bool>;

    /// Stage everything and commit. Returns `None` when there was nothing to commit.
    async fn commit_all(&self, dir: &Path, message: &str) -> Result<Option<String>>;

    async fn create_tag(&self, repo: &Path, tag: &str, commit: &str) -> Result<()>;

    async fn delete_tag(&self, repo: &Path, tag: &str) -> Result<()>;

    /// Create `branch` at `start` and check it out in a new worktree at `path`.
    async fn add_worktree(&self, repo: &Path, path: &Path, branch: &str, start: &str)
        -> Result<()>;

    async fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<()>;

    /// Merge `branch` into the checked-out branch with a merge commit.
    async fn merge_no_ff(&self, repo: &Path, branch: &str, message: &str) -> Result<()>;

    async fn delete_branch(&self, repo: &Path, branch: &str) -> Result<()>;

    /// Move HEAD, index and working tree to `commit`.
    async fn reset_hard(&self, repo: &Path, commit: &str) -> Result<()>;

    /// Move HEAD and index to `commit`, keeping the working tree.
    async fn reset_mixed(&self, repo: &Path, commit: &str) -> Result<()>;

    async fn list_branches(&self, repo: &Path, prefix: &str) -> Result<Vec<String>>;

    async fn list_tags(&self, repo: &Path, prefix: &str) -> Result<Vec<String>>;
}
