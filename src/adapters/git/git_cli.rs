//! Git command-line adapter
//!
//! Implements [`VersionControl`] by shelling out to `git` through
//! `tokio::process`.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, error, instrument};

use crate::domain::ports::VersionControl;

/// Identity used for commits made by the tool.
const COMMITTER_NAME: &str = "ecoverify";
const COMMITTER_EMAIL: &str = "ecoverify@localhost";

/// [`VersionControl`] backed by the `git` binary.
#[derive(Debug, Clone)]
pub struct GitCli {
    program: String,
}

impl Default for GitCli {
    fn default() -> Self {
        Self {
            program: "git".to_string(),
        }
    }
}

impl GitCli {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether a usable `git` binary is on the PATH.
    pub async fn is_available() -> bool {
        Command::new("git")
            .arg("--version")
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false)
    }

    fn command(&self, dir: &Path) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.current_dir(dir)
            .env("GIT_AUTHOR_NAME", COMMITTER_NAME)
            .env("GIT_AUTHOR_EMAIL", COMMITTER_EMAIL)
            .env("GIT_COMMITTER_NAME", COMMITTER_NAME)
            .env("GIT_COMMITTER_EMAIL", COMMITTER_EMAIL)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        cmd
    }

    /// Run git and return trimmed stdout, failing on a non-zero exit.
    async fn run(&self, dir: &Path, args: &[&str]) -> Result<String> {
        let output = self
            .command(dir)
            .args(args)
            .output()
            .await
            .with_context(|| format!("Failed to launch git {}", args.join(" ")))?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            error!(
                dir = %dir.display(),
                args = ?args,
                stderr = %stderr.trim(),
                "Git command failed"
            );
            anyhow::bail!("git {} failed: {}", args.join(" "), stderr.trim());
        }

        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    async fn list_refs(&self, repo: &Path, namespace: &str, prefix: &str) -> Result<Vec<String>> {
        let pattern = format!("refs/{namespace}/{prefix}");
        let out = self
            .run(
                repo,
                &["for-each-ref", "--format=%(refname:short)", &pattern],
            )
            .await?;
        Ok(out
            .lines()
            .map(str::trim)
            .filter(|l| !l.is_empty())
            .map(ToString::to_string)
            .collect())
    }
}

#[async_trait]
impl VersionControl for GitCli {
    async fn toplevel(&self, dir: &Path) -> Result<PathBuf> {
        let out = self
            .run(dir, &["rev-parse", "--show-toplevel"])
            .await
            .with_context(|| format!("{} is not inside a git repository", dir.display()))?;
        Ok(PathBuf::from(out))
    }

    async fn current_branch(&self, repo: &Path) -> Result<String> {
        let branch = self
            .run(repo, &["symbolic-ref", "--quiet", "--short", "HEAD"])
            .await
            .context("HEAD is detached; a named branch is required")?;
        Ok(branch)
    }

    async fn head_commit(&self, repo: &Path) -> Result<String> {
        self.run(repo, &["rev-parse", "--verify", "HEAD"])
            .await
            .context("Repository has no commits")
    }

    async fn is_dirty(&self, dir: &Path) -> Result<bool> {
        let out = self.run(dir, &["status", "--porcelain"]).await?;
        Ok(!out.is_empty())
    }

    #[instrument(skip(self), fields(dir = %dir.display()))]
    async fn commit_all(&self, dir: &Path, message: &str) -> Result<Option<String>> {
        self.run(dir, &["add", "-A"]).await?;
        if self.run(dir, &["diff", "--cached", "--quiet"]).await.is_ok() {
            debug!("Nothing to commit");
            return Ok(None);
        }
        self.run(dir, &["commit", "--no-verify", "-q", "-m", message])
            .await?;
        let commit = self.head_commit(dir).await?;
        debug!(commit = %commit, "Committed changes");
        Ok(Some(commit))
    }

    async fn create_tag(&self, repo: &Path, tag: &str, commit: &str) -> Result<()> {
        self.run(repo, &["tag", tag, commit]).await.map(|_| ())
    }

    async fn delete_tag(&self, repo: &Path, tag: &str) -> Result<()> {
        self.run(repo, &["tag", "-d", tag]).await.map(|_| ())
    }

    #[instrument(skip(self), fields(repo = %repo.display(), path = %path.display()))]
    async fn add_worktree(&self, repo: &Path, path: &Path, branch: &str, start: &str) -> Result<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .context("Failed to create worktree parent directory")?;
        }
        let path_str = path.to_string_lossy();
        self.run(repo, &["worktree", "add", "-b", branch, &path_str, start])
            .await
            .context("Git worktree creation failed")?;
        Ok(())
    }

    async fn remove_worktree(&self, repo: &Path, path: &Path) -> Result<()> {
        let path_str = path.to_string_lossy();
        if path.exists() {
            self.run(repo, &["worktree", "remove", "--force", &path_str])
                .await?;
        }
        // Clear stale administrative entries left by a directory removed out of band
        self.run(repo, &["worktree", "prune"]).await.map(|_| ())
    }

    async fn merge_no_ff(&self, repo: &Path, branch: &str, message: &str) -> Result<()> {
        if let Err(e) = self
            .run(repo, &["merge", "--no-ff", "--no-edit", "-m", message, branch])
            .await
        {
            let _ = self.run(repo, &["merge", "--abort"]).await;
            return Err(e);
        }
        Ok(())
    }

    async fn delete_branch(&self, repo: &Path, branch: &str) -> Result<()> {
        self.run(repo, &["branch", "-D", branch]).await.map(|_| ())
    }

    async fn reset_hard(&self, repo: &Path, commit: &str) -> Result<()> {
        self.run(repo, &["reset", "--hard", "-q", commit])
            .await
            .map(|_| ())
    }

    async fn reset_mixed(&self, repo: &Path, commit: &str) -> Result<()> {
        self.run(repo, &["reset", "--mixed", "-q", commit])
            .await
            .map(|_| ())
    }

    async fn list_branches(&self, repo: &Path, prefix: &str) -> Result<Vec<String>> {
        self.list_refs(repo, "heads", prefix).await
    }

    async fn list_tags(&self, repo: &Path, prefix: &str) -> Result<Vec<String>> {
        self.list_refs(repo, "tags", prefix).await
    }
}
