//! Version-Control Safety Manager
//!
//! Every project is remediated inside an isolated change-set: a baseline tag,
//! a dedicated branch and a separate worktree. A change-set ends in exactly
//! one of two ways: its branch is merged into the base branch, or the project
//! is restored to the recorded baseline.
//!
//! # Naming
//!
//! - Baseline tag: `<tag_prefix>/<project>/<short_id>`
//! - Branch: `<branch_prefix>/<project>/<short_id>`
//! - Worktree: `<state_dir>/worktrees/<project>-<short_id>`

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex as StdMutex};

use tokio::sync::Mutex;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::domain::errors::{VerifyError, VerifyResult};
use crate::domain::models::{
    BaselineMarker, ChangeSet, Disposition, Project, ProjectId, VcsConfig, Verdict,
};
use crate::domain::ports::VersionControl;

/// Opens, commits and finalizes change-sets.
pub struct SafetyManager {
    vcs: Arc<dyn VersionControl>,
    config: VcsConfig,
    state_dir: PathBuf,
    /// Projects with an open change-set
    leases: StdMutex<HashSet<ProjectId>>,
    /// Serializes mutating operations per repository
    repo_locks: StdMutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl SafetyManager {
    pub fn new(vcs: Arc<dyn VersionControl>, config: VcsConfig, state_dir: impl Into<PathBuf>) -> Self {
        Self {
            vcs,
            config,
            state_dir: state_dir.into(),
            leases: StdMutex::new(HashSet::new()),
            repo_locks: StdMutex::new(HashMap::new()),
        }
    }

    fn repo_lock(&self, repo: &Path) -> Arc<Mutex<()>> {
        let mut locks = self
            .repo_locks
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        Arc::clone(locks.entry(repo.to_path_buf()).or_default())
    }

    fn acquire_lease(&self, project: &ProjectId) -> VerifyResult<()> {
        let mut leases = self
            .leases
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner);
        if !leases.insert(project.clone()) {
            return Err(VerifyError::repository(
                project,
                "a change-set is already open for this project",
            ));
        }
        Ok(())
    }

    fn release_lease(&self, project: &ProjectId) {
        self.leases
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(project);
    }

    /// Whether `project` currently holds an open change-set.
    pub fn is_leased(&self, project: &ProjectId) -> bool {
        self.leases
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .contains(project)
    }

    fn branch_name(&self, project: &ProjectId, short_id: &str) -> String {
        format!("{}/{}/{}", self.config.branch_prefix, project, short_id)
    }

    fn tag_name(&self, project: &ProjectId, short_id: &str) -> String {
        format!("{}/{}/{}", self.config.tag_prefix, project, short_id)
    }

    /// Keep the state directory out of `git status` when it lives inside a repository.
    async fn ignore_state_dir(state_root: &Path) -> anyhow::Result<()> {
        use anyhow::Context;

        let ignore = state_root.join(".gitignore");
        if tokio::fs::try_exists(&ignore).await.unwrap_or(false) {
            return Ok(());
        }
        tokio::fs::create_dir_all(state_root)
            .await
            .with_context(|| format!("Failed to create state directory {}", state_root.display()))?;
        tokio::fs::write(&ignore, "*\n")
            .await
            .with_context(|| format!("Failed to write {}", ignore.display()))
    }

    /// Open an isolated change-set for `project`.
    ///
    /// A dirty working tree is committed as a checkpoint first so that the
    /// baseline captures it; rollback undoes the checkpoint again.
    ///
    /// # Errors
    ///
    /// [`VerifyError::Repository`] when the project is not in a reachable
    /// repository, HEAD is detached, or a change-set is already open.
    #[instrument(skip(self, project), fields(project = %project.id))]
    pub async fn open_change_set(&self, project: &Project) -> VerifyResult<ChangeSet> {
        self.acquire_lease(&project.id)?;
        match self.open_inner(project).await {
            Ok(change_set) => Ok(change_set),
            Err(e) => {
                self.release_lease(&project.id);
                Err(e)
            }
        }
    }

    async fn open_inner(&self, project: &Project) -> VerifyResult<ChangeSet> {
        let id = &project.id;
        let repo_err = |e: anyhow::Error| VerifyError::repository(id, format!("{e:#}"));

        let repo = self.vcs.toplevel(&project.root).await.map_err(repo_err)?;
        let relative = project
            .root
            .canonicalize()
            .ok()
            .and_then(|root| {
                repo.canonicalize()
                    .ok()
                    .and_then(|r| root.strip_prefix(r).ok().map(Path::to_path_buf))
            })
            .unwrap_or_default();

        let state_root = if self.state_dir.is_relative() {
            repo.join(&self.state_dir)
        } else {
            self.state_dir.clone()
        };

        let lock = self.repo_lock(&repo);
        let _guard = lock.lock().await;

        Self::ignore_state_dir(&state_root)
            .await
            .map_err(|e| VerifyError::repository(id, format!("{e:#}")))?;

        let base_branch = self.vcs.current_branch(&repo).await.map_err(repo_err)?;
        let mut commit = self.vcs.head_commit(&repo).await.map_err(repo_err)?;

        let mut pre_checkpoint = None;
        if self.vcs.is_dirty(&repo).await.map_err(repo_err)? {
            let message = format!("ecoverify: checkpoint before verifying {id}");
            if let Some(checkpoint) = self
                .vcs
                .commit_all(&repo, &message)
                .await
                .map_err(repo_err)?
            {
                info!(project = %id, checkpoint = %checkpoint, "Committed dirty working tree as checkpoint");
                pre_checkpoint = Some(commit);
                commit = checkpoint;
            }
        }

        let change_id = Uuid::new_v4();
        let short_id = change_id.to_string()[..8].to_string();
        let tag = self.tag_name(id, &short_id);
        let branch = self.branch_name(id, &short_id);
        let worktree = state_root
            .join("worktrees")
            .join(format!("{id}-{short_id}"));

        let baseline = BaselineMarker {
            tag: tag.clone(),
            commit: commit.clone(),
            base_branch,
            pre_checkpoint,
        };

        let setup = async {
            self.vcs.create_tag(&repo, &tag, &commit).await?;
            self.vcs
                .add_worktree(&repo, &worktree, &branch, &commit)
                .await
        };
        if let Err(e) = setup.await {
            self.restore_checkpoint(&repo, &baseline).await;
            return Err(repo_err(e));
        }

        let mut change_set = ChangeSet::new(id.clone(), branch, worktree.join(relative), baseline);
        change_set.id = change_id;
        change_set.repo_root = repo;
        change_set.worktree = worktree;

        info!(
            project = %id,
            branch = %change_set.branch,
            tag = %change_set.baseline.tag,
            workdir = %change_set.workdir.display(),
            "Opened change-set"
        );
        Ok(change_set)
    }

    /// Commit pending worktree edits. Returns the new commit, if any.
    pub async fn commit_fixes(&self, change_set: &ChangeSet, message: &str) -> VerifyResult<Option<String>> {
        if !change_set.is_pending() {
            return Err(VerifyError::InvalidTransition {
                from: change_set.disposition.as_str().to_string(),
                to: "commit".to_string(),
            });
        }
        self.vcs
            .commit_all(&change_set.worktree, message)
            .await
            .map_err(|e| VerifyError::repository(&change_set.project, format!("{e:#}")))
    }

    /// Merge or roll back a change-set according to `verdict`.
    ///
    /// A repeated call with the same verdict is a no-op. A conflicting
    /// verdict after a terminal disposition is an error. The branch of an
    /// escalated change-set is kept only once negotiation was exhausted.
    #[instrument(skip(self, change_set), fields(project = %change_set.project, verdict = verdict.as_str()))]
    pub async fn finalize(&self, change_set: &mut ChangeSet, verdict: Verdict) -> VerifyResult<()> {
        let wanted = match verdict {
            Verdict::Pass => Disposition::Merged,
            Verdict::Fail | Verdict::Escalated => Disposition::RolledBack,
        };

        if change_set.disposition.is_terminal() {
            let same_retention = change_set.retained_for_inspection == change_set.retains_on(verdict);
            if change_set.disposition == wanted && same_retention {
                return Ok(());
            }
            return Err(VerifyError::InvalidTransition {
                from: change_set.disposition.as_str().to_string(),
                to: verdict.as_str().to_string(),
            });
        }

        let result = match verdict {
            Verdict::Pass => self.merge(change_set).await,
            Verdict::Fail | Verdict::Escalated => {
                let retain = change_set.retains_on(verdict);
                self.rollback(change_set, retain).await
            }
        };

        if result.is_ok() {
            change_set.disposition = wanted;
            change_set.finalized_at = Some(chrono::Utc::now());
            self.release_lease(&change_set.project);
        }
        result
    }

    async fn merge(&self, change_set: &ChangeSet) -> VerifyResult<()> {
        let project = &change_set.project;
        let repo_err = |e: anyhow::Error| VerifyError::repository(project, format!("{e:#}"));
        let repo = &change_set.repo_root;

        let message = format!("ecoverify: remediation of {project}");
        self.vcs
            .commit_all(&change_set.worktree, &message)
            .await
            .map_err(repo_err)?;

        let lock = self.repo_lock(repo);
        let _guard = lock.lock().await;

        let current = self.vcs.current_branch(repo).await.map_err(repo_err)?;
        if current != change_set.baseline.base_branch {
            return Err(VerifyError::repository(
                project,
                format!(
                    "base branch changed from {} to {current}; refusing to merge",
                    change_set.baseline.base_branch
                ),
            ));
        }

        self.vcs
            .merge_no_ff(
                repo,
                &change_set.branch,
                &format!("ecoverify: merge verified fixes for {project}"),
            )
            .await
            .map_err(repo_err)?;
        self.vcs
            .remove_worktree(repo, &change_set.worktree)
            .await
            .map_err(repo_err)?;
        self.vcs
            .delete_branch(repo, &change_set.branch)
            .await
            .map_err(repo_err)?;

        info!(project = %project, branch = %change_set.branch, "Merged change-set");
        Ok(())
    }

    async fn rollback(&self, change_set: &mut ChangeSet, retain: bool) -> VerifyResult<()> {
        let project = change_set.project.clone();
        let repo_err = |e: anyhow::Error| VerifyError::repository(&project, format!("{e:#}"));
        let repo = change_set.repo_root.clone();

        if retain {
            // Keep whatever the attempt left behind on the branch
            let message = format!("ecoverify: attempted remediation of {project}");
            if let Err(e) = self.vcs.commit_all(&change_set.worktree, &message).await {
                warn!(project = %project, error = %e, "Could not commit attempted fixes before retaining branch");
            }
        }

        let lock = self.repo_lock(&repo);
        let _guard = lock.lock().await;

        self.vcs
            .remove_worktree(&repo, &change_set.worktree)
            .await
            .map_err(repo_err)?;
        if !retain {
            self.vcs
                .delete_branch(&repo, &change_set.branch)
                .await
                .map_err(repo_err)?;
        }

        self.restore_baseline(&repo, &change_set.baseline)
            .await
            .map_err(repo_err)?;

        change_set.retained_for_inspection = retain;
        info!(
            project = %project,
            retained = retain,
            baseline = %change_set.baseline.commit,
            "Rolled back change-set"
        );
        Ok(())
    }

    /// Return the base branch to the recorded baseline, then undo the checkpoint.
    async fn restore_baseline(&self, repo: &Path, baseline: &BaselineMarker) -> anyhow::Result<()> {
        let head = self.vcs.head_commit(repo).await?;
        if head != baseline.commit {
            // Another change-set merged into the same repository since; leave its work alone
            warn!(
                repo = %repo.display(),
                head = %head,
                baseline = %baseline.commit,
                "HEAD moved past the baseline; skipping reset"
            );
            return Ok(());
        }
        self.vcs.reset_hard(repo, &baseline.commit).await?;
        if let Some(pre) = &baseline.pre_checkpoint {
            self.vcs.reset_mixed(repo, pre).await?;
        }
        Ok(())
    }

    /// Best-effort checkpoint undo after a failed open.
    async fn restore_checkpoint(&self, repo: &Path, baseline: &BaselineMarker) {
        if baseline.pre_checkpoint.is_some() {
            if let Err(e) = self.restore_baseline(repo, baseline).await {
                warn!(repo = %repo.display(), error = %e, "Failed to undo checkpoint");
            }
        }
    }

    /// Remove retained branches and baseline tags of `project`.
    ///
    /// Returns the names of the removed refs.
    #[instrument(skip(self, project), fields(project = %project.id))]
    pub async fn prune(&self, project: &Project) -> VerifyResult<Vec<String>> {
        let id = &project.id;
        let repo_err = |e: anyhow::Error| VerifyError::repository(id, format!("{e:#}"));
        let repo = self.vcs.toplevel(&project.root).await.map_err(repo_err)?;

        let lock = self.repo_lock(&repo);
        let _guard = lock.lock().await;

        let mut removed = Vec::new();
        let branch_prefix = format!("{}/{}/", self.config.branch_prefix, id);
        for branch in self
            .vcs
            .list_branches(&repo, &branch_prefix)
            .await
            .map_err(repo_err)?
        {
            self.vcs.delete_branch(&repo, &branch).await.map_err(repo_err)?;
            removed.push(branch);
        }

        let tag_prefix = format!("{}/{}/", self.config.tag_prefix, id);
        for tag in self.vcs.list_tags(&repo, &tag_prefix).await.map_err(repo_err)? {
            self.vcs.delete_tag(&repo, &tag).await.map_err(repo_err)?;
            removed.push(tag);
        }

        info!(project = %id, removed = removed.len(), "Pruned rollback markers");
        Ok(removed)
    }
}
