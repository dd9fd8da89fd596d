//! Change-set domain model
//!
//! A change-set is an isolated, reversible unit of remediation work against
//! one project's version-controlled state.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use uuid::Uuid;

use super::{Fix, ProjectId, Verdict};

/// Terminal disposition of a change-set.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Disposition {
    #[default]
    Pending,
    Merged,
    RolledBack,
}

impl Disposition {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Merged => "merged",
            Self::RolledBack => "rolled_back",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// Recorded baseline for rollback.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BaselineMarker {
    /// Tag name pointing at the baseline commit
    pub tag: String,
    /// Baseline commit (after any checkpoint)
    pub commit: String,
    /// Branch the project was on when the change-set opened
    pub base_branch: String,
    /// Commit before the checkpoint, set only when the tree was dirty
    pub pre_checkpoint: Option<String>,
}

/// An isolated unit of work against one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeSet {
    pub id: Uuid,
    pub project: ProjectId,
    /// Isolated branch name
    pub branch: String,
    /// Project directory inside the isolated worktree
    pub workdir: PathBuf,
    /// Top level of the isolated worktree
    pub worktree: PathBuf,
    /// Top level of the project's repository
    pub repo_root: PathBuf,
    pub baseline: BaselineMarker,
    pub fixes: Vec<Fix>,
    pub disposition: Disposition,
    /// Set when negotiation ran out without a pass; only then is an
    /// escalated change-set kept for inspection
    #[serde(default)]
    pub escalation_exhausted: bool,
    /// Branch kept after rollback so a human can inspect the attempted fixes
    pub retained_for_inspection: bool,
    pub opened_at: DateTime<Utc>,
    pub finalized_at: Option<DateTime<Utc>>,
}

impl ChangeSet {
    pub fn new(
        project: ProjectId,
        branch: impl Into<String>,
        workdir: impl Into<PathBuf>,
        baseline: BaselineMarker,
    ) -> Self {
        let workdir = workdir.into();
        Self {
            id: Uuid::new_v4(),
            project,
            branch: branch.into(),
            worktree: workdir.clone(),
            repo_root: PathBuf::new(),
            workdir,
            baseline,
            fixes: Vec::new(),
            disposition: Disposition::Pending,
            escalation_exhausted: false,
            retained_for_inspection: false,
            opened_at: Utc::now(),
            finalized_at: None,
        }
    }

    /// Short id used in branch and tag names
    pub fn short_id(&self) -> String {
        self.id.to_string()[..8].to_string()
    }

    pub fn record_fix(&mut self, fix: Fix) {
        self.fixes.push(fix);
    }

    pub fn is_pending(&self) -> bool {
        self.disposition == Disposition::Pending
    }

    /// Whether finalizing with `verdict` keeps the branch for inspection.
    pub fn retains_on(&self, verdict: Verdict) -> bool {
        verdict == Verdict::Escalated && self.escalation_exhausted
    }
}
