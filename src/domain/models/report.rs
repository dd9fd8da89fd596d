//! Batch report models consumed by renderers and notifiers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{Fix, FixDirective, HealthStatus, Issue, ProjectId, Verdict, VerificationRun};

/// Final status of a project within a batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pass,
    Fail,
    Escalated,
    /// A dependency did not pass; the project never started
    Blocked,
}

impl OutcomeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Escalated => "escalated",
            Self::Blocked => "blocked",
        }
    }
}

impl From<Verdict> for OutcomeStatus {
    fn from(verdict: Verdict) -> Self {
        match verdict {
            Verdict::Pass => Self::Pass,
            Verdict::Fail => Self::Fail,
            Verdict::Escalated => Self::Escalated,
        }
    }
}

/// Confidence statistics over a project's final audit.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceStats {
    pub mean: f64,
    pub min: u8,
    pub tests: usize,
}

impl ConfidenceStats {
    pub fn from_run(run: &VerificationRun) -> Self {
        if run.tests.is_empty() {
            return Self::default();
        }
        let sum: u32 = run.tests.iter().map(|t| u32::from(t.confidence)).sum();
        Self {
            mean: f64::from(sum) / run.tests.len() as f64,
            min: run.tests.iter().map(|t| t.confidence).min().unwrap_or(0),
            tests: run.tests.len(),
        }
    }
}

/// One project's outcome record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectReport {
    pub project: ProjectId,
    pub status: OutcomeStatus,
    pub health: HealthStatus,
    pub loops: u32,
    pub rounds: u32,
    pub confidence: ConfidenceStats,
    pub issues: Vec<Issue>,
    /// Fix provenance, in application order
    pub fixes: Vec<Fix>,
    pub honeypot_breaches: Vec<String>,
    pub directive: Option<FixDirective>,
    /// Set for blocked projects and project-local errors
    pub note: Option<String>,
}

impl ProjectReport {
    pub fn from_run(run: &VerificationRun, health: HealthStatus) -> Self {
        let status = run.verdict.map_or(OutcomeStatus::Fail, OutcomeStatus::from);
        Self {
            project: run.project.clone(),
            status,
            health,
            loops: run.loops,
            rounds: run.rounds_used(),
            confidence: ConfidenceStats::from_run(run),
            issues: run.issues.clone(),
            fixes: run.fixes.clone(),
            honeypot_breaches: run
                .honeypots
                .iter()
                .filter(|h| h.passed)
                .map(|h| h.name.clone())
                .collect(),
            directive: run.directive.clone(),
            note: None,
        }
    }

    pub fn blocked(project: ProjectId, waiting_on: &[ProjectId]) -> Self {
        let names = waiting_on
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        Self {
            project,
            status: OutcomeStatus::Blocked,
            health: HealthStatus::Unknown,
            loops: 0,
            rounds: 0,
            confidence: ConfidenceStats::default(),
            issues: Vec::new(),
            fixes: Vec::new(),
            honeypot_breaches: Vec::new(),
            directive: None,
            note: Some(format!("blocked by dependencies that did not pass: {names}")),
        }
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Whether a provider's interface stayed callable from a consumer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InterfaceCheck {
    pub provider: ProjectId,
    pub consumer: ProjectId,
    /// `None` when no check is configured or the consumer never ran
    pub callable: Option<bool>,
    pub detail: String,
}

/// Pass/fail/escalated/blocked counts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutcomeCounts {
    pub pass: usize,
    pub fail: usize,
    pub escalated: usize,
    pub blocked: usize,
}

impl OutcomeCounts {
    pub fn total(&self) -> usize {
        self.pass + self.fail + self.escalated + self.blocked
    }

    pub fn all_passed(&self) -> bool {
        self.pass == self.total()
    }
}

/// Batch-level summary.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
    pub waves: Vec<Vec<ProjectId>>,
    pub counts: OutcomeCounts,
    pub projects: Vec<ProjectReport>,
    pub communication: Vec<InterfaceCheck>,
}

impl BatchSummary {
    pub fn report_for(&self, id: &ProjectId) -> Option<&ProjectReport> {
        self.projects.iter().find(|p| &p.project == id)
    }

    /// Process exit code: 0 when every project passed, 1 otherwise.
    pub fn exit_code(&self) -> i32 {
        i32::from(!self.counts.all_passed())
    }
}
