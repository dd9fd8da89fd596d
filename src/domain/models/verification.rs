//! Verification run and escalation models
//!
//! A [`VerificationRun`] carries one project's pass through the pipeline,
//! including the explicit loop and round counters that bound retries.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::{AuditReport, Fix, FixProposal, HoneypotResult, Issue, ProjectId, TestRunResult};

/// Hard upper bound on fix -> audit loops.
pub const MAX_FIX_LOOPS: u32 = 3;

/// Hard upper bound on negotiation rounds.
pub const MAX_NEGOTIATION_ROUNDS: u32 = 5;

/// Terminal classification of a verification run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Pass,
    Fail,
    Escalated,
}

impl Verdict {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pass => "pass",
            Self::Fail => "fail",
            Self::Escalated => "escalated",
        }
    }
}

/// Escalation state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "state", content = "step", rename_all = "snake_case")]
pub enum EscalationState {
    NotStarted,
    Loop(u32),
    Negotiating(u32),
    Resolved,
    Failed,
    EscalatedToHuman,
}

impl EscalationState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Resolved | Self::Failed | Self::EscalatedToHuman)
    }
}

/// Identity of the acting agent in an escalation round.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Primary,
    Secondary,
    Human,
}

impl AgentRole {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Primary => "primary",
            Self::Secondary => "secondary",
            Self::Human => "human",
        }
    }
}

/// One negotiation round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EscalationRound {
    /// 1-based round number
    pub round: u32,
    pub agent: AgentRole,
    pub temperature: f64,
    pub proposals: Vec<FixProposal>,
    /// Proposals that had not been attempted before this round
    pub new_proposals: usize,
    /// Run confidence after re-auditing, if the round got that far
    pub confidence_after: Option<u8>,
}

/// Explicit next-action artifact for a failed or escalated project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixDirective {
    pub project: ProjectId,
    pub verdict: Verdict,
    pub unresolved: Vec<Issue>,
    pub attempted: Vec<Fix>,
    /// Run confidence after each audit, in order
    pub confidence_trend: Vec<u8>,
    pub next_actions: Vec<String>,
    pub retained_branch: Option<String>,
}

impl FixDirective {
    /// Render as markdown for humans or downstream agents.
    pub fn to_markdown(&self) -> String {
        let mut out = format!(
            "# Fix directive: {}\n\nVerdict: **{}**\n\n",
            self.project,
            self.verdict.as_str()
        );

        out.push_str("## Unresolved issues\n\n");
        if self.unresolved.is_empty() {
            out.push_str("- none recorded\n");
        }
        for issue in &self.unresolved {
            out.push_str(&format!(
                "- [{}] {}: {}\n",
                issue.severity.as_str(),
                issue.category,
                issue.evidence
            ));
        }

        out.push_str("\n## Attempted fixes\n\n");
        if self.attempted.is_empty() {
            out.push_str("- none\n");
        }
        for fix in &self.attempted {
            out.push_str(&format!(
                "- {} ({}, by {}): {}\n",
                fix.kind.as_str(),
                if fix.success { "applied" } else { "failed" },
                fix.origin,
                fix.description
            ));
        }

        let trend = self
            .confidence_trend
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(" -> ");
        out.push_str(&format!("\n## Confidence trend\n\n{trend}\n"));

        if let Some(branch) = &self.retained_branch {
            out.push_str(&format!("\nAttempted changes are kept on branch `{branch}`.\n"));
        }

        out.push_str("\n## Next actions\n\n");
        for (i, action) in self.next_actions.iter().enumerate() {
            out.push_str(&format!("{}. {}\n", i + 1, action));
        }
        out
    }
}

/// One pass through the pipeline for one project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VerificationRun {
    pub id: Uuid,
    pub project: ProjectId,
    pub change_sets: Vec<Uuid>,
    pub tests: Vec<TestRunResult>,
    pub honeypots: Vec<HoneypotResult>,
    pub issues: Vec<Issue>,
    pub fixes: Vec<Fix>,
    pub rounds: Vec<EscalationRound>,
    pub state: EscalationState,
    pub verdict: Option<Verdict>,
    /// Completed fix -> audit loops
    pub loops: u32,
    pub confidence_trend: Vec<u8>,
    pub directive: Option<FixDirective>,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl VerificationRun {
    pub fn new(project: ProjectId) -> Self {
        Self {
            id: Uuid::new_v4(),
            project,
            change_sets: Vec::new(),
            tests: Vec::new(),
            honeypots: Vec::new(),
            issues: Vec::new(),
            fixes: Vec::new(),
            rounds: Vec::new(),
            state: EscalationState::NotStarted,
            verdict: None,
            loops: 0,
            confidence_trend: Vec::new(),
            directive: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Advance the loop counter. Refuses to exceed [`MAX_FIX_LOOPS`].
    pub fn begin_loop(&mut self) -> Option<u32> {
        if self.loops >= MAX_FIX_LOOPS {
            return None;
        }
        self.loops += 1;
        self.state = EscalationState::Loop(self.loops);
        Some(self.loops)
    }

    pub fn rounds_used(&self) -> u32 {
        u32::try_from(self.rounds.len()).unwrap_or(u32::MAX)
    }

    /// Fold an audit into the run.
    pub fn absorb_audit(&mut self, report: &AuditReport) {
        self.tests.clone_from(&report.tests);
        self.honeypots.clone_from(&report.honeypots);
        self.confidence_trend.push(report.confidence);
        for known in self.issues.iter_mut().filter(|i| i.category.is_audit_finding()) {
            if !report.issues.iter().any(|i| i.same_defect(known)) {
                known.resolved = true;
            }
        }
        super::merge_issues(&mut self.issues, report.issues.clone());
    }

    /// Fold a health rescan into the run.
    ///
    /// Scanner findings are resolved only when the rescan no longer reports
    /// them, whatever a fix claimed.
    pub fn absorb_scan(&mut self, detected: Vec<Issue>) {
        for known in self.issues.iter_mut().filter(|i| !i.category.is_audit_finding()) {
            known.resolved = !detected.iter().any(|i| i.same_defect(known));
        }
        super::merge_issues(&mut self.issues, detected);
    }

    pub fn unresolved_issues(&self) -> Vec<Issue> {
        self.issues.iter().filter(|i| !i.resolved).cloned().collect()
    }

    pub fn conclude(&mut self, verdict: Verdict) {
        self.state = match verdict {
            Verdict::Pass => EscalationState::Resolved,
            Verdict::Fail => EscalationState::Failed,
            Verdict::Escalated => EscalationState::EscalatedToHuman,
        };
        self.verdict = Some(verdict);
        self.finished_at = Some(Utc::now());
    }

    pub fn last_confidence(&self) -> Option<u8> {
        self.confidence_trend.last().copied()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::IssueCategory;

    #[test]
    fn test_loop_counter_is_bounded() {
        let mut run = VerificationRun::new("core".into());
        assert_eq!(run.begin_loop(), Some(1));
        assert_eq!(run.begin_loop(), Some(2));
        assert_eq!(run.begin_loop(), Some(3));
        assert_eq!(run.begin_loop(), None);
        assert_eq!(run.loops, MAX_FIX_LOOPS);
        assert_eq!(run.state, EscalationState::Loop(3));
    }

    #[test]
    fn test_conclude_sets_terminal_state() {
        let mut run = VerificationRun::new("core".into());
        run.conclude(Verdict::Escalated);
        assert_eq!(run.state, EscalationState::EscalatedToHuman);
        assert!(run.state.is_terminal());
        assert!(run.finished_at.is_some());
    }

    #[test]
    fn test_absorb_audit_resolves_vanished_findings() {
        let mut run = VerificationRun::new("core".into());
        run.issues.push(Issue::critical(IssueCategory::MockUsage, "MagicMock"));
        run.issues.push(Issue::warning(IssueCategory::SecuritySmell, "eval("));

        run.absorb_audit(&AuditReport {
            confidence: 95,
            ..Default::default()
        });

        assert!(run.issues[0].resolved);
        assert!(!run.issues[1].resolved);
        assert_eq!(run.last_confidence(), Some(95));
    }

    #[test]
    fn test_absorb_scan_trusts_only_the_rescan() {
        let mut run = VerificationRun::new("cfg".into());
        let mut claimed = Issue::critical(IssueCategory::SyntaxError, "settings.toml does not parse")
            .with_file("settings.toml");
        claimed.resolved = true;
        run.issues.push(claimed.clone());
        run.issues.push(
            Issue::warning(IssueCategory::MissingTestDirectory, "no tests").with_file("tests"),
        );
        run.issues.push(Issue::critical(IssueCategory::MockUsage, "MagicMock"));

        claimed.resolved = false;
        run.absorb_scan(vec![claimed]);

        assert!(run.issues[0].is_blocking());
        assert!(run.issues[1].resolved);
        // Audit findings are left to the next audit
        assert!(!run.issues[2].resolved);
        assert_eq!(run.issues.len(), 3);
    }

    #[test]
    fn test_directive_markdown_lists_sections() {
        let directive = FixDirective {
            project: "core".into(),
            verdict: Verdict::Escalated,
            unresolved: vec![Issue::critical(IssueCategory::MockUsage, "MagicMock in tests/test_api.py")],
            attempted: vec![],
            confidence_trend: vec![60, 62, 70],
            next_actions: vec!["Replace mocks with a real test server".into()],
            retained_branch: Some("ecoverify/fix/core/1234abcd".into()),
        };
        let md = directive.to_markdown();
        assert!(md.contains("Verdict: **escalated**"));
        assert!(md.contains("mock_usage"));
        assert!(md.contains("60 -> 62 -> 70"));
        assert!(md.contains("ecoverify/fix/core/1234abcd"));
        assert!(md.contains("1. Replace mocks"));
    }
}
