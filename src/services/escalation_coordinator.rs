//! Escalation Coordinator
//!
//! Drives one project through bounded fix -> audit loops and, when those are
//! exhausted, bounded negotiation rounds with a secondary agent:
//!
//! ```text
//! NotStarted -> Loop(1..=3) -> Resolved
//!                           -> Negotiating(1..=5) -> Resolved
//!                                                 -> EscalatedToHuman
//! ```
//!
//! An authenticity violation (honeypot breach or collapsed confidence)
//! escalates immediately, skipping any remaining loops and rounds.
//!
//! Fixes only claim to resolve issues. Before every audit the isolated copy
//! is rescanned, and a health finding counts as resolved only once the scan
//! stops reporting it.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, instrument, warn};

use crate::domain::errors::{VerifyError, VerifyResult};
use crate::domain::models::{
    merge_issues, AuditReport, ChangeSet, EscalationConfig, EscalationRound, EscalationState,
    Fix, FixDirective, FixProposal, Issue, IssueCategory, Project, RemediationConfig, Verdict,
    VerificationRun, MAX_FIX_LOOPS, MAX_NEGOTIATION_ROUNDS,
};
use crate::domain::ports::{EscalationAgent, FixContext, NegotiationContext};
use crate::services::authenticity_auditor::AuthenticityAuditor;
use crate::services::auto_fix_engine::AutoFixEngine;
use crate::services::health_scanner::HealthScanner;
use crate::services::safety_manager::SafetyManager;

/// Per-batch switches that shape a run.
#[derive(Debug, Clone)]
pub struct RunOptions {
    /// Audit only; no automatic fixes and no negotiation
    pub tests_only: bool,
    /// One test run per audit instead of the configured repeat count
    pub quick: bool,
    /// Let the engine act on `info` issues too
    pub force_fix: bool,
    /// Fix -> audit loops, at most [`MAX_FIX_LOOPS`]
    pub max_loops: u32,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            tests_only: false,
            quick: false,
            force_fix: false,
            max_loops: MAX_FIX_LOOPS,
        }
    }
}

/// Temperature of negotiation round `round` (1-based), rising linearly
/// from `start` to `end` over `max_rounds`.
pub fn round_temperature(start: f64, end: f64, round: u32, max_rounds: u32) -> f64 {
    if max_rounds <= 1 {
        return start;
    }
    let step = f64::from(round.saturating_sub(1).min(max_rounds - 1));
    start + (end - start) * step / f64::from(max_rounds - 1)
}

fn files_of(issue: &Issue) -> String {
    if issue.files.is_empty() {
        return "the project".to_string();
    }
    issue
        .files
        .iter()
        .map(|f| f.display().to_string())
        .collect::<Vec<_>>()
        .join(", ")
}

fn next_action(issue: &Issue) -> String {
    let subject = issue.subject.as_deref().unwrap_or("the affected code");
    match issue.category {
        IssueCategory::MissingDependency => {
            format!("Install `{subject}` and declare it in the project's dependency manifest")
        }
        IssueCategory::SyntaxError => format!("Fix the syntax of {}", files_of(issue)),
        IssueCategory::MissingTestDirectory => format!("Create the test directory {}", files_of(issue)),
        IssueCategory::ImportPath => format!("Normalize import paths in {}", files_of(issue)),
        IssueCategory::SecuritySmell => format!("Review the security smell: {}", issue.evidence),
        IssueCategory::MockUsage => format!(
            "Replace {subject} in {} with a real collaborator (local server, temporary database)",
            files_of(issue)
        ),
        IssueCategory::SuspiciousTiming => {
            format!("Confirm that {subject} performs the real I/O it claims")
        }
        IssueCategory::ExecutionError => format!("Make the suite run green: {}", issue.evidence),
        IssueCategory::FakeResult => format!(
            "Make {subject} record interaction evidence (latency_ms, status_code, rows_affected, bytes_written)"
        ),
        IssueCategory::HoneypotPassed => format!(
            "Audit the test harness: honeypot {subject} passed, so no result from it can be trusted"
        ),
    }
}

/// Build the directive for a failed or escalated run.
pub fn build_directive(run: &VerificationRun, verdict: Verdict, retained_branch: Option<String>) -> FixDirective {
    let unresolved = run.unresolved_issues();
    let mut next_actions: Vec<String> = Vec::new();
    for issue in &unresolved {
        let action = next_action(issue);
        if !next_actions.contains(&action) {
            next_actions.push(action);
        }
    }
    if let Some(branch) = &retained_branch {
        next_actions.push(format!("Inspect the attempted fixes on branch `{branch}` before retrying"));
    }
    if next_actions.is_empty() {
        next_actions.push("Re-run verification with an escalation agent configured".to_string());
    }

    FixDirective {
        project: run.project.clone(),
        verdict,
        unresolved,
        attempted: run.fixes.clone(),
        confidence_trend: run.confidence_trend.clone(),
        next_actions,
        retained_branch,
    }
}

pub struct EscalationCoordinator {
    engine: Arc<AutoFixEngine>,
    auditor: Arc<AuthenticityAuditor>,
    safety: Arc<SafetyManager>,
    scanner: HealthScanner,
    agent: Option<Arc<dyn EscalationAgent>>,
    escalation: EscalationConfig,
    remediation: RemediationConfig,
    max_rounds: u32,
}

impl EscalationCoordinator {
    pub fn new(
        engine: Arc<AutoFixEngine>,
        auditor: Arc<AuthenticityAuditor>,
        safety: Arc<SafetyManager>,
        escalation: EscalationConfig,
        remediation: RemediationConfig,
    ) -> Self {
        Self {
            engine,
            auditor,
            safety,
            scanner: HealthScanner::new(),
            agent: None,
            escalation,
            remediation,
            max_rounds: MAX_NEGOTIATION_ROUNDS,
        }
    }

    pub fn with_agent(mut self, agent: Arc<dyn EscalationAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn with_max_rounds(mut self, rounds: u32) -> Self {
        self.max_rounds = rounds.clamp(1, MAX_NEGOTIATION_ROUNDS);
        self
    }

    fn ensure_active(cancel: &CancellationToken, run: &VerificationRun) -> VerifyResult<()> {
        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled(run.project.clone()));
        }
        Ok(())
    }

    fn record_fixes(change_set: &mut ChangeSet, run: &mut VerificationRun, fixes: Vec<Fix>) -> bool {
        let any_success = fixes.iter().any(|f| f.success);
        for fix in fixes {
            change_set.record_fix(fix.clone());
            run.fixes.push(fix);
        }
        any_success
    }

    /// Re-check health findings against the current state of the change-set.
    async fn rescan(&self, project: &Project, change_set: &ChangeSet, run: &mut VerificationRun) {
        match self.scanner.scan(project, &change_set.workdir).await {
            Ok((_, detected)) => run.absorb_scan(detected),
            Err(e) => {
                warn!(project = %project.id, error = %e, "Rescan failed; health findings stay open");
                for issue in run.issues.iter_mut().filter(|i| !i.category.is_audit_finding()) {
                    issue.resolved = false;
                }
            }
        }
    }

    /// Rescan, then audit the change-set.
    async fn verify_change_set(
        &self,
        project: &Project,
        change_set: &ChangeSet,
        run: &mut VerificationRun,
        repeat_runs: u32,
    ) -> AuditReport {
        self.rescan(project, change_set, run).await;
        let report = self
            .auditor
            .audit(project, &change_set.workdir, repeat_runs)
            .await;
        run.absorb_audit(&report);
        report
    }

    fn audit_passed(report: &AuditReport, run: &VerificationRun) -> bool {
        report.passed && !run.issues.iter().any(Issue::is_blocking)
    }

    fn conclude(&self, run: &mut VerificationRun, change_set: &ChangeSet, verdict: Verdict) -> Verdict {
        run.conclude(verdict);
        if verdict != Verdict::Pass {
            let retained = change_set.retains_on(verdict).then(|| change_set.branch.clone());
            run.directive = Some(build_directive(run, verdict, retained));
        }
        info!(
            project = %run.project,
            verdict = verdict.as_str(),
            loops = run.loops,
            rounds = run.rounds_used(),
            "Verification concluded"
        );
        verdict
    }

    /// Run loops and negotiation for `project` inside `change_set`.
    ///
    /// Returns the verdict; the caller finalizes the change-set.
    #[instrument(skip_all, fields(project = %project.id))]
    pub async fn drive(
        &self,
        project: &Project,
        change_set: &mut ChangeSet,
        run: &mut VerificationRun,
        options: &RunOptions,
        cancel: &CancellationToken,
    ) -> VerifyResult<Verdict> {
        let repeat_runs = if options.quick {
            1
        } else {
            self.auditor.config().repeat_runs
        };
        let max_loops = options.max_loops.clamp(1, MAX_FIX_LOOPS);

        if !options.tests_only && run.loops == 0 {
            // Missing modules only show when the suite runs; find them before loop 1
            let missing = self
                .auditor
                .detect_missing_dependencies(project, &change_set.workdir)
                .await;
            merge_issues(&mut run.issues, missing);
        }

        while run.loops < max_loops {
            let Some(iteration) = run.begin_loop() else {
                break;
            };
            Self::ensure_active(cancel, run)?;

            if !options.tests_only {
                let ctx = FixContext::new(project, &change_set.workdir, &self.remediation);
                let fixes = self
                    .engine
                    .remediate(&ctx, &mut run.issues, options.force_fix)
                    .await;
                if Self::record_fixes(change_set, run, fixes) {
                    self.safety
                        .commit_fixes(
                            change_set,
                            &format!("ecoverify: fix loop {iteration} for {}", project.id),
                        )
                        .await?;
                }
            }

            Self::ensure_active(cancel, run)?;
            let report = self
                .verify_change_set(project, change_set, run, repeat_runs)
                .await;

            if let Some(violation) = report.violation(&project.id) {
                warn!(
                    project = %project.id,
                    error = %violation,
                    confidence = report.confidence,
                    "Escalating"
                );
                return Ok(self.conclude(run, change_set, Verdict::Escalated));
            }
            if Self::audit_passed(&report, run) {
                return Ok(self.conclude(run, change_set, Verdict::Pass));
            }
            if options.tests_only {
                // Nothing changes between audits without fixes
                break;
            }
        }

        let agent = match (&self.agent, options.tests_only) {
            (Some(agent), false) => Arc::clone(agent),
            _ => return Ok(self.conclude(run, change_set, Verdict::Fail)),
        };

        self.negotiate(project, change_set, run, agent, repeat_runs, cancel)
            .await
    }

    async fn negotiate(
        &self,
        project: &Project,
        change_set: &mut ChangeSet,
        run: &mut VerificationRun,
        agent: Arc<dyn EscalationAgent>,
        repeat_runs: u32,
        cancel: &CancellationToken,
    ) -> VerifyResult<Verdict> {
        let round_timeout = Duration::from_secs(self.escalation.round_timeout_secs);
        let mut attempted: HashSet<String> = HashSet::new();

        for round in 1..=self.max_rounds {
            Self::ensure_active(cancel, run)?;
            run.state = EscalationState::Negotiating(round);

            let temperature = round_temperature(
                self.escalation.temperature_start,
                self.escalation.temperature_end,
                round,
                self.max_rounds,
            );
            let ctx = NegotiationContext {
                project: project.id.clone(),
                round,
                unresolved: run.unresolved_issues(),
                attempted: run.fixes.clone(),
                tests: run.tests.clone(),
                confidence_trend: run.confidence_trend.clone(),
            };

            let proposals = match tokio::time::timeout(round_timeout, agent.propose_fixes(&ctx, temperature)).await {
                Ok(Ok(proposals)) => proposals,
                Ok(Err(e)) => {
                    warn!(project = %project.id, round, error = %e, "Agent failed to propose fixes");
                    Vec::new()
                }
                Err(_) => {
                    warn!(project = %project.id, round, "Negotiation round timed out");
                    Vec::new()
                }
            };

            let fresh: Vec<FixProposal> = proposals
                .into_iter()
                .map(|mut p| {
                    p.author.get_or_insert_with(|| agent.name().to_string());
                    p
                })
                .filter(|p| attempted.insert(p.fingerprint()))
                .collect();

            let mut record = EscalationRound {
                round,
                agent: agent.role(),
                temperature,
                new_proposals: fresh.len(),
                proposals: fresh.clone(),
                confidence_after: None,
            };

            if fresh.is_empty() {
                info!(project = %project.id, round, "No new proposals; halting negotiation");
                run.rounds.push(record);
                break;
            }

            let ctx = FixContext::new(project, &change_set.workdir, &self.remediation)
                .with_proposals(&fresh);
            let fixes = self.engine.remediate(&ctx, &mut run.issues, true).await;
            if Self::record_fixes(change_set, run, fixes) {
                self.safety
                    .commit_fixes(
                        change_set,
                        &format!("ecoverify: negotiation round {round} for {}", project.id),
                    )
                    .await?;
            }

            Self::ensure_active(cancel, run)?;
            let report = self
                .verify_change_set(project, change_set, run, repeat_runs)
                .await;
            record.confidence_after = Some(report.confidence);
            run.rounds.push(record);

            if let Some(violation) = report.violation(&project.id) {
                warn!(project = %project.id, round, error = %violation, "Escalating");
                return Ok(self.conclude(run, change_set, Verdict::Escalated));
            }
            if Self::audit_passed(&report, run) {
                return Ok(self.conclude(run, change_set, Verdict::Pass));
            }
        }

        change_set.escalation_exhausted = true;
        Ok(self.conclude(run, change_set, Verdict::Escalated))
    }
}
