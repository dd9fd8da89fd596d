//! Verification Orchestrator
//!
//! Batch driver: waves run sequentially; projects within a wave run in
//! parallel, bounded by the worker count. Each project runs under a
//! wall-clock budget and the batch cancellation token.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use futures::future::join_all;
use tokio::sync::{mpsc, Semaphore};
use tokio::time::{timeout, Duration};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, instrument, warn};

use crate::domain::errors::{VerifyError, VerifyResult};
use crate::domain::models::{
    BatchSummary, ChangeSet, DependencyGraph, HealthStatus, Issue, IssueCategory, OutcomeStatus,
    Project, ProjectId, ProjectReport, Verdict, VerificationRun,
};
use crate::domain::ports::TestRunner;
use crate::services::dependency_scheduler::build_waves;
use crate::services::escalation_coordinator::{build_directive, EscalationCoordinator, RunOptions};
use crate::services::health_scanner::HealthScanner;
use crate::services::report_aggregator::ReportAggregator;
use crate::services::safety_manager::SafetyManager;

/// Configuration for the orchestrator.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum concurrent projects per wave.
    pub workers: usize,
    /// Wall-clock budget per project (seconds).
    pub project_timeout_secs: u64,
    /// Switches passed to every project pipeline.
    pub run: RunOptions,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            project_timeout_secs: 1800,
            run: RunOptions::default(),
        }
    }
}

/// Event emitted during a batch.
#[derive(Debug, Clone)]
pub enum BatchEvent {
    /// Batch started.
    Started { projects: usize, waves: usize },
    /// Wave started.
    WaveStarted { wave_number: usize, project_count: usize },
    /// Project pipeline started.
    ProjectStarted { project: ProjectId },
    /// Project finished with a final status.
    ProjectFinished { project: ProjectId, status: OutcomeStatus },
    /// Wave completed.
    WaveCompleted { wave_number: usize, passed: usize, not_passed: usize },
    /// Batch completed.
    Completed { exit_code: i32 },
}

/// Collaborators shared by every project pipeline.
struct Pipeline {
    safety: Arc<SafetyManager>,
    scanner: HealthScanner,
    coordinator: Arc<EscalationCoordinator>,
    options: RunOptions,
    budget: Duration,
}

pub struct Orchestrator {
    pipeline: Arc<Pipeline>,
    runner: Arc<dyn TestRunner>,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        safety: Arc<SafetyManager>,
        coordinator: Arc<EscalationCoordinator>,
        runner: Arc<dyn TestRunner>,
        config: OrchestratorConfig,
    ) -> Self {
        let pipeline = Pipeline {
            safety,
            scanner: HealthScanner::new(),
            coordinator,
            options: config.run.clone(),
            budget: Duration::from_secs(config.project_timeout_secs),
        };
        Self {
            pipeline: Arc::new(pipeline),
            runner,
            config,
        }
    }

    /// Verify `projects` as one batch.
    pub async fn run(&self, projects: Vec<Project>, cancel: CancellationToken) -> VerifyResult<BatchSummary> {
        let (tx, _rx) = mpsc::channel(100);
        self.run_with_events(projects, cancel, tx).await
    }

    /// Verify `projects` as one batch, streaming progress events.
    ///
    /// # Errors
    ///
    /// Only configuration errors (such as a dependency cycle) abort the
    /// batch; project-local failures are recorded in the summary.
    #[instrument(skip_all, fields(projects = projects.len()))]
    pub async fn run_with_events(
        &self,
        projects: Vec<Project>,
        cancel: CancellationToken,
        event_tx: mpsc::Sender<BatchEvent>,
    ) -> VerifyResult<BatchSummary> {
        let waves = build_waves(&projects)?;
        let graph = DependencyGraph::from_projects(&projects);
        let by_id: HashMap<ProjectId, Project> = projects
            .into_iter()
            .map(|p| (p.id.clone(), p))
            .collect();
        let aggregator = Arc::new(ReportAggregator::new());
        let start = Instant::now();

        info!(
            batch = %aggregator.batch_id(),
            projects = by_id.len(),
            waves = waves.len(),
            "Starting verification batch"
        );
        let _ = event_tx
            .send(BatchEvent::Started {
                projects: by_id.len(),
                waves: waves.len(),
            })
            .await;

        for wave in &waves {
            let wave_number = wave.index + 1;
            let _ = event_tx
                .send(BatchEvent::WaveStarted {
                    wave_number,
                    project_count: wave.len(),
                })
                .await;

            let mut runnable = Vec::new();
            for id in &wave.projects {
                let Some(project) = by_id.get(id) else {
                    continue;
                };
                let mut waiting_on = Vec::new();
                for dep in graph.dependencies_of(id) {
                    if aggregator.status_of(dep).await != Some(OutcomeStatus::Pass) {
                        waiting_on.push(dep.clone());
                    }
                }
                if waiting_on.is_empty() {
                    runnable.push(project.clone());
                } else {
                    warn!(project = %id, ?waiting_on, "Blocked by dependencies");
                    aggregator
                        .record(ProjectReport::blocked(id.clone(), &waiting_on))
                        .await;
                    let _ = event_tx
                        .send(BatchEvent::ProjectFinished {
                            project: id.clone(),
                            status: OutcomeStatus::Blocked,
                        })
                        .await;
                }
            }

            let reports = self.execute_wave(runnable, &cancel, &event_tx).await;
            let passed = reports
                .iter()
                .filter(|r| r.status == OutcomeStatus::Pass)
                .count();
            let not_passed = reports.len() - passed;
            for report in reports {
                aggregator.record(report).await;
            }

            let _ = event_tx
                .send(BatchEvent::WaveCompleted {
                    wave_number,
                    passed,
                    not_passed,
                })
                .await;
        }

        aggregator
            .check_interfaces(&graph, &by_id, Arc::clone(&self.runner))
            .await;

        let summary = aggregator
            .summary(waves.iter().map(|w| w.projects.clone()).collect())
            .await;
        info!(
            pass = summary.counts.pass,
            fail = summary.counts.fail,
            escalated = summary.counts.escalated,
            blocked = summary.counts.blocked,
            elapsed_secs = start.elapsed().as_secs(),
            "Verification batch complete"
        );
        let _ = event_tx
            .send(BatchEvent::Completed {
                exit_code: summary.exit_code(),
            })
            .await;
        Ok(summary)
    }

    /// Run one wave's projects in parallel with a concurrency limit.
    async fn execute_wave(
        &self,
        projects: Vec<Project>,
        cancel: &CancellationToken,
        event_tx: &mpsc::Sender<BatchEvent>,
    ) -> Vec<ProjectReport> {
        let semaphore = Arc::new(Semaphore::new(self.config.workers.max(1)));
        let mut handles = Vec::new();

        for project in projects {
            let Ok(permit) = Arc::clone(&semaphore).acquire_owned().await else {
                break;
            };
            let id = project.id.clone();
            let pipeline = Arc::clone(&self.pipeline);
            let cancel = cancel.clone();
            let event_tx = event_tx.clone();

            let handle = tokio::spawn(async move {
                let _permit = permit;
                let _ = event_tx
                    .send(BatchEvent::ProjectStarted {
                        project: project.id.clone(),
                    })
                    .await;
                let report = pipeline.verify(project, cancel).await;
                let _ = event_tx
                    .send(BatchEvent::ProjectFinished {
                        project: report.project.clone(),
                        status: report.status,
                    })
                    .await;
                report
            });
            handles.push((id, handle));
        }

        let (ids, handles): (Vec<ProjectId>, Vec<_>) = handles.into_iter().unzip();
        let results = join_all(handles).await;

        let mut reports = Vec::new();
        for (id, result) in ids.into_iter().zip(results) {
            match result {
                Ok(report) => reports.push(report),
                Err(e) => {
                    error!(project = %id, error = %e, "Verification task panicked");
                    let mut run = VerificationRun::new(id.clone());
                    run.conclude(Verdict::Fail);
                    reports.push(
                        ProjectReport::from_run(&run, HealthStatus::Unknown)
                            .with_note(format!("verification task aborted: {e}")),
                    );
                }
            }
        }
        reports
    }
}

// -----------------------------------------------------------------------------
// Per-project pipeline
// -----------------------------------------------------------------------------

fn pipeline_issue(subject: &str, evidence: impl Into<String>) -> Issue {
    Issue::critical(IssueCategory::ExecutionError, evidence).with_subject(subject)
}

impl Pipeline {
    #[instrument(skip_all, fields(project = %project.id))]
    async fn verify(&self, project: Project, cancel: CancellationToken) -> ProjectReport {
        let mut run = VerificationRun::new(project.id.clone());

        if cancel.is_cancelled() {
            run.issues
                .push(pipeline_issue("cancelled", "batch cancelled before the project started"));
            return self.close(run, HealthStatus::Unknown, None);
        }

        let mut change_set = match self.safety.open_change_set(&project).await {
            Ok(change_set) => change_set,
            Err(e) => {
                error!(project = %project.id, error = %e, "Could not open change-set");
                run.issues.push(pipeline_issue("repository", e.to_string()));
                return self.close(run, HealthStatus::Failed, None);
            }
        };
        run.change_sets.push(change_set.id);

        let mut health = HealthStatus::Unknown;
        let outcome = timeout(
            self.budget,
            self.remediate(&project, &mut change_set, &mut run, &mut health, &cancel),
        )
        .await;

        let verdict = match outcome {
            Ok(Ok(verdict)) => verdict,
            Ok(Err(e)) => {
                warn!(project = %project.id, error = %e, "Verification aborted");
                let subject = match e {
                    VerifyError::Cancelled(_) => "cancelled",
                    VerifyError::Repository { .. } => {
                        health = HealthStatus::Failed;
                        "repository"
                    }
                    _ => "pipeline",
                };
                run.issues.push(pipeline_issue(subject, e.to_string()));
                Verdict::Fail
            }
            Err(_) => {
                let e = VerifyError::Timeout {
                    project: project.id.clone(),
                    budget: self.budget,
                };
                warn!(project = %project.id, "Verification exceeded its time budget");
                run.issues.push(pipeline_issue("timeout", e.to_string()));
                Verdict::Fail
            }
        };

        let verdict = match self.safety.finalize(&mut change_set, verdict).await {
            Ok(()) => verdict,
            Err(e) => {
                error!(project = %project.id, error = %e, "Finalize failed");
                health = HealthStatus::Failed;
                run.issues.push(pipeline_issue("repository", e.to_string()));
                if change_set.is_pending() {
                    if let Err(e) = self.safety.finalize(&mut change_set, Verdict::Fail).await {
                        error!(project = %project.id, error = %e, "Rollback after failed finalize also failed");
                    }
                }
                Verdict::Fail
            }
        };

        if run.verdict != Some(verdict) {
            run.conclude(verdict);
            run.directive = None;
        }
        self.close(run, health, Some(&change_set))
    }

    async fn remediate(
        &self,
        project: &Project,
        change_set: &mut ChangeSet,
        run: &mut VerificationRun,
        health: &mut HealthStatus,
        cancel: &CancellationToken,
    ) -> VerifyResult<Verdict> {
        match self.scanner.scan(project, &change_set.workdir).await {
            Ok((status, issues)) => {
                *health = status;
                run.issues = issues;
            }
            Err(e) => warn!(project = %project.id, error = %e, "Health scan failed"),
        }
        if cancel.is_cancelled() {
            return Err(VerifyError::Cancelled(project.id.clone()));
        }
        self.coordinator
            .drive(project, change_set, run, &self.options, cancel)
            .await
    }

    /// Conclude a run that ended early and turn it into a report.
    fn close(&self, mut run: VerificationRun, health: HealthStatus, change_set: Option<&ChangeSet>) -> ProjectReport {
        let verdict = run.verdict.unwrap_or(Verdict::Fail);
        if run.verdict.is_none() {
            run.conclude(verdict);
        }
        if verdict != Verdict::Pass && run.directive.is_none() {
            let retained = change_set
                .filter(|c| c.retained_for_inspection)
                .map(|c| c.branch.clone());
            run.directive = Some(build_directive(&run, verdict, retained));
        }
        ProjectReport::from_run(&run, health)
    }
}
