//! The verification batch command.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::adapters::agents::HttpEscalationAgent;
use crate::adapters::git::GitCli;
use crate::adapters::runners::ShellTestRunner;
use crate::cli::output::{create_spinner, output, truncate};
use crate::cli::Cli;
use crate::domain::models::{BatchSummary, Config, OutcomeStatus};
use crate::domain::ports::TestRunner;
use crate::services::{
    AuthenticityAuditor, AutoFixEngine, BatchEvent, EscalationCoordinator, Orchestrator,
    OrchestratorConfig, ProjectRegistry, RunOptions, SafetyManager,
};

/// Fold command-line overrides into the loaded configuration.
pub fn apply_overrides(cli: &Cli, config: &mut Config) {
    if let Some(registry) = &cli.registry {
        config.registry.clone_from(registry);
    }
    if let Some(loops) = cli.max_iterations {
        config.max_loops = loops;
    }
    if let Some(parallel) = cli.parallel {
        config.workers = usize::try_from(parallel).unwrap_or(config.workers);
    }
}

/// Load the registry and apply the command-line selection.
pub fn load_selection(cli: &Cli, config: &Config) -> Result<(ProjectRegistry, Vec<crate::domain::models::Project>)> {
    let registry = ProjectRegistry::load(&config.registry)
        .with_context(|| format!("Failed to load registry {}", config.registry.display()))?;
    let projects = registry.select(&cli.selector())?;
    Ok((registry, projects))
}

fn safety_manager(config: &Config) -> Arc<SafetyManager> {
    Arc::new(SafetyManager::new(
        Arc::new(GitCli::new()),
        config.vcs.clone(),
        config.state_dir.clone(),
    ))
}

/// Run the batch and report. Returns the process exit code.
pub async fn execute(cli: &Cli, config: Config, cancel: CancellationToken) -> Result<i32> {
    let (registry, projects) = load_selection(cli, &config)?;
    let safety = safety_manager(&config);

    if cli.prune {
        return super::prune::execute(&safety, &projects, cli.json).await;
    }

    info!(
        registry = %config.registry.display(),
        known = registry.len(),
        selected = projects.len(),
        "Projects selected"
    );

    let runner: Arc<dyn TestRunner> = Arc::new(ShellTestRunner::new());
    let auditor = Arc::new(AuthenticityAuditor::new(Arc::clone(&runner), config.audit.clone()));
    let mut coordinator = EscalationCoordinator::new(
        Arc::new(AutoFixEngine::default()),
        auditor,
        Arc::clone(&safety),
        config.escalation.clone(),
        config.remediation.clone(),
    )
    .with_max_rounds(config.max_rounds);
    if let Some(agent) = &config.escalation.agent {
        let agent = HttpEscalationAgent::from_config(
            agent,
            Duration::from_secs(config.escalation.round_timeout_secs),
        )?;
        coordinator = coordinator.with_agent(Arc::new(agent));
    }

    let orchestrator = Orchestrator::new(
        safety,
        Arc::new(coordinator),
        runner,
        OrchestratorConfig {
            workers: config.workers,
            project_timeout_secs: config.project_timeout_secs,
            run: RunOptions {
                tests_only: cli.tests_only,
                quick: cli.quick,
                force_fix: cli.force_fix,
                max_loops: config.max_loops,
            },
        },
    );

    let (tx, rx) = mpsc::channel(100);
    let progress = tokio::spawn(show_progress(rx, !cli.json));
    let summary = orchestrator.run_with_events(projects, cancel, tx).await?;
    let _ = progress.await;

    output(&summary, cli.json);
    if let Some(dir) = &cli.report_dir {
        let written = write_reports(dir, &summary).await?;
        println!("Wrote {} report file(s) to {}", written.len(), dir.display());
    }
    Ok(summary.exit_code())
}

async fn show_progress(mut rx: mpsc::Receiver<BatchEvent>, visible: bool) {
    let spinner = visible.then(create_spinner);
    while let Some(event) = rx.recv().await {
        let Some(spinner) = &spinner else {
            continue;
        };
        match event {
            BatchEvent::Started { projects, waves } => {
                spinner.set_message(format!("{projects} project(s) in {waves} wave(s)"));
            }
            BatchEvent::WaveStarted { wave_number, project_count } => {
                spinner.set_message(format!("wave {wave_number}: {project_count} project(s)"));
            }
            BatchEvent::ProjectStarted { project } => {
                spinner.set_message(truncate(&format!("verifying {project}"), 60));
            }
            BatchEvent::ProjectFinished { project, status } => {
                let label = match status {
                    OutcomeStatus::Pass => console::style(status.as_str()).green(),
                    OutcomeStatus::Fail => console::style(status.as_str()).red(),
                    OutcomeStatus::Escalated => console::style(status.as_str()).yellow(),
                    OutcomeStatus::Blocked => console::style(status.as_str()).cyan(),
                };
                spinner.println(format!("  {project}: {label}"));
            }
            BatchEvent::WaveCompleted { .. } => {}
            BatchEvent::Completed { .. } => spinner.finish_and_clear(),
        }
    }
}

/// Write `summary.json`, `<project>.json` and, for projects that did not
/// pass, `<project>.directive.md`.
pub async fn write_reports(dir: &Path, summary: &BatchSummary) -> Result<Vec<PathBuf>> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create report directory {}", dir.display()))?;

    let mut written = Vec::new();
    let summary_path = dir.join("summary.json");
    let body = serde_json::to_string_pretty(summary).context("Failed to serialize summary")?;
    tokio::fs::write(&summary_path, body)
        .await
        .with_context(|| format!("Failed to write {}", summary_path.display()))?;
    written.push(summary_path);

    for report in &summary.projects {
        let path = dir.join(format!("{}.json", report.project));
        let body = serde_json::to_string_pretty(report)
            .with_context(|| format!("Failed to serialize report for {}", report.project))?;
        tokio::fs::write(&path, body)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        written.push(path);

        if let Some(directive) = &report.directive {
            let path = dir.join(format!("{}.directive.md", report.project));
            tokio::fs::write(&path, directive.to_markdown())
                .await
                .with_context(|| format!("Failed to write {}", path.display()))?;
            written.push(path);
        }
    }
    Ok(written)
}
