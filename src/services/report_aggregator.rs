//! Report Aggregator
//!
//! Collects one [`ProjectReport`] per project as verification finishes,
//! runs provider -> consumer interface checks and renders the batch summary
//! as a table or JSON.

use std::collections::HashMap;
use std::sync::Arc;

use anyhow::{Context, Result};
use chrono::Utc;
use comfy_table::{presets, Attribute, Cell, Color, ContentArrangement, Table};
use tokio::sync::Mutex;
use tracing::{debug, info};
use uuid::Uuid;

use crate::domain::models::{
    BatchSummary, DependencyGraph, InterfaceCheck, OutcomeCounts, OutcomeStatus, Project,
    ProjectId, ProjectReport,
};
use crate::domain::ports::TestRunner;

/// Append-only collector shared by concurrent project pipelines.
pub struct ReportAggregator {
    batch_id: Uuid,
    started_at: chrono::DateTime<Utc>,
    reports: Mutex<Vec<ProjectReport>>,
    communication: Mutex<Vec<InterfaceCheck>>,
}

impl Default for ReportAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl ReportAggregator {
    pub fn new() -> Self {
        Self {
            batch_id: Uuid::new_v4(),
            started_at: Utc::now(),
            reports: Mutex::new(Vec::new()),
            communication: Mutex::new(Vec::new()),
        }
    }

    pub fn batch_id(&self) -> Uuid {
        self.batch_id
    }

    /// Record a project's outcome. A later report for the same project is ignored.
    pub async fn record(&self, report: ProjectReport) {
        let mut reports = self.reports.lock().await;
        if reports.iter().any(|r| r.project == report.project) {
            debug!(project = %report.project, "Project already reported; ignoring");
            return;
        }
        info!(project = %report.project, status = report.status.as_str(), "Project reported");
        reports.push(report);
    }

    pub async fn status_of(&self, id: &ProjectId) -> Option<OutcomeStatus> {
        self.reports
            .lock()
            .await
            .iter()
            .find(|r| &r.project == id)
            .map(|r| r.status)
    }

    /// Check each provider -> consumer edge once both sides are reported.
    ///
    /// The consumer's interface check runs in its own root against the
    /// provider's post-verification state. Consumers that did not pass, or
    /// have no check configured, get `callable: None`.
    pub async fn check_interfaces(
        &self,
        graph: &DependencyGraph,
        projects: &HashMap<ProjectId, Project>,
        runner: Arc<dyn TestRunner>,
    ) {
        let mut checks = Vec::new();
        for edge in graph.edges() {
            let consumer_status = self.status_of(&edge.to).await;
            let Some(consumer) = projects.get(&edge.to) else {
                continue;
            };

            let (callable, detail) = if consumer_status != Some(OutcomeStatus::Pass) {
                (None, "consumer did not pass verification".to_string())
            } else if consumer.interface_check.is_none() {
                (None, "no interface check configured".to_string())
            } else {
                match runner.check_interface(consumer, &consumer.root).await {
                    Ok(Some(true)) => (Some(true), "interface check passed".to_string()),
                    Ok(Some(false)) => (Some(false), "interface check failed".to_string()),
                    Ok(None) => (None, "no interface check configured".to_string()),
                    Err(e) => (Some(false), format!("interface check could not run: {e:#}")),
                }
            };
            debug!(provider = %edge.from, consumer = %edge.to, ?callable, "Interface checked");
            checks.push(InterfaceCheck {
                provider: edge.from.clone(),
                consumer: edge.to.clone(),
                callable,
                detail,
            });
        }
        self.communication.lock().await.extend(checks);
    }

    /// Snapshot of everything recorded so far.
    pub async fn summary(&self, waves: Vec<Vec<ProjectId>>) -> BatchSummary {
        let reports = self.reports.lock().await.clone();
        let mut counts = OutcomeCounts::default();
        for report in &reports {
            match report.status {
                OutcomeStatus::Pass => counts.pass += 1,
                OutcomeStatus::Fail => counts.fail += 1,
                OutcomeStatus::Escalated => counts.escalated += 1,
                OutcomeStatus::Blocked => counts.blocked += 1,
            }
        }

        // Present projects in scheduling order
        let order: Vec<&ProjectId> = waves.iter().flatten().collect();
        let mut projects = reports;
        projects.sort_by_key(|r| order.iter().position(|id| **id == r.project).unwrap_or(usize::MAX));

        BatchSummary {
            batch_id: self.batch_id,
            started_at: self.started_at,
            finished_at: Some(Utc::now()),
            waves,
            counts,
            projects,
            communication: self.communication.lock().await.clone(),
        }
    }
}

// -----------------------------------------------------------------------------
// Rendering
// -----------------------------------------------------------------------------

fn status_color(status: OutcomeStatus) -> Color {
    match status {
        OutcomeStatus::Pass => Color::Green,
        OutcomeStatus::Fail => Color::Red,
        OutcomeStatus::Escalated => Color::Yellow,
        OutcomeStatus::Blocked => Color::Cyan,
    }
}

fn header(labels: &[&str]) -> Vec<Cell> {
    labels
        .iter()
        .map(|l| Cell::new(l).add_attribute(Attribute::Bold))
        .collect()
}

fn base_table() -> Table {
    let mut table = Table::new();
    table
        .load_preset(presets::UTF8_FULL_CONDENSED)
        .set_content_arrangement(ContentArrangement::Dynamic);
    table
}

/// Human-readable batch summary.
pub fn render_table(summary: &BatchSummary, use_colors: bool) -> String {
    let mut table = base_table();
    table.set_header(header(&[
        "Project", "Status", "Health", "Loops", "Rounds", "Confidence", "Open issues", "Fixes",
    ]));

    for report in &summary.projects {
        let status = if use_colors {
            Cell::new(report.status.as_str()).fg(status_color(report.status))
        } else {
            Cell::new(report.status.as_str())
        };
        let open = report.issues.iter().filter(|i| !i.resolved).count();
        let applied = report.fixes.iter().filter(|f| f.success).count();
        let confidence = if report.confidence.tests == 0 {
            "-".to_string()
        } else {
            format!("{:.0} (min {})", report.confidence.mean, report.confidence.min)
        };
        table.add_row(vec![
            Cell::new(report.project.as_str()),
            status,
            Cell::new(report.health.as_str()),
            Cell::new(report.loops),
            Cell::new(report.rounds),
            Cell::new(confidence),
            Cell::new(open),
            Cell::new(format!("{applied}/{}", report.fixes.len())),
        ]);
    }

    let mut out = table.to_string();
    let c = summary.counts;
    out.push_str(&format!(
        "\n{} projects: {} pass, {} fail, {} escalated, {} blocked\n",
        c.total(),
        c.pass,
        c.fail,
        c.escalated,
        c.blocked
    ));

    for report in summary.projects.iter().filter(|r| r.note.is_some()) {
        if let Some(note) = &report.note {
            out.push_str(&format!("  {}: {note}\n", report.project));
        }
    }

    if !summary.communication.is_empty() {
        let mut matrix = base_table();
        matrix.set_header(header(&["Provider", "Consumer", "Callable", "Detail"]));
        for check in &summary.communication {
            let callable = match check.callable {
                Some(true) => "yes",
                Some(false) => "no",
                None => "-",
            };
            matrix.add_row(vec![
                Cell::new(check.provider.as_str()),
                Cell::new(check.consumer.as_str()),
                Cell::new(callable),
                Cell::new(&check.detail),
            ]);
        }
        out.push('\n');
        out.push_str(&matrix.to_string());
        out.push('\n');
    }
    out
}

pub fn render_json(summary: &BatchSummary) -> Result<String> {
    serde_json::to_string_pretty(summary).context("Failed to serialize batch summary")
}
