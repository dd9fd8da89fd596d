//! Auto-Fix Engine
//!
//! Walks unresolved issues and hands each one to the first strategy that can
//! handle it. Every attempt is recorded as a [`Fix`], successful or not.

use std::collections::HashMap;
use tracing::{debug, instrument, warn};

use crate::domain::models::{Fix, FixKind, Issue, IssueCategory, Severity};
use crate::domain::ports::{FixContext, RemediationStrategy};
use crate::services::strategies::default_strategies;

pub struct AutoFixEngine {
    strategies: Vec<Box<dyn RemediationStrategy>>,
}

impl Default for AutoFixEngine {
    fn default() -> Self {
        Self::new(default_strategies())
    }
}

impl AutoFixEngine {
    /// Strategies are tried in the given order.
    pub fn new(strategies: Vec<Box<dyn RemediationStrategy>>) -> Self {
        Self { strategies }
    }

    pub fn strategy_names(&self) -> Vec<&'static str> {
        self.strategies.iter().map(|s| s.name()).collect()
    }

    fn fix_kind_for(category: IssueCategory) -> FixKind {
        match category {
            IssueCategory::MissingDependency => FixKind::InstallDependency,
            IssueCategory::SyntaxError => FixKind::RepairConfigSyntax,
            IssueCategory::ImportPath => FixKind::NormalizeImportPath,
            IssueCategory::MissingTestDirectory => FixKind::CreateDirectory,
            _ => FixKind::AgentEdit,
        }
    }

    /// Attempt fixes for unresolved `issues`, marking fixed ones resolved.
    ///
    /// With proposals in `ctx` only proposal-applying strategies run;
    /// otherwise only built-in ones do. `info` issues are skipped unless
    /// `include_info` is set. Issues no strategy handles pass through.
    #[instrument(skip_all, fields(project = %ctx.project.id, negotiated = !ctx.proposals.is_empty()))]
    pub async fn remediate(
        &self,
        ctx: &FixContext<'_>,
        issues: &mut [Issue],
        include_info: bool,
    ) -> Vec<Fix> {
        let negotiated = !ctx.proposals.is_empty();
        let mut fixes = Vec::new();
        // One proposal application per category, shared by that category's issues
        let mut applied: HashMap<IssueCategory, bool> = HashMap::new();

        for issue in issues.iter_mut() {
            if issue.resolved {
                continue;
            }
            if issue.severity == Severity::Info && !include_info {
                debug!(category = %issue.category, "Skipping info issue");
                continue;
            }

            let Some(strategy) = self
                .strategies
                .iter()
                .filter(|s| s.accepts_proposals() == negotiated)
                .find(|s| s.can_handle(issue, ctx))
            else {
                debug!(category = %issue.category, "No strategy handles issue");
                continue;
            };

            if strategy.accepts_proposals() {
                if let Some(&success) = applied.get(&issue.category) {
                    issue.resolved = success;
                    continue;
                }
            }

            let fix = match strategy.apply(ctx, issue).await {
                Ok(fix) => fix,
                Err(e) => {
                    warn!(
                        strategy = strategy.name(),
                        category = %issue.category,
                        error = %e,
                        "Strategy failed"
                    );
                    Fix::failed(
                        Self::fix_kind_for(issue.category),
                        strategy.name(),
                        issue.category,
                        format!("{e:#}"),
                    )
                }
            };

            if strategy.accepts_proposals() {
                applied.insert(issue.category, fix.success);
            }
            issue.resolved = fix.success;
            fixes.push(fix);
        }

        fixes
    }
}
