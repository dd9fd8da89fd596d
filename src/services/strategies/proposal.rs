//! Applies negotiated fix proposals.

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::{info, warn};

use crate::domain::models::{Fix, FixKind, FixProposal, Issue, ProposedEdit};
use crate::domain::ports::{FixContext, RemediationStrategy};

/// Applies every proposal in the context that addresses the issue's category.
#[derive(Debug, Default)]
pub struct ProposalStrategy;

impl ProposalStrategy {
    async fn apply_edit(ctx: &FixContext<'_>, edit: &ProposedEdit) -> Result<()> {
        let path = ctx.resolve(edit.path())?;
        match edit {
            ProposedEdit::Write { content, .. } => {
                if let Some(parent) = path.parent() {
                    tokio::fs::create_dir_all(parent)
                        .await
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
                tokio::fs::write(&path, content)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
            ProposedEdit::Replace { find, replace, .. } => {
                let source = tokio::fs::read_to_string(&path)
                    .await
                    .with_context(|| format!("Failed to read {}", path.display()))?;
                if !source.contains(find.as_str()) {
                    anyhow::bail!("text to replace not found in {}", edit.path().display());
                }
                tokio::fs::write(&path, source.replacen(find.as_str(), replace, 1))
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
            }
        }
        Ok(())
    }

    async fn apply_proposal(&self, ctx: &FixContext<'_>, proposal: &FixProposal) -> Fix {
        let origin = proposal.author.as_deref().unwrap_or(self.name());
        let mut fix = Fix::succeeded(
            FixKind::AgentEdit,
            origin,
            proposal.addresses,
            proposal.description.clone(),
        );
        for edit in &proposal.edits {
            fix.targets.push(edit.path().clone());
            if let Err(e) = Self::apply_edit(ctx, edit).await {
                warn!(project = %ctx.project.id, error = %e, "Proposed edit failed");
                fix.success = false;
                fix.description = format!("{}: {e}", proposal.description);
                return fix;
            }
        }
        info!(project = %ctx.project.id, origin = %origin, edits = proposal.edits.len(), "Applied proposal");
        fix
    }
}

#[async_trait]
impl RemediationStrategy for ProposalStrategy {
    fn name(&self) -> &'static str {
        "proposal"
    }

    fn can_handle(&self, issue: &Issue, ctx: &FixContext<'_>) -> bool {
        ctx.proposals.iter().any(|p| p.addresses == issue.category)
    }

    fn accepts_proposals(&self) -> bool {
        true
    }

    async fn apply(&self, ctx: &FixContext<'_>, issue: &Issue) -> Result<Fix> {
        let mut last = None;
        for proposal in ctx.proposals.iter().filter(|p| p.addresses == issue.category) {
            let fix = self.apply_proposal(ctx, proposal).await;
            if !fix.success {
                return Ok(fix);
            }
            last = Some(fix);
        }
        last.context("no proposal addresses this issue")
    }
}
