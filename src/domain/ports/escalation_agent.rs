//! Escalation agent port.

use anyhow::Result;
use async_trait::async_trait;
use serde::Serialize;

use crate::domain::models::{AgentRole, Fix, FixProposal, Issue, ProjectId, TestRunResult};

/// What an agent sees when asked for proposals.
#[derive(Debug, Clone, Serialize)]
pub struct NegotiationContext {
    pub project: ProjectId,
    /// 1-based round number
    pub round: u32,
    pub unresolved: Vec<Issue>,
    pub attempted: Vec<Fix>,
    pub tests: Vec<TestRunResult>,
    pub confidence_trend: Vec<u8>,
}

/// A reasoning agent consulted once automatic remediation is exhausted.
#[async_trait]
pub trait EscalationAgent: Send + Sync {
    fn role(&self) -> AgentRole;

    fn name(&self) -> &str;

    /// Propose fixes. Higher temperatures ask for more exploratory proposals.
    async fn propose_fixes(
        &self,
        ctx: &NegotiationContext,
        temperature: f64,
    ) -> Result<Vec<FixProposal>>;
}
