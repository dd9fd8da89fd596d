//! Domain models
//!
//! Plain data types shared by services, adapters and the CLI.

pub mod audit;
pub mod change_set;
pub mod config;
pub mod dag;
pub mod fix;
pub mod issue;
pub mod project;
pub mod report;
pub mod verification;

pub use audit::{
    AuditReport, Honeypot, HoneypotKind, HoneypotResult, ObservedTest, OperationKind, Penalty,
    SuiteExecution, TestRunResult,
};
pub use change_set::{BaselineMarker, ChangeSet, Disposition};
pub use config::{
    AgentEndpointConfig, AuditConfig, Config, DurationFloors, EscalationConfig, LogFormat,
    LoggingConfig, PenaltyConfig, RemediationConfig, RotationPolicy, VcsConfig,
};
pub use dag::{DependencyEdge, DependencyGraph, Wave};
pub use fix::{Fix, FixKind, FixProposal, ProposedEdit};
pub use issue::{merge_issues, Issue, IssueCategory, Severity};
pub use project::{HealthStatus, Project, ProjectId};
pub use report::{
    BatchSummary, ConfidenceStats, InterfaceCheck, OutcomeCounts, OutcomeStatus, ProjectReport,
};
pub use verification::{
    AgentRole, EscalationRound, EscalationState, FixDirective, Verdict, VerificationRun,
    MAX_FIX_LOOPS, MAX_NEGOTIATION_ROUNDS,
};
