//! ecoverify - ecosystem verification and auto-remediation
//!
//! Verifies a set of inter-dependent projects in dependency order. Each
//! project is remediated inside an isolated, reversible change-set, its test
//! results are audited for authenticity, and unresolved failures escalate
//! through bounded negotiation before the change-set is merged or rolled back.
//!
//! # Architecture
//!
//! - **Domain Layer** (`domain`): models, errors and ports
//! - **Service Layer** (`services`): scheduling, remediation, auditing, escalation
//! - **Adapters** (`adapters`): git, shell test runner, HTTP escalation agent
//! - **Infrastructure Layer** (`infrastructure`): configuration and logging
//! - **CLI Layer** (`cli`): command-line interface

pub mod adapters;
pub mod cli;
pub mod domain;
pub mod infrastructure;
pub mod services;

// Re-export commonly used types for convenience
pub use domain::models::{
    BatchSummary, Config, Issue, IssueCategory, OutcomeStatus, Project, ProjectId, Verdict,
};
pub use domain::{VerifyError, VerifyResult};
pub use infrastructure::config::{ConfigError, ConfigLoader};
pub use services::{Orchestrator, OrchestratorConfig, ProjectRegistry, ProjectSelector};
