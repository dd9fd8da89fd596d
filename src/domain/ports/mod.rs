//! Port trait definitions (Hexagonal Architecture)
//!
//! Async trait interfaces implemented by adapters:
//! - VersionControl: snapshot, isolate, merge and roll back project state
//! - TestRunner: execute suites, honeypots and interface checks
//! - RemediationStrategy: one way of fixing a category of issue
//! - EscalationAgent: a reasoning agent consulted during negotiation

pub mod escalation_agent;
pub mod remediation_strategy;
pub mod test_runner;
pub mod version_control;

pub use escalation_agent::{EscalationAgent, NegotiationContext};
pub use remediation_strategy::{FixContext, RemediationStrategy};
pub use test_runner::TestRunner;
pub use version_control::VersionControl;
