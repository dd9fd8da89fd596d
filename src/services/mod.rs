//! Services
//!
//! Business logic coordinating the domain models through the ports.

pub mod authenticity_auditor;
pub mod auto_fix_engine;
pub mod dependency_scheduler;
pub mod escalation_coordinator;
pub mod health_scanner;
pub mod orchestrator;
pub mod project_registry;
pub mod report_aggregator;
pub mod safety_manager;
pub mod strategies;

pub use authenticity_auditor::AuthenticityAuditor;
pub use auto_fix_engine::AutoFixEngine;
pub use dependency_scheduler::{build_waves, detect_cycle};
pub use escalation_coordinator::{EscalationCoordinator, RunOptions};
pub use health_scanner::HealthScanner;
pub use orchestrator::{BatchEvent, Orchestrator, OrchestratorConfig};
pub use project_registry::{ProjectRegistry, ProjectSelector};
pub use report_aggregator::ReportAggregator;
pub use safety_manager::SafetyManager;
