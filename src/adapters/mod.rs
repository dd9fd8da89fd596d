//! Infrastructure adapters for external systems.

pub mod agents;
pub mod git;
pub mod runners;
