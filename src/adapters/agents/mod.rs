//! Escalation agent adapters.

pub mod http;

pub use http::HttpEscalationAgent;
