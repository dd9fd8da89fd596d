//! Test authenticity models
//!
//! Raw test observations reported by a [`TestRunner`](crate::domain::ports::TestRunner),
//! the scored [`TestRunResult`]s produced by the auditor, and the honeypot
//! battery used to detect a compromised harness.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;

use super::{Issue, ProjectId};
use crate::domain::errors::VerifyError;

// ---------------------------------------------------------------------------
// OperationKind
// ---------------------------------------------------------------------------

/// What a test claims to exercise. Drives duration floors and cross-examination.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
    #[default]
    Unit,
    Network,
    Storage,
    Filesystem,
    Integration,
}

impl OperationKind {
    /// Infer the kind from a test name when the runner did not declare one.
    pub fn infer(test_name: &str) -> Self {
        let name = test_name.to_lowercase();
        let has = |needles: &[&str]| needles.iter().any(|n| name.contains(n));
        if has(&["integration", "e2e", "end_to_end"]) {
            Self::Integration
        } else if has(&["http", "api", "network", "request", "socket", "endpoint"]) {
            Self::Network
        } else if has(&["db", "sql", "query", "storage", "database", "repo"]) {
            Self::Storage
        } else if has(&["file", "_fs", "fs_", "disk", "path"]) {
            Self::Filesystem
        } else {
            Self::Unit
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Unit => "unit",
            Self::Network => "network",
            Self::Storage => "storage",
            Self::Filesystem => "filesystem",
            Self::Integration => "integration",
        }
    }

    /// Whether the kind claims interaction with a real external system.
    pub fn expects_interaction(&self) -> bool {
        !matches!(self, Self::Unit)
    }
}

impl fmt::Display for OperationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Raw observations
// ---------------------------------------------------------------------------

/// One test as observed in a single execution of the suite.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ObservedTest {
    pub name: String,
    pub passed: bool,
    pub duration_secs: f64,
    #[serde(default)]
    pub kind: Option<OperationKind>,
    /// Interaction evidence, e.g. `latency_ms`, `status_code`
    #[serde(default)]
    pub evidence: BTreeMap<String, String>,
}

/// The outcome of one execution of a project's test suite.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SuiteExecution {
    pub tests: Vec<ObservedTest>,
    pub exit_success: bool,
    pub wall_time_secs: f64,
    /// Combined stdout/stderr, truncated
    pub output: String,
}

// ---------------------------------------------------------------------------
// Scored results
// ---------------------------------------------------------------------------

/// A reason confidence was reduced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Penalty {
    pub reason: String,
    pub points: u8,
}

/// A scored test result.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TestRunResult {
    pub name: String,
    pub kind: OperationKind,
    /// Mean duration over repeated runs
    pub duration_secs: f64,
    pub run_durations: Vec<f64>,
    /// True only if every repeated run passed
    pub passed: bool,
    pub evidence: BTreeMap<String, String>,
    /// 0-100 estimate that the test exercised a real system
    pub confidence: u8,
    pub penalties: Vec<Penalty>,
    /// Questions the evidence could not answer during cross-examination
    pub unanswered: Vec<String>,
    /// Set when cross-examination failed
    pub fake: bool,
}

impl TestRunResult {
    pub fn new(name: impl Into<String>, kind: OperationKind, passed: bool) -> Self {
        Self {
            name: name.into(),
            kind,
            duration_secs: 0.0,
            run_durations: Vec::new(),
            passed,
            evidence: BTreeMap::new(),
            confidence: 100,
            penalties: Vec::new(),
            unanswered: Vec::new(),
            fake: false,
        }
    }

    /// Subtract `points` from confidence, saturating at zero.
    pub fn penalize(&mut self, reason: impl Into<String>, points: u8) {
        if points == 0 {
            return;
        }
        self.confidence = self.confidence.saturating_sub(points);
        self.penalties.push(Penalty {
            reason: reason.into(),
            points,
        });
    }
}

// ---------------------------------------------------------------------------
// Honeypots
// ---------------------------------------------------------------------------

/// The kinds of impossible tests in the honeypot battery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HoneypotKind {
    ContradictoryAssertion,
    UnreachableNetwork,
    ImpossibleTiming,
    PerfectAccuracy,
}

/// A deliberately impossible test. It must always fail.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Honeypot {
    pub name: String,
    pub kind: HoneypotKind,
}

impl Honeypot {
    /// The fixed battery run against every project.
    pub fn battery() -> Vec<Self> {
        vec![
            Self {
                name: "test_impossible_assertion".into(),
                kind: HoneypotKind::ContradictoryAssertion,
            },
            Self {
                name: "test_unreachable_network_target".into(),
                kind: HoneypotKind::UnreachableNetwork,
            },
            Self {
                name: "test_impossible_timing".into(),
                kind: HoneypotKind::ImpossibleTiming,
            },
            Self {
                name: "test_perfect_accuracy_claim".into(),
                kind: HoneypotKind::PerfectAccuracy,
            },
        ]
    }
}

/// Outcome of one honeypot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HoneypotResult {
    pub name: String,
    pub kind: HoneypotKind,
    pub passed: bool,
    pub detail: String,
}

impl HoneypotResult {
    pub fn failed(honeypot: &Honeypot, detail: impl Into<String>) -> Self {
        Self {
            name: honeypot.name.clone(),
            kind: honeypot.kind,
            passed: false,
            detail: detail.into(),
        }
    }

    pub fn passed(honeypot: &Honeypot, detail: impl Into<String>) -> Self {
        Self {
            passed: true,
            ..Self::failed(honeypot, detail)
        }
    }
}

// ---------------------------------------------------------------------------
// AuditReport
// ---------------------------------------------------------------------------

/// Everything one audit produced.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditReport {
    pub tests: Vec<TestRunResult>,
    pub honeypots: Vec<HoneypotResult>,
    /// Issues raised during this audit
    pub issues: Vec<Issue>,
    /// Run-level confidence (mean of test confidences, 0 when voided)
    pub confidence: u8,
    /// Set when a honeypot passed; all confidence scores are void
    pub voided: bool,
    /// Set when confidence collapsed below the collapse threshold
    pub collapsed: bool,
    pub passed: bool,
}

impl AuditReport {
    pub fn honeypot_breached(&self) -> bool {
        self.honeypots.iter().any(|h| h.passed)
    }

    /// The authenticity violation this audit represents, if any.
    pub fn violation(&self, project: &ProjectId) -> Option<VerifyError> {
        let reason = if self.voided {
            let breached: Vec<&str> = self
                .honeypots
                .iter()
                .filter(|h| h.passed)
                .map(|h| h.name.as_str())
                .collect();
            format!("honeypot passed: {}", breached.join(", "))
        } else if self.collapsed {
            format!("confidence collapsed to {}", self.confidence)
        } else {
            return None;
        };
        Some(VerifyError::AuthenticityViolation {
            project: project.clone(),
            reason,
        })
    }

    pub fn min_confidence(&self) -> u8 {
        self.tests.iter().map(|t| t.confidence).min().unwrap_or(self.confidence)
    }
}
