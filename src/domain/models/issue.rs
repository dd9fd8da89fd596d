//! Issue domain model
//!
//! Issues are defects detected in a project, either by the health scanner
//! before remediation or by the authenticity auditor after a test run.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// Category of a detected defect. Strategies declare which categories they handle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    MissingDependency,
    SyntaxError,
    MissingTestDirectory,
    ImportPath,
    SecuritySmell,
    MockUsage,
    SuspiciousTiming,
    ExecutionError,
    FakeResult,
    HoneypotPassed,
}

impl IssueCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingDependency => "missing_dependency",
            Self::SyntaxError => "syntax_error",
            Self::MissingTestDirectory => "missing_test_directory",
            Self::ImportPath => "import_path",
            Self::SecuritySmell => "security_smell",
            Self::MockUsage => "mock_usage",
            Self::SuspiciousTiming => "suspicious_timing",
            Self::ExecutionError => "execution_error",
            Self::FakeResult => "fake_result",
            Self::HoneypotPassed => "honeypot_passed",
        }
    }

    /// Categories raised by test audits rather than by the health scan.
    ///
    /// An audit finding that a later audit no longer reports is resolved.
    pub fn is_audit_finding(&self) -> bool {
        matches!(
            self,
            Self::MissingDependency
                | Self::MockUsage
                | Self::SuspiciousTiming
                | Self::ExecutionError
                | Self::FakeResult
                | Self::HoneypotPassed
        )
    }
}

impl fmt::Display for IssueCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Severity of an issue
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Critical,
    Warning,
    Info,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::Warning => "warning",
            Self::Info => "info",
        }
    }
}

/// A detected defect.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Issue {
    pub category: IssueCategory,
    pub severity: Severity,
    /// Evidence text explaining why the issue was raised
    pub evidence: String,
    /// Optional subject, e.g. the missing module name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    /// Files the issue concerns, relative to the project root
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub files: Vec<PathBuf>,
    pub resolved: bool,
}

impl Issue {
    pub fn new(category: IssueCategory, severity: Severity, evidence: impl Into<String>) -> Self {
        Self {
            category,
            severity,
            evidence: evidence.into(),
            subject: None,
            files: Vec::new(),
            resolved: false,
        }
    }

    pub fn critical(category: IssueCategory, evidence: impl Into<String>) -> Self {
        Self::new(category, Severity::Critical, evidence)
    }

    pub fn warning(category: IssueCategory, evidence: impl Into<String>) -> Self {
        Self::new(category, Severity::Warning, evidence)
    }

    pub fn info(category: IssueCategory, evidence: impl Into<String>) -> Self {
        Self::new(category, Severity::Info, evidence)
    }

    pub fn with_subject(mut self, subject: impl Into<String>) -> Self {
        self.subject = Some(subject.into());
        self
    }

    pub fn with_file(mut self, file: impl Into<PathBuf>) -> Self {
        self.files.push(file.into());
        self
    }

    /// Two issues with the same key describe the same defect.
    pub fn same_defect(&self, other: &Self) -> bool {
        self.category == other.category && self.subject == other.subject && self.files == other.files
    }

    pub fn is_blocking(&self) -> bool {
        !self.resolved && self.severity == Severity::Critical
    }
}

/// Merge freshly detected issues into an existing list.
///
/// An already-known defect that shows up again is marked unresolved; new
/// defects are appended. Known issues that were not re-detected keep their
/// current state.
pub fn merge_issues(existing: &mut Vec<Issue>, detected: Vec<Issue>) {
    for issue in detected {
        if let Some(known) = existing.iter_mut().find(|i| i.same_defect(&issue)) {
            known.resolved = false;
            known.evidence = issue.evidence;
        } else {
            existing.push(issue);
        }
    }
}
