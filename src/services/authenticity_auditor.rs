//! Test Authenticity Auditor
//!
//! Runs a project's suite repeatedly and scores how likely each passing test
//! is to have exercised a real system. Scoring:
//!
//! 1. Every test starts at 100 confidence.
//! 2. Fixed penalties are subtracted for missing interaction evidence,
//!    durations below the floor of the claimed operation kind, near-uniform
//!    timings across runs, and a perfect pass rate over a large batch.
//! 3. Tests below the cross-examination threshold must answer kind-specific
//!    questions from their evidence; every unanswered question costs more
//!    and marks the result fake.
//! 4. A honeypot battery runs last. Any honeypot that passes voids every
//!    score in the run.

use regex::Regex;
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

use crate::domain::errors::{VerifyError, VerifyResult};
use crate::domain::models::{
    AuditConfig, AuditReport, Honeypot, HoneypotResult, Issue, IssueCategory, ObservedTest,
    OperationKind, Project, SuiteExecution, TestRunResult,
};
use crate::domain::ports::TestRunner;
use crate::services::health_scanner::{is_source_file, walk_files};

/// Evidence keys recognized as proof of interaction.
pub const EVIDENCE_KEYS: &[&str] = &["latency_ms", "status_code", "rows_affected", "bytes_written"];

/// Rust path keywords that `unresolved import` reports but no package provides.
const PATH_KEYWORDS: &[&str] = &["crate", "self", "super", "Self"];

/// A question asked during cross-examination and the evidence key that answers it.
#[derive(Debug, Clone, Copy)]
struct Question {
    text: &'static str,
    evidence_key: &'static str,
}

const fn question(text: &'static str, evidence_key: &'static str) -> Question {
    Question { text, evidence_key }
}

fn questions_for(kind: OperationKind) -> &'static [Question] {
    const NETWORK: &[Question] = &[
        question("What was the measured request latency?", "latency_ms"),
        question("What status code did the server return?", "status_code"),
    ];
    const STORAGE: &[Question] = &[
        question("How many rows did the operation affect?", "rows_affected"),
        question("What was the query latency?", "latency_ms"),
    ];
    const FILESYSTEM: &[Question] = &[question("How many bytes were written?", "bytes_written")];
    match kind {
        OperationKind::Network | OperationKind::Integration => NETWORK,
        OperationKind::Storage => STORAGE,
        OperationKind::Filesystem => FILESYSTEM,
        OperationKind::Unit => &[],
    }
}

#[derive(Clone)]
struct NamedPattern {
    name: &'static str,
    regex: Regex,
}

fn named(name: &'static str, pattern: &str) -> NamedPattern {
    NamedPattern {
        name,
        regex: Regex::new(pattern).expect("audit pattern is valid"),
    }
}

/// Coefficient of variation of `values`; zero for an empty or all-zero sample.
pub fn coefficient_of_variation(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    if mean <= f64::EPSILON {
        return 0.0;
    }
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    variance.sqrt() / mean
}

pub struct AuthenticityAuditor {
    runner: Arc<dyn TestRunner>,
    config: AuditConfig,
    mock_patterns: Vec<NamedPattern>,
    missing_module_patterns: Vec<Regex>,
}

impl AuthenticityAuditor {
    pub fn new(runner: Arc<dyn TestRunner>, config: AuditConfig) -> Self {
        Self {
            runner,
            config,
            mock_patterns: vec![
                named("unittest.mock", r"\bunittest\.mock\b|\bfrom\s+mock\s+import\b"),
                named("MagicMock", r"\bMagicMock\b"),
                named("mock.patch", r"@patch\b|\bmock\.patch\b|\bmocker\.patch\b"),
                named("jest.mock", r"\bjest\.(mock|fn|spyOn)\s*\("),
                named("sinon", r"\bsinon\.(stub|mock|fake|spy)\b"),
                named("nock", r"\bnock\s*\("),
                named("responses", r"@responses\.activate\b"),
                named("httpretty", r"\bhttpretty\b"),
                named("mockall", r"\bmockall\b|#\[automock\]"),
            ],
            missing_module_patterns: [
                r#"No module named ['"]?([A-Za-z_][\w\.]*)['"]?"#,
                r#"Cannot find module ['"]([^'"./][^'"]*)['"]"#,
                r"can't find crate for `(\w+)`",
                r"unresolved import `(\w+)",
            ]
            .iter()
            .map(|p| Regex::new(p).expect("missing-module pattern is valid"))
            .collect(),
        }
    }

    pub fn config(&self) -> &AuditConfig {
        &self.config
    }

    fn floor_for(&self, kind: OperationKind) -> Option<f64> {
        let floors = &self.config.duration_floors;
        match kind {
            OperationKind::Unit => None,
            OperationKind::Network => Some(floors.network),
            OperationKind::Storage => Some(floors.storage),
            OperationKind::Filesystem => Some(floors.filesystem),
            OperationKind::Integration => Some(floors.integration),
        }
    }

    /// Audit the project in `workdir`, running the suite `repeat_runs` times.
    #[instrument(skip(self, project), fields(project = %project.id))]
    pub async fn audit(&self, project: &Project, workdir: &Path, repeat_runs: u32) -> AuditReport {
        let mut report = AuditReport::default();
        let runs = repeat_runs.max(1);

        let mut executions = Vec::with_capacity(runs as usize);
        for run in 1..=runs {
            match self.execute_once(project, workdir).await {
                Ok(execution) => executions.push(execution),
                Err(e) => {
                    warn!(project = %project.id, run, error = %e, "Test suite could not run");
                    report.issues.push(
                        Issue::critical(IssueCategory::ExecutionError, e.to_string())
                            .with_subject("launch"),
                    );
                    report.issues.extend(self.detect_missing_modules(&executions));
                    return report;
                }
            }
        }

        report.issues.extend(self.detect_missing_modules(&executions));
        report.issues.extend(self.detect_mocks(project, workdir).await);

        report.tests = self.score_tests(&executions, &mut report.issues);
        self.check_outcomes(&executions, &report.tests, &mut report.issues);

        if self.config.honeypots {
            report.honeypots = self.run_honeypots(project, workdir, &mut report.issues).await;
        }

        if report.honeypot_breached() {
            report.voided = true;
            for test in &mut report.tests {
                test.confidence = 0;
            }
            for breach in report.honeypots.iter().filter(|h| h.passed) {
                report.issues.push(
                    Issue::critical(
                        IssueCategory::HoneypotPassed,
                        format!("honeypot {} passed: {}", breach.name, breach.detail),
                    )
                    .with_subject(breach.name.clone()),
                );
            }
        }

        report.confidence = Self::run_confidence(&report.tests);
        report.collapsed = !report.voided
            && !report.tests.is_empty()
            && report.confidence < self.config.collapse_threshold;

        report.passed = !report.tests.is_empty()
            && report.tests.iter().all(|t| t.passed && !t.fake)
            && report.confidence >= self.config.cross_examination_threshold
            && !report.issues.iter().any(Issue::is_blocking)
            && !report.honeypot_breached();

        info!(
            project = %project.id,
            tests = report.tests.len(),
            confidence = report.confidence,
            voided = report.voided,
            collapsed = report.collapsed,
            passed = report.passed,
            "Audit complete"
        );
        report
    }

    /// Run the suite once and report only the modules it could not import,
    /// so they can be installed before the first audit.
    #[instrument(skip(self, project), fields(project = %project.id))]
    pub async fn detect_missing_dependencies(&self, project: &Project, workdir: &Path) -> Vec<Issue> {
        match self.execute_once(project, workdir).await {
            Ok(execution) => {
                let issues = self.detect_missing_modules(std::slice::from_ref(&execution));
                debug!(project = %project.id, missing = issues.len(), "Dependency preflight complete");
                issues
            }
            Err(e) => {
                debug!(project = %project.id, error = %e, "Dependency preflight could not run");
                Vec::new()
            }
        }
    }

    async fn execute_once(&self, project: &Project, workdir: &Path) -> VerifyResult<SuiteExecution> {
        let budget = Duration::from_secs(self.config.test_timeout_secs);
        match tokio::time::timeout(budget, self.runner.run_suite(project, workdir)).await {
            Ok(Ok(execution)) => Ok(execution),
            Ok(Err(e)) => Err(VerifyError::execution(
                &project.id,
                format!("failed to launch test suite: {e:#}"),
            )),
            Err(_) => Err(VerifyError::execution(
                &project.id,
                format!("test suite exceeded {}s timeout", self.config.test_timeout_secs),
            )),
        }
    }

    fn detect_missing_modules(&self, executions: &[SuiteExecution]) -> Vec<Issue> {
        let mut seen = BTreeSet::new();
        let mut issues = Vec::new();
        for execution in executions {
            for pattern in &self.missing_module_patterns {
                for caps in pattern.captures_iter(&execution.output) {
                    let module = caps[1].to_string();
                    if PATH_KEYWORDS.contains(&module.as_str()) {
                        continue;
                    }
                    if seen.insert(module.clone()) {
                        issues.push(
                            Issue::critical(
                                IssueCategory::MissingDependency,
                                caps[0].to_string(),
                            )
                            .with_subject(module),
                        );
                    }
                }
            }
        }
        issues
    }

    async fn detect_mocks(&self, project: &Project, workdir: &Path) -> Vec<Issue> {
        let roots: Vec<_> = project
            .test_paths
            .iter()
            .map(|p| workdir.join(p))
            .filter(|p| p.exists())
            .collect();
        let patterns = self.mock_patterns.clone();
        let base = workdir.to_path_buf();

        let scan = tokio::task::spawn_blocking(move || {
            let mut issues = Vec::new();
            for root in roots {
                for path in walk_files(&root, None).filter(|p| is_source_file(p)) {
                    let Ok(content) = std::fs::read_to_string(&path) else {
                        continue;
                    };
                    let relative = path.strip_prefix(&base).unwrap_or(&path).to_path_buf();
                    for pattern in &patterns {
                        if let Some(m) = pattern.regex.find(&content) {
                            issues.push(
                                Issue::critical(
                                    IssueCategory::MockUsage,
                                    format!(
                                        "{} in {}: {}",
                                        pattern.name,
                                        relative.display(),
                                        m.as_str()
                                    ),
                                )
                                .with_subject(pattern.name)
                                .with_file(relative.clone()),
                            );
                        }
                    }
                }
            }
            issues
        });

        match scan.await {
            Ok(issues) => issues,
            Err(e) => {
                warn!(error = %e, "Mock scan failed");
                Vec::new()
            }
        }
    }

    /// Merge repeated observations and score each test.
    fn score_tests(&self, executions: &[SuiteExecution], issues: &mut Vec<Issue>) -> Vec<TestRunResult> {
        let runs = executions.len();
        let mut order: Vec<&str> = Vec::new();
        let mut observed: HashMap<&str, Vec<&ObservedTest>> = HashMap::new();
        for execution in executions {
            for test in &execution.tests {
                let entry = observed.entry(test.name.as_str()).or_default();
                if entry.is_empty() {
                    order.push(test.name.as_str());
                }
                entry.push(test);
            }
        }

        let mut results: Vec<TestRunResult> = order
            .iter()
            .map(|name| {
                let observations = &observed[name];
                let kind = observations
                    .iter()
                    .find_map(|o| o.kind)
                    .unwrap_or_else(|| OperationKind::infer(name));
                // A test missing from any run counts as failed
                let passed = observations.len() == runs && observations.iter().all(|o| o.passed);

                let mut result = TestRunResult::new(*name, kind, passed);
                result.run_durations = observations.iter().map(|o| o.duration_secs).collect();
                result.duration_secs =
                    result.run_durations.iter().sum::<f64>() / result.run_durations.len() as f64;
                result.evidence = observations
                    .iter()
                    .flat_map(|o| o.evidence.iter())
                    .map(|(k, v)| (k.clone(), v.clone()))
                    .collect::<BTreeMap<_, _>>();
                result
            })
            .collect();

        let perfect_batch = results.len() >= self.config.perfect_pass_min_tests
            && results.iter().all(|r| r.passed);

        for result in &mut results {
            self.apply_penalties(result, perfect_batch, issues);
            if result.confidence < self.config.cross_examination_threshold {
                self.cross_examine(result, issues);
            }
            debug!(test = %result.name, kind = %result.kind, confidence = result.confidence, fake = result.fake, "Scored test");
        }

        results
    }

    fn apply_penalties(&self, result: &mut TestRunResult, perfect_batch: bool, issues: &mut Vec<Issue>) {
        let penalties = &self.config.penalties;
        let interacts = result.kind.expects_interaction();

        if interacts && !EVIDENCE_KEYS.iter().any(|k| result.evidence.contains_key(*k)) {
            result.penalize(
                format!("no interaction evidence for a {} test", result.kind),
                penalties.missing_evidence,
            );
        }

        if let Some(floor) = self.floor_for(result.kind) {
            if result.duration_secs < floor {
                result.penalize(
                    format!(
                        "mean duration {:.4}s below the {:.3}s floor for {} tests",
                        result.duration_secs, floor, result.kind
                    ),
                    penalties.below_floor,
                );
                issues.push(
                    Issue::warning(
                        IssueCategory::SuspiciousTiming,
                        format!(
                            "{} took {:.4}s, below the {:.3}s floor for {} operations",
                            result.name, result.duration_secs, floor, result.kind
                        ),
                    )
                    .with_subject(result.name.clone()),
                );
            }
        }

        if interacts
            && result.run_durations.len() >= 3
            && coefficient_of_variation(&result.run_durations) < self.config.uniformity_cv
        {
            result.penalize(
                "near-identical timings across repeated runs",
                penalties.uniform_timing,
            );
        }

        if perfect_batch {
            result.penalize("perfect pass rate across a large batch", penalties.perfect_pass_rate);
        }
    }

    fn cross_examine(&self, result: &mut TestRunResult, issues: &mut Vec<Issue>) {
        for q in questions_for(result.kind) {
            if !result.evidence.contains_key(q.evidence_key) {
                result.unanswered.push(q.text.to_string());
                result.penalize(
                    format!("unanswered: {}", q.text),
                    self.config.penalties.unanswered_question,
                );
            }
        }

        if !result.unanswered.is_empty() {
            result.fake = true;
            issues.push(
                Issue::critical(
                    IssueCategory::FakeResult,
                    format!(
                        "{} could not answer: {}",
                        result.name,
                        result.unanswered.join(" ")
                    ),
                )
                .with_subject(result.name.clone()),
            );
        }
    }

    fn check_outcomes(&self, executions: &[SuiteExecution], tests: &[TestRunResult], issues: &mut Vec<Issue>) {
        if tests.is_empty() {
            issues.push(
                Issue::critical(IssueCategory::ExecutionError, "no tests were discovered")
                    .with_subject("no_tests"),
            );
            return;
        }

        let failing: Vec<&str> = tests
            .iter()
            .filter(|t| !t.passed)
            .map(|t| t.name.as_str())
            .collect();
        if !failing.is_empty() {
            issues.push(
                Issue::critical(
                    IssueCategory::ExecutionError,
                    format!("{} test(s) failed: {}", failing.len(), failing.join(", ")),
                )
                .with_subject("failing_tests"),
            );
        } else if executions.iter().any(|e| !e.exit_success) {
            issues.push(
                Issue::critical(
                    IssueCategory::ExecutionError,
                    "test command exited unsuccessfully although every test passed",
                )
                .with_subject("exit_status"),
            );
        }
    }

    /// Run the battery. A battery that cannot run through the project's
    /// harness raises a blocking issue instead of counting as clean.
    async fn run_honeypots(&self, project: &Project, workdir: &Path, issues: &mut Vec<Issue>) -> Vec<HoneypotResult> {
        let battery = Honeypot::battery();
        let budget = Duration::from_secs(self.config.test_timeout_secs);
        let outcome = match tokio::time::timeout(budget, self.runner.run_honeypots(project, workdir, &battery)).await {
            Ok(outcome) => outcome,
            Err(_) => Err(anyhow::anyhow!(
                "honeypot battery exceeded {}s timeout",
                self.config.test_timeout_secs
            )),
        };

        match outcome {
            Ok(results) => {
                for breach in results.iter().filter(|r| r.passed) {
                    warn!(project = %project.id, honeypot = %breach.name, "Honeypot passed");
                }
                results
            }
            Err(e) => {
                warn!(project = %project.id, error = %e, "Honeypot battery did not run");
                issues.push(
                    Issue::critical(
                        IssueCategory::ExecutionError,
                        format!("honeypot battery could not run through the test harness: {e:#}"),
                    )
                    .with_subject("honeypots"),
                );
                Vec::new()
            }
        }
    }

    /// Mean of test confidences, rounded.
    fn run_confidence(tests: &[TestRunResult]) -> u8 {
        if tests.is_empty() {
            return 0;
        }
        let sum: u32 = tests.iter().map(|t| u32::from(t.confidence)).sum();
        let mean = (f64::from(sum) / tests.len() as f64).round();
        mean.clamp(0.0, 100.0) as u8
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use async_trait::async_trait;
    use std::sync::Mutex;

    /// Replays scripted executions and honeypot outcomes.
    struct ScriptedRunner {
        executions: Mutex<Vec<SuiteExecution>>,
        breach: Option<&'static str>,
        harnessless: bool,
    }

    impl ScriptedRunner {
        fn repeating(execution: SuiteExecution, runs: usize) -> Self {
            Self {
                executions: Mutex::new(vec![execution; runs]),
                breach: None,
                harnessless: false,
            }
        }
    }

    #[async_trait]
    impl TestRunner for ScriptedRunner {
        async fn run_suite(&self, _project: &Project, _workdir: &Path) -> Result<SuiteExecution> {
            let mut executions = self.executions.lock().unwrap();
            if executions.is_empty() {
                anyhow::bail!("no such file or directory: pytest");
            }
            Ok(executions.remove(0))
        }

        async fn run_honeypots(
            &self,
            _project: &Project,
            _workdir: &Path,
            battery: &[Honeypot],
        ) -> Result<Vec<HoneypotResult>> {
            if self.harnessless {
                anyhow::bail!("no harness-level honeypot for `npm test`");
            }
            Ok(battery
                .iter()
                .map(|honeypot| {
                    if self.breach == Some(honeypot.name.as_str()) {
                        HoneypotResult::passed(honeypot, "reported as passing")
                    } else {
                        HoneypotResult::failed(honeypot, "failed as expected")
                    }
                })
                .collect())
        }

        async fn check_interface(&self, _project: &Project, _workdir: &Path) -> Result<Option<bool>> {
            Ok(None)
        }
    }

    fn test(name: &str, kind: OperationKind, secs: f64, evidence: &[(&str, &str)]) -> ObservedTest {
        ObservedTest {
            name: name.into(),
            passed: true,
            duration_secs: secs,
            kind: Some(kind),
            evidence: evidence
                .iter()
                .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
                .collect(),
        }
    }

    fn execution(tests: Vec<ObservedTest>) -> SuiteExecution {
        SuiteExecution {
            tests,
            exit_success: true,
            wall_time_secs: 1.0,
            output: String::new(),
        }
    }

    fn auditor(runner: ScriptedRunner) -> AuthenticityAuditor {
        AuthenticityAuditor::new(Arc::new(runner), AuditConfig::default())
    }

    #[test]
    fn test_coefficient_of_variation() {
        assert!(coefficient_of_variation(&[1.0, 1.0, 1.0]) < 1e-12);
        assert!(coefficient_of_variation(&[0.1, 0.2, 0.3]) > 0.3);
        assert!(coefficient_of_variation(&[]).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn test_genuine_suite_passes_at_full_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("a", dir.path());
        let runner = ScriptedRunner {
            executions: Mutex::new(vec![
                execution(vec![
                    test("test_fetch_user", OperationKind::Network, 0.12, &[("latency_ms", "118"), ("status_code", "200")]),
                    test("test_add", OperationKind::Unit, 0.001, &[]),
                ]),
                execution(vec![
                    test("test_fetch_user", OperationKind::Network, 0.15, &[("latency_ms", "149"), ("status_code", "200")]),
                    test("test_add", OperationKind::Unit, 0.001, &[]),
                ]),
                execution(vec![
                    test("test_fetch_user", OperationKind::Network, 0.09, &[("latency_ms", "88"), ("status_code", "200")]),
                    test("test_add", OperationKind::Unit, 0.001, &[]),
                ]),
            ]),
            breach: None,
            harnessless: false,
        };

        let report = auditor(runner).audit(&project, dir.path(), 3).await;

        assert!(report.passed, "{:?}", report.issues);
        assert_eq!(report.confidence, 100);
        assert_eq!(report.honeypots.len(), 4);
        assert!(report.issues.is_empty());
    }

    #[tokio::test]
    async fn test_instant_network_test_is_cross_examined_and_fake() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("a", dir.path());
        let runner = ScriptedRunner::repeating(
            execution(vec![test("test_http_get", OperationKind::Network, 0.001, &[])]),
            3,
        );

        let report = auditor(runner).audit(&project, dir.path(), 3).await;
        let result = &report.tests[0];

        // 100 - 20 (evidence) - 30 (floor) - 15 (uniform) - 2 x 10 (questions)
        assert_eq!(result.confidence, 15);
        assert!(result.fake);
        assert_eq!(result.unanswered.len(), 2);
        assert!(report.collapsed);
        assert!(!report.passed);
        assert!(report
            .issues
            .iter()
            .any(|i| i.category == IssueCategory::FakeResult));
        assert!(report
            .issues
            .iter()
            .any(|i| i.category == IssueCategory::SuspiciousTiming));
    }

    #[tokio::test]
    async fn test_honeypot_breach_voids_confidence() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("c", dir.path());
        let mut runner = ScriptedRunner::repeating(
            execution(vec![test("test_add", OperationKind::Unit, 0.001, &[])]),
            1,
        );
        runner.breach = Some("test_impossible_assertion");

        let report = auditor(runner).audit(&project, dir.path(), 1).await;

        assert!(report.voided);
        assert!(report.violation(&project.id).is_some());
        assert_eq!(report.confidence, 0);
        assert!(report.tests.iter().all(|t| t.confidence == 0));
        assert!(!report.passed);
        assert!(report
            .issues
            .iter()
            .any(|i| i.category == IssueCategory::HoneypotPassed));
    }

    #[tokio::test]
    async fn test_launch_failure_is_execution_issue() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("e", dir.path());
        let runner = ScriptedRunner {
            executions: Mutex::new(Vec::new()),
            breach: None,
            harnessless: false,
        };

        let report = auditor(runner).audit(&project, dir.path(), 3).await;
        assert!(!report.passed);
        assert!(report.violation(&project.id).is_none());
        assert_eq!(report.issues[0].category, IssueCategory::ExecutionError);
        assert!(report.issues[0]
            .evidence
            .starts_with("Execution error for project e: failed to launch test suite"));
    }

    #[tokio::test]
    async fn test_missing_module_and_mocks_detected() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("tests")).unwrap();
        std::fs::write(
            dir.path().join("tests/test_api.py"),
            "from unittest.mock import MagicMock\n",
        )
        .unwrap();
        let project = Project::new("b", dir.path());
        let mut failed = execution(vec![ObservedTest {
            passed: false,
            ..test("test_load", OperationKind::Unit, 0.01, &[])
        }]);
        failed.exit_success = false;
        failed.output = "E   ModuleNotFoundError: No module named 'yaml'\n".into();
        let runner = ScriptedRunner::repeating(failed, 1);

        let report = auditor(runner).audit(&project, dir.path(), 1).await;

        let missing = report
            .issues
            .iter()
            .find(|i| i.category == IssueCategory::MissingDependency)
            .unwrap();
        assert_eq!(missing.subject.as_deref(), Some("yaml"));
        let mocks: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.category == IssueCategory::MockUsage)
            .collect();
        assert!(!mocks.is_empty());
        assert!(mocks.iter().all(|i| i.is_blocking()));
        assert!(!report.passed);
    }

    #[tokio::test]
    async fn test_perfect_large_batch_penalty() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("a", dir.path());
        let tests: Vec<_> = (0..20)
            .map(|i| test(&format!("test_case_{i}"), OperationKind::Unit, 0.001, &[]))
            .collect();
        let runner = ScriptedRunner::repeating(execution(tests), 1);

        let report = auditor(runner).audit(&project, dir.path(), 1).await;
        assert_eq!(report.confidence, 95);
        assert!(report.passed);
    }

    #[tokio::test]
    async fn test_battery_without_harness_blocks_pass() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("a", dir.path());
        let mut runner = ScriptedRunner::repeating(
            execution(vec![test("test_add", OperationKind::Unit, 0.001, &[])]),
            1,
        );
        runner.harnessless = true;

        let report = auditor(runner).audit(&project, dir.path(), 1).await;

        assert_eq!(report.confidence, 100);
        assert!(report.honeypots.is_empty());
        assert!(!report.passed);
        let issue = report
            .issues
            .iter()
            .find(|i| i.subject.as_deref() == Some("honeypots"))
            .unwrap();
        assert!(issue.is_blocking());
        assert!(issue.evidence.contains("could not run through the test harness"));
    }

    #[tokio::test]
    async fn test_rust_path_keywords_are_not_dependencies() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("r", dir.path());
        let mut failed = execution(vec![]);
        failed.exit_success = false;
        failed.output = "error[E0432]: unresolved import `crate::config`\n\
                         error[E0432]: unresolved import `super::util`\n\
                         error[E0432]: unresolved import `self::inner`\n\
                         error[E0432]: unresolved import `serde_yaml`\n"
            .into();
        let runner = ScriptedRunner::repeating(failed, 1);

        let report = auditor(runner).audit(&project, dir.path(), 1).await;

        let missing: Vec<_> = report
            .issues
            .iter()
            .filter(|i| i.category == IssueCategory::MissingDependency)
            .filter_map(|i| i.subject.as_deref())
            .collect();
        assert_eq!(missing, vec!["serde_yaml"]);
    }

    #[tokio::test]
    async fn test_dependency_preflight_reports_only_missing_modules() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("b", dir.path());
        let mut failed = execution(vec![ObservedTest {
            passed: false,
            ..test("test_load", OperationKind::Unit, 0.01, &[])
        }]);
        failed.exit_success = false;
        failed.output = "E   ModuleNotFoundError: No module named 'yaml'\n".into();
        let auditor = auditor(ScriptedRunner::repeating(failed, 1));

        let issues = auditor.detect_missing_dependencies(&project, dir.path()).await;
        assert_eq!(issues.len(), 1);
        assert_eq!(issues[0].category, IssueCategory::MissingDependency);
        assert_eq!(issues[0].subject.as_deref(), Some("yaml"));

        // The scripted runner is exhausted now, so the suite cannot launch
        assert!(auditor
            .detect_missing_dependencies(&project, dir.path())
            .await
            .is_empty());
    }
}
