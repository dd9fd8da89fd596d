//! Common test utilities for integration tests
//!
//! In-memory version control, a scripted test runner and a scripted
//! escalation agent, plus fixture helpers shared by the scenario tests.

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap, VecDeque};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

use ecoverify::domain::models::{
    AgentRole, Config, FixProposal, Honeypot, HoneypotKind, HoneypotResult, ObservedTest,
    OperationKind, Project, SuiteExecution,
};
use ecoverify::domain::ports::{EscalationAgent, NegotiationContext, TestRunner, VersionControl};
use ecoverify::services::{
    AuthenticityAuditor, AutoFixEngine, EscalationCoordinator, Orchestrator, OrchestratorConfig,
    RunOptions, SafetyManager,
};

/// Create a temporary directory for test isolation
pub fn temp_dir() -> TempDir {
    tempfile::tempdir().expect("Failed to create temp dir")
}

/// Setup test logging
pub fn setup_test_logging() {
    use tracing_subscriber::fmt;

    let _ = fmt()
        .with_test_writer()
        .with_max_level(tracing::Level::DEBUG)
        .try_init();
}

/// Write `files` (relative path, content) below `root`.
pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (relative, content) in files {
        let path = root.join(relative);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create fixture directory");
        }
        std::fs::write(&path, content).expect("Failed to write fixture file");
    }
}

/// A project rooted in its own fresh directory with a `tests/` folder.
pub fn project_fixture(parent: &Path, id: &str) -> Project {
    let root = parent.join(id);
    write_files(&root, &[("tests/test_core.py", "def test_core():\n    assert 1 + 1 == 2\n")]);
    Project::new(id, root)
}

// -----------------------------------------------------------------------------
// Version control
// -----------------------------------------------------------------------------

#[derive(Default)]
struct VcsState {
    commits: HashMap<PathBuf, usize>,
    branches: BTreeSet<String>,
    tags: BTreeSet<String>,
    calls: Vec<String>,
}

/// In-memory version control: every project root is its own repository and
/// worktrees are plain copies of it.
#[derive(Default)]
pub struct FakeVcs {
    state: Mutex<VcsState>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    fn record(&self, call: String) {
        self.state.lock().unwrap().calls.push(call);
    }

    pub fn calls(&self) -> Vec<String> {
        self.state.lock().unwrap().calls.clone()
    }

    pub fn branches(&self) -> Vec<String> {
        self.state.lock().unwrap().branches.iter().cloned().collect()
    }

    pub fn merged(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| c.strip_prefix("merge ").map(str::to_string))
            .collect()
    }

    fn bump(&self, dir: &Path) -> String {
        let mut state = self.state.lock().unwrap();
        let count = state.commits.entry(dir.to_path_buf()).or_insert(0);
        *count += 1;
        format!("{}@{count}", dir.display())
    }
}

fn copy_tree(from: &Path, to: &Path) -> Result<()> {
    for entry in walkdir::WalkDir::new(from) {
        let entry = entry?;
        let relative = entry.path().strip_prefix(from)?;
        let target = to.join(relative);
        if entry.file_type().is_dir() {
            std::fs::create_dir_all(&target)?;
        } else {
            std::fs::copy(entry.path(), &target)
                .with_context(|| format!("copy {}", entry.path().display()))?;
        }
    }
    Ok(())
}

#[async_trait]
impl VersionControl for FakeVcs {
    async fn toplevel(&self, dir: &Path) -> Result<PathBuf> {
        anyhow::ensure!(dir.is_dir(), "{} is not a repository", dir.display());
        Ok(dir.to_path_buf())
    }

    async fn current_branch(&self, _repo: &Path) -> Result<String> {
        Ok("main".to_string())
    }

    async fn head_commit(&self, repo: &Path) -> Result<String> {
        let state = self.state.lock().unwrap();
        let count = state.commits.get(repo).copied().unwrap_or(0);
        Ok(format!("{}@{count}", repo.display()))
    }

    async fn is_dirty(&self, _dir: &Path) -> Result<bool> {
        Ok(false)
    }

    async fn commit_all(&self, dir: &Path, message: &str) -> Result<Option<String>> {
        self.record(format!("commit {message}"));
        Ok(Some(self.bump(dir)))
    }

    async fn create_tag(&self, _repo: &Path, tag: &str, _commit: &str) -> Result<()> {
        self.state.lock().unwrap().tags.insert(tag.to_string());
        Ok(())
    }

    async fn delete_tag(&self, _repo: &Path, tag: &str) -> Result<()> {
        self.state.lock().unwrap().tags.remove(tag);
        Ok(())
    }

    async fn add_worktree(&self, repo: &Path, path: &Path, branch: &str, _start: &str) -> Result<()> {
        copy_tree(repo, path)?;
        self.state.lock().unwrap().branches.insert(branch.to_string());
        self.record(format!("worktree {branch}"));
        Ok(())
    }

    async fn remove_worktree(&self, _repo: &Path, path: &Path) -> Result<()> {
        std::fs::remove_dir_all(path).with_context(|| format!("remove {}", path.display()))?;
        Ok(())
    }

    async fn merge_no_ff(&self, repo: &Path, branch: &str, _message: &str) -> Result<()> {
        self.bump(repo);
        self.record(format!("merge {branch}"));
        Ok(())
    }

    async fn delete_branch(&self, _repo: &Path, branch: &str) -> Result<()> {
        self.state.lock().unwrap().branches.remove(branch);
        Ok(())
    }

    async fn reset_hard(&self, _repo: &Path, commit: &str) -> Result<()> {
        self.record(format!("reset {commit}"));
        Ok(())
    }

    async fn reset_mixed(&self, _repo: &Path, commit: &str) -> Result<()> {
        self.record(format!("reset-mixed {commit}"));
        Ok(())
    }

    async fn list_branches(&self, _repo: &Path, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.branches.iter().filter(|b| b.starts_with(prefix)).cloned().collect())
    }

    async fn list_tags(&self, _repo: &Path, prefix: &str) -> Result<Vec<String>> {
        let state = self.state.lock().unwrap();
        Ok(state.tags.iter().filter(|t| t.starts_with(prefix)).cloned().collect())
    }
}

// -----------------------------------------------------------------------------
// Test runner
// -----------------------------------------------------------------------------

type SuiteFn = dyn Fn(&Project, &Path) -> SuiteExecution + Send + Sync;

/// Runner whose suite outcome is computed per project from the workdir.
#[derive(Default)]
pub struct FakeRunner {
    suites: HashMap<String, Box<SuiteFn>>,
    breaches: HashMap<String, HoneypotKind>,
    interfaces: HashMap<String, bool>,
    delay: Option<Duration>,
    suite_runs: AtomicUsize,
}

impl FakeRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn suite(
        mut self,
        project: &str,
        suite: impl Fn(&Project, &Path) -> SuiteExecution + Send + Sync + 'static,
    ) -> Self {
        self.suites.insert(project.to_string(), Box::new(suite));
        self
    }

    /// Make one honeypot pass for `project`.
    pub fn breach(mut self, project: &str, kind: HoneypotKind) -> Self {
        self.breaches.insert(project.to_string(), kind);
        self
    }

    pub fn interface(mut self, project: &str, callable: bool) -> Self {
        self.interfaces.insert(project.to_string(), callable);
        self
    }

    /// Sleep before every suite run.
    pub fn delay(mut self, delay: Duration) -> Self {
        self.delay = Some(delay);
        self
    }

    pub fn suite_runs(&self) -> usize {
        self.suite_runs.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl TestRunner for FakeRunner {
    async fn run_suite(&self, project: &Project, workdir: &Path) -> Result<SuiteExecution> {
        self.suite_runs.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        let suite = self
            .suites
            .get(project.id.as_str())
            .with_context(|| format!("no suite scripted for {}", project.id))?;
        Ok(suite(project, workdir))
    }

    async fn run_honeypots(
        &self,
        project: &Project,
        _workdir: &Path,
        battery: &[Honeypot],
    ) -> Result<Vec<HoneypotResult>> {
        let breach = self.breaches.get(project.id.as_str());
        Ok(battery
            .iter()
            .map(|honeypot| {
                if breach == Some(&honeypot.kind) {
                    HoneypotResult::passed(honeypot, "harness reported success")
                } else {
                    HoneypotResult::failed(honeypot, "failed as expected")
                }
            })
            .collect())
    }

    async fn check_interface(&self, project: &Project, _workdir: &Path) -> Result<Option<bool>> {
        Ok(self.interfaces.get(project.id.as_str()).copied())
    }
}

/// A unit test observation.
pub fn unit_test(name: &str, passed: bool) -> ObservedTest {
    ObservedTest {
        name: name.to_string(),
        passed,
        duration_secs: 0.01,
        kind: Some(OperationKind::Unit),
        evidence: Default::default(),
    }
}

/// Every named unit test passes.
pub fn passing_suite(names: &[&str]) -> SuiteExecution {
    SuiteExecution {
        tests: names.iter().map(|n| unit_test(n, true)).collect(),
        exit_success: true,
        wall_time_secs: 0.05,
        output: format!("{} passed", names.len()),
    }
}

/// Every named unit test fails with `output`.
pub fn failing_suite(names: &[&str], output: &str) -> SuiteExecution {
    SuiteExecution {
        tests: names.iter().map(|n| unit_test(n, false)).collect(),
        exit_success: false,
        wall_time_secs: 0.05,
        output: output.to_string(),
    }
}

// -----------------------------------------------------------------------------
// Escalation agent
// -----------------------------------------------------------------------------

/// Agent that answers from a script, one entry per round. Once the script
/// runs out the last answer repeats.
pub struct ScriptedAgent {
    script: Mutex<VecDeque<Vec<FixProposal>>>,
    last: Mutex<Vec<FixProposal>>,
    contexts: Mutex<Vec<(u32, f64)>>,
}

impl ScriptedAgent {
    pub fn new(script: Vec<Vec<FixProposal>>) -> Self {
        Self {
            script: Mutex::new(script.into()),
            last: Mutex::new(Vec::new()),
            contexts: Mutex::new(Vec::new()),
        }
    }

    /// `(round, temperature)` of every call.
    pub fn calls(&self) -> Vec<(u32, f64)> {
        self.contexts.lock().unwrap().clone()
    }
}

#[async_trait]
impl EscalationAgent for ScriptedAgent {
    fn role(&self) -> AgentRole {
        AgentRole::Primary
    }

    fn name(&self) -> &str {
        "scripted"
    }

    async fn propose_fixes(&self, ctx: &NegotiationContext, temperature: f64) -> Result<Vec<FixProposal>> {
        self.contexts.lock().unwrap().push((ctx.round, temperature));
        let next = self.script.lock().unwrap().pop_front();
        let mut last = self.last.lock().unwrap();
        if let Some(answer) = next {
            *last = answer;
        }
        Ok(last.clone())
    }
}

// -----------------------------------------------------------------------------
// Wiring
// -----------------------------------------------------------------------------

/// Everything a scenario needs to run a batch.
pub struct Harness {
    pub vcs: Arc<FakeVcs>,
    pub runner: Arc<FakeRunner>,
    pub orchestrator: Orchestrator,
    /// Keeps worktrees outside the project directories
    pub state: TempDir,
}

impl Harness {
    pub async fn run(&self, projects: Vec<Project>) -> ecoverify::BatchSummary {
        self.orchestrator
            .run(projects, CancellationToken::new())
            .await
            .expect("batch should run")
    }
}

pub struct HarnessBuilder {
    runner: FakeRunner,
    agent: Option<Arc<dyn EscalationAgent>>,
    options: RunOptions,
    timeout_secs: u64,
    config: Config,
}

impl HarnessBuilder {
    pub fn new(runner: FakeRunner) -> Self {
        let mut config = Config::default();
        config.audit.repeat_runs = 1;
        config.escalation.round_timeout_secs = 5;
        Self {
            runner,
            agent: None,
            options: RunOptions::default(),
            timeout_secs: 60,
            config,
        }
    }

    pub fn agent(mut self, agent: Arc<dyn EscalationAgent>) -> Self {
        self.agent = Some(agent);
        self
    }

    pub fn options(mut self, options: RunOptions) -> Self {
        self.options = options;
        self
    }

    pub fn timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self
    }

    pub fn build(self) -> Harness {
        let state = temp_dir();
        let vcs = Arc::new(FakeVcs::new());
        let runner = Arc::new(self.runner);
        let safety = Arc::new(SafetyManager::new(
            Arc::clone(&vcs) as Arc<dyn VersionControl>,
            self.config.vcs.clone(),
            state.path().to_path_buf(),
        ));
        let auditor = Arc::new(AuthenticityAuditor::new(
            Arc::clone(&runner) as Arc<dyn TestRunner>,
            self.config.audit.clone(),
        ));
        let mut coordinator = EscalationCoordinator::new(
            Arc::new(AutoFixEngine::default()),
            auditor,
            Arc::clone(&safety),
            self.config.escalation.clone(),
            self.config.remediation.clone(),
        )
        .with_max_rounds(self.config.max_rounds);
        if let Some(agent) = self.agent {
            coordinator = coordinator.with_agent(agent);
        }

        let orchestrator = Orchestrator::new(
            safety,
            Arc::new(coordinator),
            Arc::clone(&runner) as Arc<dyn TestRunner>,
            OrchestratorConfig {
                workers: 2,
                project_timeout_secs: self.timeout_secs,
                run: self.options,
            },
        );

        Harness {
            vcs,
            runner,
            orchestrator,
            state,
        }
    }
}
