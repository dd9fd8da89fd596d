//! Test runner that shells out to each project's configured commands.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::LazyLock;
use std::time::Instant;

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use regex::Regex;
use serde::Deserialize;
use tokio::process::Command;
use tracing::{debug, instrument, warn};

use crate::domain::models::{
    Honeypot, HoneypotKind, HoneypotResult, ObservedTest, Project, SuiteExecution,
};
use crate::domain::ports::TestRunner;

/// Kept tail of combined test output.
const MAX_OUTPUT_BYTES: usize = 64 * 1024;

/// TEST-NET-1 address; never routable.
const UNREACHABLE_HOST: &str = "192.0.2.1";
const UNREACHABLE_PORT: u16 = 9;

static CARGO_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^test (\S+) \.\.\. (ok|FAILED|ignored)").expect("cargo result pattern is valid")
});

static PYTEST_RESULT: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"^(\S+::\S+)\s+(PASSED|FAILED|ERROR|SKIPPED|XFAIL|XPASS)")
        .expect("pytest result pattern is valid")
});

static EVIDENCE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\b(latency_ms|status_code|rows_affected|bytes_written)\s*[=:]\s*([\w.\-]+)")
        .expect("evidence pattern is valid")
});

/// Structured results file: either a bare list or `{"tests": [...]}`.
#[derive(Deserialize)]
#[serde(untagged)]
enum ResultsFile {
    Wrapped { tests: Vec<ObservedTest> },
    Bare(Vec<ObservedTest>),
}

impl ResultsFile {
    fn into_tests(self) -> Vec<ObservedTest> {
        match self {
            Self::Wrapped { tests } | Self::Bare(tests) => tests,
        }
    }
}

/// Parse `cargo test` and `pytest -v` result lines.
///
/// `key=value` evidence lines are attached to the next reported test.
/// Per-test durations are not printed by either tool, so `wall_time_secs`
/// is split evenly across the tests found.
pub fn parse_test_output(output: &str, wall_time_secs: f64) -> Vec<ObservedTest> {
    let mut tests = Vec::new();
    let mut pending: BTreeMap<String, String> = BTreeMap::new();

    for line in output.lines() {
        let line = line.trim_end();
        for caps in EVIDENCE.captures_iter(line) {
            pending.insert(caps[1].to_string(), caps[2].to_string());
        }

        let (name, outcome) = if let Some(caps) = CARGO_RESULT.captures(line) {
            (caps[1].to_string(), caps[2].to_string())
        } else if let Some(caps) = PYTEST_RESULT.captures(line) {
            (caps[1].to_string(), caps[2].to_string())
        } else {
            continue;
        };

        let passed = match outcome.as_str() {
            "ok" | "PASSED" | "XFAIL" => true,
            "FAILED" | "ERROR" | "XPASS" => false,
            _ => {
                pending.clear();
                continue;
            }
        };
        tests.push(ObservedTest {
            name,
            passed,
            duration_secs: 0.0,
            kind: None,
            evidence: std::mem::take(&mut pending),
        });
    }

    if !tests.is_empty() {
        let share = wall_time_secs / tests.len() as f64;
        for test in &mut tests {
            test.duration_secs = share;
        }
    }
    tests
}

fn tail(output: String) -> String {
    if output.len() <= MAX_OUTPUT_BYTES {
        return output;
    }
    let mut start = output.len() - MAX_OUTPUT_BYTES;
    while !output.is_char_boundary(start) {
        start += 1;
    }
    output[start..].to_string()
}

/// A test harness the honeypot battery can be planted into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Harness {
    Pytest,
    Cargo,
}

impl Harness {
    fn detect(test_command: &[String]) -> Option<Self> {
        let joined = test_command.join(" ");
        if joined.contains("pytest") {
            Some(Self::Pytest)
        } else if joined.contains("cargo") {
            Some(Self::Cargo)
        } else {
            None
        }
    }

    /// Directory, relative to the project, that the harness collects tests from.
    fn directory(self, project: &Project) -> PathBuf {
        match self {
            Self::Pytest => project
                .test_paths
                .first()
                .cloned()
                .unwrap_or_else(|| PathBuf::from("tests")),
            Self::Cargo => PathBuf::from("tests"),
        }
    }

    fn file_name(self) -> &'static str {
        match self {
            Self::Pytest => "test_ecoverify_honeypots.py",
            Self::Cargo => "ecoverify_honeypots.rs",
        }
    }

    fn source(self, battery: &[Honeypot]) -> String {
        let mut out = String::from(match self {
            Self::Pytest => "import random\nimport socket\nimport time\n",
            Self::Cargo => {
                "use std::collections::hash_map::RandomState;\n\
                 use std::hash::{BuildHasher, Hasher};\n\
                 use std::time::{Duration, Instant};\n"
            }
        });
        for honeypot in battery {
            let body = match (self, honeypot.kind) {
                (Self::Pytest, HoneypotKind::ContradictoryAssertion) => {
                    "\n\ndef {name}():\n    assert 1 == 2\n"
                }
                (Self::Pytest, HoneypotKind::UnreachableNetwork) => {
                    "\n\ndef {name}():\n    socket.create_connection((\"{host}\", {port}), timeout=2).close()\n"
                }
                (Self::Pytest, HoneypotKind::ImpossibleTiming) => {
                    "\n\ndef {name}():\n    started = time.perf_counter()\n    time.sleep(0.2)\n    \
                     assert time.perf_counter() - started < 0.01\n"
                }
                (Self::Pytest, HoneypotKind::PerfectAccuracy) => {
                    "\n\ndef {name}():\n    labels = [random.random() < 0.5 for _ in range(128)]\n    \
                     assert sum(labels) == 128\n"
                }
                (Self::Cargo, HoneypotKind::ContradictoryAssertion) => {
                    "\n#[test]\nfn {name}() {\n    assert_eq!(1, 2);\n}\n"
                }
                (Self::Cargo, HoneypotKind::UnreachableNetwork) => {
                    "\n#[test]\nfn {name}() {\n    let target = \"{host}:{port}\".parse().unwrap();\n    \
                     std::net::TcpStream::connect_timeout(&target, Duration::from_secs(2)).unwrap();\n}\n"
                }
                (Self::Cargo, HoneypotKind::ImpossibleTiming) => {
                    "\n#[test]\nfn {name}() {\n    let started = Instant::now();\n    \
                     std::thread::sleep(Duration::from_millis(200));\n    \
                     assert!(started.elapsed() < Duration::from_millis(10));\n}\n"
                }
                (Self::Cargo, HoneypotKind::PerfectAccuracy) => {
                    "\n#[test]\nfn {name}() {\n    let correct = (0..128u32)\n        .filter(|i| {\n            \
                     let mut hasher = RandomState::new().build_hasher();\n            \
                     hasher.write_u32(*i);\n            hasher.finish() & 1 == 1\n        })\n        \
                     .count();\n    assert_eq!(correct, 128);\n}\n"
                }
            };
            out.push_str(
                &body
                    .replace("{name}", &honeypot.name)
                    .replace("{host}", UNREACHABLE_HOST)
                    .replace("{port}", &UNREACHABLE_PORT.to_string()),
            );
        }
        out
    }
}

/// Whether a reported test name refers to `honeypot`.
fn reports_honeypot(test_name: &str, honeypot: &Honeypot) -> bool {
    test_name.rsplit("::").next() == Some(honeypot.name.as_str())
}

/// Runs tests, honeypots and interface checks as child processes.
#[derive(Debug, Clone, Default)]
pub struct ShellTestRunner;

impl ShellTestRunner {
    pub fn new() -> Self {
        Self
    }

    fn command(argv: &[String], workdir: &Path) -> Result<Command> {
        let Some((program, args)) = argv.split_first() else {
            bail!("empty command");
        };
        let mut cmd = Command::new(program);
        cmd.args(args)
            .current_dir(workdir)
            .stdin(Stdio::null())
            .kill_on_drop(true);
        Ok(cmd)
    }

    async fn read_results_file(&self, path: &Path) -> Result<Vec<ObservedTest>> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read results file {}", path.display()))?;
        let parsed: ResultsFile = serde_json::from_str(&content)
            .with_context(|| format!("Malformed results file {}", path.display()))?;
        Ok(parsed.into_tests())
    }

    /// Run each honeypot through the project's honeypot command template.
    async fn run_templated(
        &self,
        template: &[String],
        workdir: &Path,
        battery: &[Honeypot],
    ) -> Result<Vec<HoneypotResult>> {
        let mut results = Vec::with_capacity(battery.len());
        for honeypot in battery {
            let argv: Vec<String> = template
                .iter()
                .map(|arg| arg.replace("{name}", &honeypot.name))
                .collect();
            let status = Self::command(&argv, workdir)?
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .status()
                .await
                .with_context(|| format!("Failed to run honeypot {}", honeypot.name))?;
            let detail = format!("`{}` exited with {status}", argv.join(" "));
            results.push(if status.success() {
                HoneypotResult::passed(honeypot, detail)
            } else {
                HoneypotResult::failed(honeypot, detail)
            });
        }
        Ok(results)
    }

    /// Plant the battery as test files, run the project's own suite, then
    /// remove the files again.
    async fn run_planted(
        &self,
        project: &Project,
        workdir: &Path,
        battery: &[Honeypot],
    ) -> Result<Vec<HoneypotResult>> {
        let harness = Harness::detect(&project.test_command).with_context(|| {
            format!(
                "no harness-level honeypot for `{}`; configure honeypot_command",
                project.test_command.join(" ")
            )
        })?;

        let dir = workdir.join(harness.directory(project));
        let created_dir = !dir.exists();
        tokio::fs::create_dir_all(&dir)
            .await
            .with_context(|| format!("Failed to create {}", dir.display()))?;
        let file = dir.join(harness.file_name());
        tokio::fs::write(&file, harness.source(battery))
            .await
            .with_context(|| format!("Failed to write {}", file.display()))?;
        debug!(file = %file.display(), ?harness, "Planted honeypot battery");

        let execution = self.run_suite(project, workdir).await;

        if let Err(e) = tokio::fs::remove_file(&file).await {
            warn!(file = %file.display(), error = %e, "Failed to remove honeypot battery");
        }
        if created_dir {
            if let Err(e) = tokio::fs::remove_dir(&dir).await {
                debug!(dir = %dir.display(), error = %e, "Left honeypot directory in place");
            }
        }
        let execution = execution.context("Honeypot battery run failed")?;

        let mut reported = 0;
        let results: Vec<HoneypotResult> = battery
            .iter()
            .map(|honeypot| {
                match execution
                    .tests
                    .iter()
                    .find(|t| reports_honeypot(&t.name, honeypot))
                {
                    Some(test) if test.passed => {
                        reported += 1;
                        HoneypotResult::passed(honeypot, format!("{} reported as passing", test.name))
                    }
                    Some(test) => {
                        reported += 1;
                        HoneypotResult::failed(honeypot, format!("{} failed", test.name))
                    }
                    None => HoneypotResult::failed(honeypot, "not reported by the test harness"),
                }
            })
            .collect();

        if reported == 0 {
            bail!(
                "the test harness reported none of the planted honeypots; \
                 make it list test outcomes or configure honeypot_command"
            );
        }
        Ok(results)
    }
}

#[async_trait]
impl TestRunner for ShellTestRunner {
    #[instrument(skip(self, project), fields(project = %project.id))]
    async fn run_suite(&self, project: &Project, workdir: &Path) -> Result<SuiteExecution> {
        if project.test_command.is_empty() {
            bail!("no test command configured for {}", project.id);
        }
        let started = Instant::now();
        let output = Self::command(&project.test_command, workdir)?
            .output()
            .await
            .with_context(|| format!("Failed to launch `{}`", project.test_command.join(" ")))?;
        let wall_time_secs = started.elapsed().as_secs_f64();

        let mut combined = String::from_utf8_lossy(&output.stdout).into_owned();
        combined.push_str(&String::from_utf8_lossy(&output.stderr));

        let tests = match &project.results_file {
            Some(file) => match self.read_results_file(&workdir.join(file)).await {
                Ok(tests) => tests,
                Err(e) => {
                    warn!(error = %e, "Falling back to parsing test output");
                    parse_test_output(&combined, wall_time_secs)
                }
            },
            None => parse_test_output(&combined, wall_time_secs),
        };

        debug!(tests = tests.len(), exit = ?output.status.code(), wall_time_secs, "Suite finished");
        Ok(SuiteExecution {
            tests,
            exit_success: output.status.success(),
            wall_time_secs,
            output: tail(combined),
        })
    }

    #[instrument(skip(self, project, battery), fields(project = %project.id))]
    async fn run_honeypots(
        &self,
        project: &Project,
        workdir: &Path,
        battery: &[Honeypot],
    ) -> Result<Vec<HoneypotResult>> {
        match &project.honeypot_command {
            Some(template) => self.run_templated(template, workdir, battery).await,
            None => self.run_planted(project, workdir, battery).await,
        }
    }

    async fn check_interface(&self, project: &Project, workdir: &Path) -> Result<Option<bool>> {
        let Some(argv) = &project.interface_check else {
            return Ok(None);
        };
        let status = Self::command(argv, workdir)?
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .with_context(|| format!("Failed to run interface check for {}", project.id))?;
        Ok(Some(status.success()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_cargo_output() {
        let output = "running 3 tests\n\
                      latency_ms=12 status_code=200\n\
                      test api::fetch ... ok\n\
                      test util::parse ... FAILED\n\
                      test slow::thing ... ignored\n";
        let tests = parse_test_output(output, 2.0);
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].name, "api::fetch");
        assert!(tests[0].passed);
        assert_eq!(tests[0].evidence.get("status_code").map(String::as_str), Some("200"));
        assert!(!tests[1].passed);
        assert!(tests[1].evidence.is_empty());
        assert!((tests[0].duration_secs - 1.0).abs() < f64::EPSILON);
    }

    #[test]
    fn test_parse_pytest_output() {
        let output = "tests/test_db.py::test_insert PASSED  [ 50%]\n\
                      tests/test_db.py::test_delete ERROR   [100%]\n";
        let tests = parse_test_output(output, 1.0);
        assert_eq!(tests.len(), 2);
        assert_eq!(tests[0].name, "tests/test_db.py::test_insert");
        assert!(tests[0].passed);
        assert!(!tests[1].passed);
    }

    #[test]
    fn test_results_file_shapes() {
        let wrapped = r#"{"tests": [{"name": "a", "passed": true, "duration_secs": 0.2}]}"#;
        let bare = r#"[{"name": "a", "passed": false, "duration_secs": 0.2, "kind": "network"}]"#;
        let wrapped: ResultsFile = serde_json::from_str(wrapped).unwrap();
        let bare: ResultsFile = serde_json::from_str(bare).unwrap();
        assert!(wrapped.into_tests()[0].passed);
        assert!(!bare.into_tests()[0].passed);
    }

    #[test]
    fn test_tail_keeps_end() {
        let long = "x".repeat(MAX_OUTPUT_BYTES + 10) + "END";
        let kept = tail(long);
        assert_eq!(kept.len(), MAX_OUTPUT_BYTES);
        assert!(kept.ends_with("END"));
    }

    #[tokio::test]
    async fn test_run_suite_without_command_is_launch_failure() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("p", dir.path());
        assert!(ShellTestRunner::new().run_suite(&project, dir.path()).await.is_err());
    }

    #[tokio::test]
    async fn test_run_suite_and_interface_check() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = Project::new("p", dir.path()).with_test_command(&[
            "sh",
            "-c",
            "echo 'test unit::adds ... ok'",
        ]);
        project.interface_check = Some(vec!["sh".into(), "-c".into(), "exit 1".into()]);
        let runner = ShellTestRunner::new();

        let execution = runner.run_suite(&project, dir.path()).await.unwrap();
        assert!(execution.exit_success);
        assert_eq!(execution.tests.len(), 1);
        assert_eq!(
            runner.check_interface(&project, dir.path()).await.unwrap(),
            Some(false)
        );
    }

    fn pytest_shim(script: &str) -> Vec<String> {
        // `$0` is `pytest`, which selects the pytest harness
        vec!["sh".into(), "-c".into(), script.into(), "pytest".into()]
    }

    #[tokio::test]
    async fn test_planted_battery_detects_compromised_harness() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = Project::new("p", dir.path());
        project.test_command = pytest_shim(
            "test -f tests/test_ecoverify_honeypots.py || exit 3\n\
             grep -q 'assert 1 == 2' tests/test_ecoverify_honeypots.py || exit 4\n\
             echo 'tests/test_ecoverify_honeypots.py::test_impossible_assertion PASSED'\n\
             echo 'tests/test_ecoverify_honeypots.py::test_impossible_timing FAILED'",
        );
        let battery = Honeypot::battery();

        let results = ShellTestRunner::new()
            .run_honeypots(&project, dir.path(), &battery)
            .await
            .unwrap();

        assert_eq!(results.len(), battery.len());
        let by_name = |name: &str| results.iter().find(|r| r.name == name).unwrap();
        assert!(by_name("test_impossible_assertion").passed);
        assert!(!by_name("test_impossible_timing").passed);
        assert!(!by_name("test_perfect_accuracy_claim").passed);
        assert!(by_name("test_perfect_accuracy_claim").detail.contains("not reported"));
        // The planted file and the directory created for it are gone
        assert!(!dir.path().join("tests").exists());
    }

    #[tokio::test]
    async fn test_planted_battery_in_honest_harness() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("tests")).unwrap();
        let mut project = Project::new("p", dir.path());
        project.test_command = pytest_shim(
            "for name in test_impossible_assertion test_unreachable_network_target \
             test_impossible_timing test_perfect_accuracy_claim; do \
             echo \"tests/test_ecoverify_honeypots.py::$name FAILED\"; done",
        );

        let results = ShellTestRunner::new()
            .run_honeypots(&project, dir.path(), &Honeypot::battery())
            .await
            .unwrap();

        assert!(results.iter().all(|r| !r.passed));
        assert!(dir.path().join("tests").is_dir());
        assert!(!dir.path().join("tests/test_ecoverify_honeypots.py").exists());
    }

    #[tokio::test]
    async fn test_battery_needs_a_known_harness_or_template() {
        let dir = tempfile::tempdir().unwrap();
        let project = Project::new("p", dir.path()).with_test_command(&["npm", "test"]);
        let err = ShellTestRunner::new()
            .run_honeypots(&project, dir.path(), &Honeypot::battery())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("honeypot_command"));

        // A harness that lists nothing cannot vouch for the battery either
        let mut silent = Project::new("p", dir.path());
        silent.test_command = pytest_shim("true");
        assert!(ShellTestRunner::new()
            .run_honeypots(&silent, dir.path(), &Honeypot::battery())
            .await
            .is_err());
    }

    #[test]
    fn test_generated_sources_name_every_honeypot() {
        let battery = Honeypot::battery();
        for harness in [Harness::Pytest, Harness::Cargo] {
            let source = harness.source(&battery);
            for honeypot in &battery {
                assert!(source.contains(&format!("{}()", honeypot.name)), "{harness:?}");
            }
            assert!(source.contains(UNREACHABLE_HOST));
            assert!(!source.contains("{name}"));
        }
        assert_eq!(
            Harness::detect(&["python".into(), "-m".into(), "pytest".into(), "-v".into()]),
            Some(Harness::Pytest)
        );
        assert_eq!(Harness::detect(&["cargo".into(), "test".into()]), Some(Harness::Cargo));
    }

    #[tokio::test]
    async fn test_honeypot_command_template() {
        let dir = tempfile::tempdir().unwrap();
        let mut project = Project::new("p", dir.path());
        project.honeypot_command = Some(vec![
            "sh".into(),
            "-c".into(),
            "test \"$0\" = test_impossible_timing".into(),
            "{name}".into(),
        ]);
        let results = ShellTestRunner::new()
            .run_honeypots(&project, dir.path(), &Honeypot::battery())
            .await
            .unwrap();
        let passed: Vec<_> = results.iter().filter(|r| r.passed).map(|r| r.kind).collect();
        assert_eq!(passed, vec![HoneypotKind::ImpossibleTiming]);
    }
}
