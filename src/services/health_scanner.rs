//! Health Scanner
//!
//! Seeds a project's issue list before the first fix loop: missing test
//! directories, malformed structured config, suspicious import paths and
//! security smells. Missing dependencies surface later, from test output.

use anyhow::{Context, Result};
use regex::Regex;
use std::path::{Path, PathBuf};
use tracing::{debug, info, instrument};
use walkdir::{DirEntry, WalkDir};

use crate::domain::models::{HealthStatus, Issue, IssueCategory, Project};
use crate::services::strategies::config_syntax::ConfigFormat;

/// Directories never scanned.
const SKIPPED_DIRS: &[&str] = &[
    "node_modules",
    "target",
    "venv",
    "__pycache__",
    "dist",
    "build",
];

const SOURCE_EXTENSIONS: &[&str] = &["py", "js", "mjs", "cjs", "ts", "tsx", "jsx", "rs", "sh"];

/// Depth limit for the structured config scan.
const CONFIG_SCAN_DEPTH: usize = 3;

fn is_skipped(entry: &DirEntry) -> bool {
    if entry.depth() == 0 || !entry.file_type().is_dir() {
        return false;
    }
    let name = entry.file_name().to_string_lossy();
    name.starts_with('.') || SKIPPED_DIRS.contains(&name.as_ref())
}

/// Files under `root` (optionally limited in depth), skipping hidden and build directories.
pub(crate) fn walk_files(root: &Path, max_depth: Option<usize>) -> impl Iterator<Item = PathBuf> {
    let mut walker = WalkDir::new(root).follow_links(false);
    if let Some(depth) = max_depth {
        walker = walker.max_depth(depth);
    }
    walker
        .into_iter()
        .filter_entry(|e| !is_skipped(e))
        .filter_map(|e| e.ok())
        .filter(|e| e.file_type().is_file())
        .map(DirEntry::into_path)
}

pub(crate) fn is_source_file(path: &Path) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| SOURCE_EXTENSIONS.contains(&e))
}

/// A pattern that flags a security smell.
#[derive(Clone)]
struct SmellPattern {
    name: &'static str,
    regex: Regex,
}

#[derive(Clone)]
pub struct HealthScanner {
    smells: Vec<SmellPattern>,
    import_line: Regex,
    backslash_import: Regex,
    redundant_import: Regex,
}

impl Default for HealthScanner {
    fn default() -> Self {
        Self::new()
    }
}

impl HealthScanner {
    pub fn new() -> Self {
        let smell = |name, pattern: &str| SmellPattern {
            name,
            regex: Regex::new(pattern).expect("smell pattern is valid"),
        };
        Self {
            smells: vec![
                smell("dynamic eval", r"\beval\s*\("),
                smell("dynamic exec", r"\bexec\s*\("),
                smell("shell injection risk", r"shell\s*=\s*True"),
                smell("unsafe deserialization", r"pickle\.loads?\s*\(|yaml\.load\s*\([^)]*\)\s*$"),
                smell("disabled TLS verification", r"verify\s*=\s*False|rejectUnauthorized\s*:\s*false"),
                smell(
                    "hardcoded credential",
                    r#"(?i)\b(password|passwd|secret|api_key)\s*[:=]\s*["'][^"']{4,}["']"#,
                ),
            ],
            import_line: Regex::new(r#"^\s*(import\b|from\b|export\b.*\bfrom\b|.*\brequire\s*\()"#)
                .expect("import pattern is valid"),
            backslash_import: Regex::new(r#"['"][^'"]*\\[^'"]*['"]"#)
                .expect("backslash pattern is valid"),
            redundant_import: Regex::new(r#"['"](\./\./|[^'"]*/\./)[^'"]*['"]"#)
                .expect("redundant path pattern is valid"),
        }
    }

    /// Scan `workdir` (the project's isolated copy) and classify its health.
    #[instrument(skip(self, project), fields(project = %project.id))]
    pub async fn scan(&self, project: &Project, workdir: &Path) -> Result<(HealthStatus, Vec<Issue>)> {
        let mut issues = self.check_test_directories(project, workdir);

        let root = workdir.to_path_buf();
        let scanner = self.clone();
        let scanned = tokio::task::spawn_blocking(move || scanner.scan_files(&root))
            .await
            .context("Project file scan panicked")?;
        issues.extend(scanned.context("Failed to scan project files")?);

        let status = if issues.is_empty() {
            HealthStatus::Healthy
        } else {
            HealthStatus::Issues
        };
        info!(project = %project.id, issues = issues.len(), status = status.as_str(), "Health scan complete");
        Ok((status, issues))
    }

    fn check_test_directories(&self, project: &Project, workdir: &Path) -> Vec<Issue> {
        if project.test_paths.iter().any(|p| workdir.join(p).is_dir()) {
            return Vec::new();
        }
        let Some(first) = project.test_paths.first() else {
            return Vec::new();
        };
        vec![Issue::warning(
            IssueCategory::MissingTestDirectory,
            format!("test directory {} does not exist", first.display()),
        )
        .with_file(first.clone())]
    }

    fn scan_files(&self, root: &Path) -> Result<Vec<Issue>> {
        let mut issues = Vec::new();

        for path in walk_files(root, Some(CONFIG_SCAN_DEPTH)) {
            let Some(format) = ConfigFormat::from_path(&path) else {
                continue;
            };
            // Lock files and similar generated documents are not hand-edited
            if path.file_name().is_some_and(|n| n.to_string_lossy().contains(".lock")) {
                continue;
            }
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            if let Some(error) = format.parse_error(&content) {
                let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
                debug!(file = %relative.display(), "Malformed config");
                issues.push(
                    Issue::critical(
                        IssueCategory::SyntaxError,
                        format!("{} does not parse: {error}", relative.display()),
                    )
                    .with_file(relative),
                );
            }
        }

        for path in walk_files(root, None).filter(|p| is_source_file(p)) {
            let Ok(content) = std::fs::read_to_string(&path) else {
                continue;
            };
            let relative = path.strip_prefix(root).unwrap_or(&path).to_path_buf();
            issues.extend(self.scan_source(&relative, &content));
        }

        Ok(issues)
    }

    /// Issues for one source file.
    pub fn scan_source(&self, relative: &Path, content: &str) -> Vec<Issue> {
        let mut issues = Vec::new();

        for smell in &self.smells {
            if let Some((line_no, line)) = content
                .lines()
                .enumerate()
                .find(|(_, line)| smell.regex.is_match(line))
            {
                issues.push(
                    Issue::warning(
                        IssueCategory::SecuritySmell,
                        format!(
                            "{} at {}:{}: {}",
                            smell.name,
                            relative.display(),
                            line_no + 1,
                            line.trim()
                        ),
                    )
                    .with_subject(smell.name)
                    .with_file(relative),
                );
            }
        }

        let import_lines: Vec<&str> = content
            .lines()
            .filter(|l| self.import_line.is_match(l))
            .collect();
        if import_lines.iter().any(|l| self.backslash_import.is_match(l)) {
            issues.push(
                Issue::warning(
                    IssueCategory::ImportPath,
                    format!("{} imports modules with backslash separators", relative.display()),
                )
                .with_file(relative),
            );
        } else if import_lines.iter().any(|l| self.redundant_import.is_match(l)) {
            issues.push(
                Issue::info(
                    IssueCategory::ImportPath,
                    format!("{} has redundant ./ segments in imports", relative.display()),
                )
                .with_file(relative),
            );
        }

        issues
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::Severity;

    #[tokio::test]
    async fn test_scan_reports_missing_tests_and_bad_json() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("config.json"), "{\"a\": 1,}").unwrap();
        std::fs::write(dir.path().join("app.py"), "print('hi')\n").unwrap();
        let project = Project::new("p", dir.path());

        let (status, issues) = HealthScanner::new().scan(&project, dir.path()).await.unwrap();

        assert_eq!(status, HealthStatus::Issues);
        assert!(issues
            .iter()
            .any(|i| i.category == IssueCategory::MissingTestDirectory));
        let syntax = issues
            .iter()
            .find(|i| i.category == IssueCategory::SyntaxError)
            .unwrap();
        assert_eq!(syntax.files, vec![PathBuf::from("config.json")]);
    }

    #[tokio::test]
    async fn test_healthy_project() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir(dir.path().join("tests")).unwrap();
        std::fs::write(dir.path().join("tests/test_a.py"), "def test_a():\n    assert 1 == 1\n").unwrap();
        let project = Project::new("p", dir.path());

        let (status, issues) = HealthScanner::new().scan(&project, dir.path()).await.unwrap();
        assert_eq!(status, HealthStatus::Healthy);
        assert!(issues.is_empty());
    }

    #[test]
    fn test_scan_source_smells_and_imports() {
        let scanner = HealthScanner::new();
        let source = "import subprocess\nfrom .\\utils import x\nsubprocess.run(cmd, shell=True)\n";
        let issues = scanner.scan_source(Path::new("app.py"), source);
        assert!(issues
            .iter()
            .any(|i| i.category == IssueCategory::SecuritySmell && i.evidence.contains("app.py:3")));
        // No quoted path on the python import line, so no import issue
        assert!(!issues.iter().any(|i| i.category == IssueCategory::ImportPath));

        let js = "const a = require('././lib/a');\n";
        let issues = scanner.scan_source(Path::new("index.js"), js);
        let import = issues
            .iter()
            .find(|i| i.category == IssueCategory::ImportPath)
            .unwrap();
        assert_eq!(import.severity, Severity::Info);
    }

    #[test]
    fn test_hidden_directories_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::create_dir_all(dir.path().join(".git")).unwrap();
        std::fs::write(dir.path().join(".git/bad.json"), "{").unwrap();
        std::fs::write(dir.path().join("ok.json"), "{}").unwrap();
        let files: Vec<_> = walk_files(dir.path(), None).collect();
        assert_eq!(files, vec![dir.path().join("ok.json")]);
    }
}
