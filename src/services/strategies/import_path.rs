//! Normalizes module paths in import statements.

use anyhow::{Context, Result};
use async_trait::async_trait;
use regex::Regex;
use std::sync::LazyLock;

use crate::domain::models::{Fix, FixKind, Issue, IssueCategory};
use crate::domain::ports::{FixContext, RemediationStrategy};

static IMPORT_LINE: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"^\s*(import\b|from\b|export\b.*\bfrom\b|.*\brequire\s*\(|.*\bimport\s*\()"#)
        .expect("import line pattern is valid")
});

static QUOTED: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r#"(['"])([^'"]*)(['"])"#).expect("quoted literal pattern is valid")
});

/// Collapse backslash separators and redundant `./` segments in a module path.
pub fn normalize_module_path(path: &str) -> String {
    let mut out = path.replace("\\\\", "/").replace('\\', "/");
    while out.contains("/./") {
        out = out.replace("/./", "/");
    }
    while out.starts_with("././") {
        out.replace_range(..2, "");
    }
    out
}

/// Rewrite import lines of `source`. Returns `None` when nothing changed.
pub fn normalize_imports(source: &str) -> Option<String> {
    let mut changed = false;
    let lines: Vec<String> = source
        .split('\n')
        .map(|line| {
            if !IMPORT_LINE.is_match(line) {
                return line.to_string();
            }
            let rewritten = QUOTED.replace_all(line, |caps: &regex::Captures<'_>| {
                format!("{}{}{}", &caps[1], normalize_module_path(&caps[2]), &caps[3])
            });
            if rewritten != line {
                changed = true;
            }
            rewritten.into_owned()
        })
        .collect();
    changed.then(|| lines.join("\n"))
}

/// Fixes import statements using backslashes or redundant `./` segments.
#[derive(Debug, Default)]
pub struct ImportPathStrategy;

#[async_trait]
impl RemediationStrategy for ImportPathStrategy {
    fn name(&self) -> &'static str {
        "import-path"
    }

    fn can_handle(&self, issue: &Issue, _ctx: &FixContext<'_>) -> bool {
        issue.category == IssueCategory::ImportPath && !issue.files.is_empty()
    }

    async fn apply(&self, ctx: &FixContext<'_>, issue: &Issue) -> Result<Fix> {
        let mut rewritten = Vec::new();
        for file in &issue.files {
            let path = match ctx.resolve(file) {
                Ok(path) => path,
                Err(e) => {
                    return Ok(Fix::failed(
                        FixKind::NormalizeImportPath,
                        self.name(),
                        issue.category,
                        format!("refused: {e}"),
                    )
                    .with_target(file))
                }
            };
            let source = tokio::fs::read_to_string(&path)
                .await
                .with_context(|| format!("Failed to read {}", path.display()))?;
            if let Some(updated) = normalize_imports(&source) {
                tokio::fs::write(&path, updated)
                    .await
                    .with_context(|| format!("Failed to write {}", path.display()))?;
                rewritten.push(file.clone());
            }
        }

        let description = if rewritten.is_empty() {
            "import paths already normalized".to_string()
        } else {
            format!("normalized import paths in {} file(s)", rewritten.len())
        };
        let mut fix = Fix::succeeded(
            FixKind::NormalizeImportPath,
            self.name(),
            issue.category,
            description,
        );
        fix.targets = rewritten;
        Ok(fix)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_module_path() {
        assert_eq!(normalize_module_path(r"..\lib\utils"), "../lib/utils");
        assert_eq!(normalize_module_path("./././config"), "./config");
        assert_eq!(normalize_module_path("../a/./b"), "../a/b");
        assert_eq!(normalize_module_path("lodash"), "lodash");
    }

    #[test]
    fn test_only_import_lines_change() {
        let source = "import { a } from '.\\\\lib\\\\a';\nconst s = 'C:\\\\temp';\nconst b = require('./././b');\n";
        let updated = normalize_imports(source).unwrap();
        assert!(updated.contains("from './lib/a'"));
        assert!(updated.contains("'C:\\\\temp'"));
        assert!(updated.contains("require('./b')"));
    }

    #[test]
    fn test_unchanged_source_returns_none() {
        assert!(normalize_imports("import os\nfrom pkg import mod\n").is_none());
    }
}
