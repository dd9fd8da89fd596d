//! Repairs malformed structured configuration files.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::Path;
use tracing::info;

use crate::domain::models::{Fix, FixKind, Issue, IssueCategory};
use crate::domain::ports::{FixContext, RemediationStrategy};

/// Structured formats the strategy validates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigFormat {
    Json,
    Yaml,
    Toml,
}

impl ConfigFormat {
    pub fn from_path(path: &Path) -> Option<Self> {
        match path.extension()?.to_str()?.to_ascii_lowercase().as_str() {
            "json" => Some(Self::Json),
            "yaml" | "yml" => Some(Self::Yaml),
            "toml" => Some(Self::Toml),
            _ => None,
        }
    }

    /// Parse error for `content`, or `None` when it is valid.
    pub fn parse_error(self, content: &str) -> Option<String> {
        match self {
            Self::Json => serde_json::from_str::<serde_json::Value>(content)
                .err()
                .map(|e| e.to_string()),
            Self::Yaml => serde_yaml::from_str::<serde_yaml::Value>(content)
                .err()
                .map(|e| e.to_string()),
            Self::Toml => content.parse::<toml::Table>().err().map(|e| e.to_string()),
        }
    }
}

/// Strip `//` and `/* */` comments and trailing commas outside string literals.
pub fn repair_json(content: &str) -> String {
    let chars: Vec<char> = content.chars().collect();
    let mut out = String::with_capacity(content.len());
    let mut i = 0;
    let mut in_string = false;

    while i < chars.len() {
        let c = chars[i];
        if in_string {
            out.push(c);
            if c == '\\' && i + 1 < chars.len() {
                out.push(chars[i + 1]);
                i += 1;
            } else if c == '"' {
                in_string = false;
            }
            i += 1;
            continue;
        }

        match c {
            '"' => {
                in_string = true;
                out.push(c);
                i += 1;
            }
            '/' if chars.get(i + 1) == Some(&'/') => {
                while i < chars.len() && chars[i] != '\n' {
                    i += 1;
                }
            }
            '/' if chars.get(i + 1) == Some(&'*') => {
                i += 2;
                while i < chars.len() && !(chars[i] == '*' && chars.get(i + 1) == Some(&'/')) {
                    i += 1;
                }
                i = (i + 2).min(chars.len());
            }
            ',' => {
                let mut j = i + 1;
                loop {
                    while j < chars.len() && chars[j].is_whitespace() {
                        j += 1;
                    }
                    // Skip comments between the comma and the closing bracket
                    if chars.get(j) == Some(&'/') && chars.get(j + 1) == Some(&'/') {
                        while j < chars.len() && chars[j] != '\n' {
                            j += 1;
                        }
                    } else if chars.get(j) == Some(&'/') && chars.get(j + 1) == Some(&'*') {
                        j += 2;
                        while j < chars.len() && !(chars[j] == '*' && chars.get(j + 1) == Some(&'/')) {
                            j += 1;
                        }
                        j = (j + 2).min(chars.len());
                    } else {
                        break;
                    }
                }
                if !matches!(chars.get(j), Some('}' | ']')) {
                    out.push(c);
                }
                i += 1;
            }
            _ => {
                out.push(c);
                i += 1;
            }
        }
    }
    out
}

/// Replace tab indentation with two spaces per tab.
pub fn repair_yaml(content: &str) -> String {
    let mut out = content
        .lines()
        .map(|line| {
            let indent = line.len() - line.trim_start_matches([' ', '\t']).len();
            let (lead, rest) = line.split_at(indent);
            format!("{}{}", lead.replace('\t', "  "), rest)
        })
        .collect::<Vec<_>>()
        .join("\n");
    if content.ends_with('\n') {
        out.push('\n');
    }
    out
}

/// Repairs JSON and YAML syntax; reports TOML errors it cannot repair.
#[derive(Debug, Default)]
pub struct ConfigSyntaxStrategy;

impl ConfigSyntaxStrategy {
    pub fn new() -> Self {
        Self
    }

    fn failed(&self, issue: &Issue, file: &Path, description: String) -> Fix {
        Fix::failed(FixKind::RepairConfigSyntax, self.name(), issue.category, description)
            .with_target(file)
    }

    async fn repair_file(&self, ctx: &FixContext<'_>, issue: &Issue, file: &Path) -> Result<Fix> {
        let path = match ctx.resolve(file) {
            Ok(path) => path,
            Err(e) => return Ok(self.failed(issue, file, format!("refused: {e}"))),
        };
        let Some(format) = ConfigFormat::from_path(&path) else {
            return Ok(self.failed(issue, file, format!("unsupported config format: {}", file.display())));
        };

        let content = tokio::fs::read_to_string(&path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;

        if format.parse_error(&content).is_none() {
            return Ok(Fix::succeeded(
                FixKind::RepairConfigSyntax,
                self.name(),
                issue.category,
                format!("{} already parses", file.display()),
            )
            .with_target(file));
        }

        let repaired = match format {
            ConfigFormat::Json => repair_json(&content),
            ConfigFormat::Yaml => repair_yaml(&content),
            ConfigFormat::Toml => {
                let error = format.parse_error(&content).unwrap_or_default();
                return Ok(self.failed(
                    issue,
                    file,
                    format!("no automatic repair for TOML: {error}"),
                ));
            }
        };

        if let Some(error) = format.parse_error(&repaired) {
            return Ok(self.failed(issue, file, format!("repair did not produce valid content: {error}")));
        }

        tokio::fs::write(&path, repaired)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;
        info!(project = %ctx.project.id, file = %file.display(), "Repaired config syntax");

        Ok(Fix::succeeded(
            FixKind::RepairConfigSyntax,
            self.name(),
            issue.category,
            format!("repaired syntax of {}", file.display()),
        )
        .with_target(file))
    }
}

#[async_trait]
impl RemediationStrategy for ConfigSyntaxStrategy {
    fn name(&self) -> &'static str {
        "config-syntax"
    }

    fn can_handle(&self, issue: &Issue, _ctx: &FixContext<'_>) -> bool {
        issue.category == IssueCategory::SyntaxError && !issue.files.is_empty()
    }

    async fn apply(&self, ctx: &FixContext<'_>, issue: &Issue) -> Result<Fix> {
        let mut last = None;
        for file in &issue.files {
            let fix = self.repair_file(ctx, issue, file).await?;
            if !fix.success {
                return Ok(fix);
            }
            last = Some(fix);
        }
        last.context("syntax_error issue names no files")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{Project, RemediationConfig};

    #[test]
    fn test_repair_json_trailing_commas_and_comments() {
        let broken = r#"{
  // database settings
  "url": "http://example.com/a,}", /* inline */
  "pool": [1, 2, 3,],
}"#;
        let fixed = repair_json(broken);
        let value: serde_json::Value = serde_json::from_str(&fixed).unwrap();
        assert_eq!(value["url"], "http://example.com/a,}");
        assert_eq!(value["pool"].as_array().unwrap().len(), 3);
    }

    #[test]
    fn test_repair_yaml_tabs() {
        let broken = "server:\n\tport: 8080\n\thost: localhost\n";
        let fixed = repair_yaml(broken);
        assert_eq!(fixed, "server:\n  port: 8080\n  host: localhost\n");
        assert!(ConfigFormat::Yaml.parse_error(&fixed).is_none());
    }

    #[tokio::test]
    async fn test_toml_is_not_repaired() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("settings.toml"), "name = \n").unwrap();
        let project = Project::new("c", dir.path());
        let config = RemediationConfig::default();
        let ctx = FixContext::new(&project, dir.path(), &config);
        let issue = Issue::critical(IssueCategory::SyntaxError, "bad toml").with_file("settings.toml");

        let fix = ConfigSyntaxStrategy.apply(&ctx, &issue).await.unwrap();
        assert!(!fix.success);
        assert!(fix.description.contains("TOML"));
    }

    #[tokio::test]
    async fn test_json_file_repaired_in_place() {
        let dir = tempfile::tempdir().unwrap();
        std::fs::write(dir.path().join("app.json"), "{\"a\": 1,}").unwrap();
        let project = Project::new("c", dir.path());
        let config = RemediationConfig::default();
        let ctx = FixContext::new(&project, dir.path(), &config);
        let issue = Issue::critical(IssueCategory::SyntaxError, "bad json").with_file("app.json");

        let fix = ConfigSyntaxStrategy.apply(&ctx, &issue).await.unwrap();
        assert!(fix.success);
        assert_eq!(std::fs::read_to_string(dir.path().join("app.json")).unwrap(), "{\"a\": 1}");
    }
}
