//! Declares missing dependencies in the project's manifest.

use anyhow::{Context, Result};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, info, warn};

use crate::domain::models::{Fix, FixKind, Issue, IssueCategory};
use crate::domain::ports::{FixContext, RemediationStrategy};

/// Manifest formats the strategy knows how to edit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ManifestKind {
    Requirements,
    PackageJson,
    CargoToml,
}

impl ManifestKind {
    fn detect(path: &Path) -> Self {
        match path.file_name().and_then(|n| n.to_str()) {
            Some("package.json") => Self::PackageJson,
            Some("Cargo.toml") => Self::CargoToml,
            _ => Self::Requirements,
        }
    }
}

/// Normalize a Python distribution name for comparison.
fn normalize_requirement(name: &str) -> String {
    name.trim().to_lowercase().replace('_', "-")
}

fn requirement_name(line: &str) -> Option<&str> {
    let line = line.split('#').next()?.trim();
    if line.is_empty() || line.starts_with('-') {
        return None;
    }
    let end = line
        .find(|c: char| "=<>!~[; @".contains(c))
        .unwrap_or(line.len());
    Some(line[..end].trim())
}

/// Adds a missing package to requirements.txt, package.json or Cargo.toml.
#[derive(Debug, Default)]
pub struct DependencyInstallStrategy;

impl DependencyInstallStrategy {
    pub fn new() -> Self {
        Self
    }

    /// Map an imported module name to the package that provides it.
    pub fn package_for(module: &str, ctx: &FixContext<'_>) -> String {
        let top = module.split(['.', ':']).next().unwrap_or(module);
        ctx.config
            .package_aliases
            .get(module)
            .or_else(|| ctx.config.package_aliases.get(top))
            .cloned()
            .unwrap_or_else(|| top.to_string())
    }

    fn manifest_path(ctx: &FixContext<'_>) -> Result<PathBuf> {
        if let Some(manifest) = &ctx.project.manifest {
            return ctx.resolve(manifest);
        }
        for candidate in ["requirements.txt", "package.json", "Cargo.toml"] {
            if ctx.workdir.join(candidate).exists() {
                return ctx.resolve(Path::new(candidate));
            }
        }
        ctx.resolve(Path::new("requirements.txt"))
    }

    /// Add `package` to the manifest. Returns false when it was already declared.
    async fn declare(manifest: &Path, package: &str) -> Result<bool> {
        let existing = match tokio::fs::read_to_string(manifest).await {
            Ok(content) => content,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(e).with_context(|| format!("Failed to read {}", manifest.display()))
            }
        };

        let updated = match ManifestKind::detect(manifest) {
            ManifestKind::Requirements => {
                let wanted = normalize_requirement(package);
                if existing
                    .lines()
                    .filter_map(requirement_name)
                    .any(|name| normalize_requirement(name) == wanted)
                {
                    return Ok(false);
                }
                let mut content = existing;
                if !content.is_empty() && !content.ends_with('\n') {
                    content.push('\n');
                }
                content.push_str(package);
                content.push('\n');
                content
            }
            ManifestKind::PackageJson => {
                let mut doc: serde_json::Value = if existing.trim().is_empty() {
                    serde_json::json!({})
                } else {
                    serde_json::from_str(&existing).context("package.json is not valid JSON")?
                };
                let declared = ["dependencies", "devDependencies"]
                    .iter()
                    .any(|section| doc.get(section).and_then(|s| s.get(package)).is_some());
                if declared {
                    return Ok(false);
                }
                let root = doc
                    .as_object_mut()
                    .context("package.json root is not an object")?;
                root.entry("dependencies")
                    .or_insert_with(|| serde_json::json!({}))
                    .as_object_mut()
                    .context("package.json dependencies is not an object")?
                    .insert(package.to_string(), serde_json::json!("*"));
                let mut out = serde_json::to_string_pretty(&doc)?;
                out.push('\n');
                out
            }
            ManifestKind::CargoToml => {
                let mut doc: toml::Table = existing.parse().context("Cargo.toml is not valid TOML")?;
                let deps = doc
                    .entry("dependencies")
                    .or_insert_with(|| toml::Value::Table(toml::Table::new()))
                    .as_table_mut()
                    .context("[dependencies] is not a table")?;
                if deps.contains_key(package) {
                    return Ok(false);
                }
                deps.insert(package.to_string(), toml::Value::String("*".to_string()));
                toml::to_string(&doc)?
            }
        };

        tokio::fs::write(manifest, updated)
            .await
            .with_context(|| format!("Failed to write {}", manifest.display()))?;
        Ok(true)
    }

    async fn install(ctx: &FixContext<'_>, argv: &[String]) -> Result<()> {
        let (program, args) = argv.split_first().context("install_command is empty")?;
        let output = Command::new(program)
            .args(args)
            .current_dir(ctx.workdir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .with_context(|| format!("Failed to launch install command {program}"))?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            anyhow::bail!("install command exited with {}: {}", output.status, stderr.trim());
        }
        Ok(())
    }
}

#[async_trait]
impl RemediationStrategy for DependencyInstallStrategy {
    fn name(&self) -> &'static str {
        "dependency-install"
    }

    fn can_handle(&self, issue: &Issue, _ctx: &FixContext<'_>) -> bool {
        issue.category == IssueCategory::MissingDependency && issue.subject.is_some()
    }

    async fn apply(&self, ctx: &FixContext<'_>, issue: &Issue) -> Result<Fix> {
        let module = issue
            .subject
            .as_deref()
            .context("missing_dependency issue has no module name")?;
        let package = Self::package_for(module, ctx);

        let manifest = match Self::manifest_path(ctx) {
            Ok(path) => path,
            Err(e) => {
                return Ok(Fix::failed(
                    FixKind::InstallDependency,
                    self.name(),
                    issue.category,
                    format!("refused to edit manifest: {e}"),
                ))
            }
        };
        let relative = manifest
            .strip_prefix(ctx.workdir)
            .unwrap_or(&manifest)
            .to_path_buf();

        let added = Self::declare(&manifest, &package).await?;
        if added {
            info!(project = %ctx.project.id, package = %package, manifest = %relative.display(), "Declared missing dependency");
        } else {
            debug!(package = %package, "Dependency already declared");
        }

        if let Some(argv) = &ctx.project.install_command {
            if let Err(e) = Self::install(ctx, argv).await {
                warn!(project = %ctx.project.id, error = %e, "Install command failed");
                return Ok(Fix::failed(
                    FixKind::InstallDependency,
                    self.name(),
                    issue.category,
                    format!("declared {package} but installation failed: {e}"),
                )
                .with_target(relative));
            }
        }

        let description = if added {
            format!("added {package} to {} (module {module})", relative.display())
        } else {
            format!("{package} already declared in {}", relative.display())
        };
        Ok(
            Fix::succeeded(FixKind::InstallDependency, self.name(), issue.category, description)
                .with_target(relative),
        )
    }
}
