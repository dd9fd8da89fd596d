//! Project registry
//!
//! An immutable snapshot of every project known to a batch, loaded once from
//! a YAML file and passed explicitly to the services that need it.

use serde::Deserialize;
use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::domain::errors::{VerifyError, VerifyResult};
use crate::domain::models::{Project, ProjectId};

#[derive(Debug, Deserialize)]
struct RegistryFile {
    #[serde(default)]
    projects: Vec<Project>,
}

/// Which projects a batch covers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProjectSelector {
    /// The named project only
    Project(ProjectId),
    All,
    Category(String),
}

/// Validated set of projects.
#[derive(Debug, Clone)]
pub struct ProjectRegistry {
    source: Option<PathBuf>,
    projects: Vec<Project>,
}

impl ProjectRegistry {
    /// Build a registry from in-memory projects.
    ///
    /// # Errors
    ///
    /// Returns [`VerifyError::Configuration`] on empty or duplicate ids and on
    /// dependencies naming unknown projects.
    pub fn new(projects: Vec<Project>) -> VerifyResult<Self> {
        let mut seen = BTreeSet::new();
        for project in &projects {
            if project.id.as_str().trim().is_empty() {
                return Err(VerifyError::Configuration(
                    "project id cannot be empty".to_string(),
                ));
            }
            if !seen.insert(&project.id) {
                return Err(VerifyError::Configuration(format!(
                    "duplicate project id '{}'",
                    project.id
                )));
            }
        }

        for project in &projects {
            if let Some(missing) = project.depends_on.iter().find(|d| !seen.contains(d)) {
                return Err(VerifyError::Configuration(format!(
                    "project '{}' depends on unknown project '{}'",
                    project.id, missing
                )));
            }
        }

        Ok(Self {
            source: None,
            projects,
        })
    }

    /// Load and validate a registry file. Relative roots resolve against the
    /// file's directory.
    pub fn load(path: impl AsRef<Path>) -> VerifyResult<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| {
            VerifyError::Configuration(format!(
                "cannot read project registry {}: {e}",
                path.display()
            ))
        })?;
        let base = path.parent().unwrap_or_else(|| Path::new("."));
        let mut registry = Self::from_yaml(&content, base)?;
        registry.source = Some(path.to_path_buf());

        info!(
            registry = %path.display(),
            projects = registry.projects.len(),
            "Loaded project registry"
        );
        Ok(registry)
    }

    /// Parse registry YAML, resolving relative roots against `base`.
    pub fn from_yaml(content: &str, base: &Path) -> VerifyResult<Self> {
        let file: RegistryFile = serde_yaml::from_str(content)?;
        let projects = file
            .projects
            .into_iter()
            .map(|mut project| {
                if project.root.is_relative() {
                    project.root = base.join(&project.root);
                }
                project
            })
            .collect();
        Self::new(projects)
    }

    pub fn source(&self) -> Option<&Path> {
        self.source.as_deref()
    }

    pub fn projects(&self) -> &[Project] {
        &self.projects
    }

    pub fn get(&self, id: &ProjectId) -> Option<&Project> {
        self.projects.iter().find(|p| &p.id == id)
    }

    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }

    /// Projects matching `selector`, in registry order.
    ///
    /// # Errors
    ///
    /// An unknown project name or a category with no members is a
    /// configuration error.
    pub fn select(&self, selector: &ProjectSelector) -> VerifyResult<Vec<Project>> {
        let selected: Vec<Project> = match selector {
            ProjectSelector::All => self.projects.clone(),
            ProjectSelector::Project(id) => {
                let project = self.get(id).ok_or_else(|| {
                    VerifyError::Configuration(format!("unknown project '{id}'"))
                })?;
                vec![project.clone()]
            }
            ProjectSelector::Category(category) => self
                .projects
                .iter()
                .filter(|p| p.category.as_deref() == Some(category.as_str()))
                .cloned()
                .collect(),
        };

        if selected.is_empty() {
            if let ProjectSelector::Category(category) = selector {
                return Err(VerifyError::Configuration(format!(
                    "no projects in category '{category}'"
                )));
            }
        }

        debug!(selector = ?selector, selected = selected.len(), "Selected projects");
        Ok(selected)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REGISTRY: &str = r"
projects:
  - id: core
    root: ./core
    category: library
    test_command: [cargo, test]
  - id: api
    root: /srv/api
    category: service
    depends_on: [core]
  - id: cli
    root: cli
    category: library
    depends_on: [core]
";

    #[test]
    fn test_from_yaml_resolves_relative_roots() {
        let registry = ProjectRegistry::from_yaml(REGISTRY, Path::new("/eco")).unwrap();
        assert_eq!(registry.len(), 3);
        let core = registry.get(&"core".into()).unwrap();
        assert_eq!(core.root, PathBuf::from("/eco/./core"));
        let api = registry.get(&"api".into()).unwrap();
        assert_eq!(api.root, PathBuf::from("/srv/api"));
    }

    #[test]
    fn test_select_variants() {
        let registry = ProjectRegistry::from_yaml(REGISTRY, Path::new("/eco")).unwrap();

        let all = registry.select(&ProjectSelector::All).unwrap();
        assert_eq!(all.len(), 3);

        let one = registry
            .select(&ProjectSelector::Project("api".into()))
            .unwrap();
        assert_eq!(one.len(), 1);
        assert_eq!(one[0].id.as_str(), "api");

        let libs = registry
            .select(&ProjectSelector::Category("library".into()))
            .unwrap();
        let ids: Vec<_> = libs.iter().map(|p| p.id.as_str()).collect();
        assert_eq!(ids, vec!["core", "cli"]);
    }

    #[test]
    fn test_select_unknown_project_is_configuration_error() {
        let registry = ProjectRegistry::from_yaml(REGISTRY, Path::new("/eco")).unwrap();
        let err = registry
            .select(&ProjectSelector::Project("nope".into()))
            .unwrap_err();
        assert!(matches!(err, VerifyError::Configuration(_)));
        assert!(registry
            .select(&ProjectSelector::Category("nothing".into()))
            .is_err());
    }

    #[test]
    fn test_duplicate_ids_rejected() {
        let err = ProjectRegistry::new(vec![Project::new("a", "/a"), Project::new("a", "/b")])
            .unwrap_err();
        assert!(err.to_string().contains("duplicate project id 'a'"));
    }

    #[test]
    fn test_unknown_dependency_rejected() {
        let err = ProjectRegistry::new(vec![Project::new("a", "/a").with_dependency("ghost")])
            .unwrap_err();
        assert!(err.to_string().contains("unknown project 'ghost'"));
    }

    #[test]
    fn test_load_missing_file() {
        let err = ProjectRegistry::load("/definitely/not/here.yaml").unwrap_err();
        assert!(err.is_fatal_for_batch());
    }
}
