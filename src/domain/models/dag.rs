//! Dependency graph domain models
//!
//! Models for representing project dependencies as a directed acyclic graph
//! and the execution waves derived from it.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use super::{Project, ProjectId};

/// An edge in the dependency graph
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct DependencyEdge {
    /// The dependency (provider)
    pub from: ProjectId,
    /// The dependent project (consumer)
    pub to: ProjectId,
}

impl DependencyEdge {
    pub fn new(from: ProjectId, to: ProjectId) -> Self {
        Self { from, to }
    }
}

/// Directed graph over projects, restricted to the projects it was built from.
///
/// Dependencies naming projects outside the set are dropped, so a subset of a
/// registry yields a self-contained graph.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    dependencies: BTreeMap<ProjectId, BTreeSet<ProjectId>>,
}

impl DependencyGraph {
    pub fn from_projects(projects: &[Project]) -> Self {
        let ids: BTreeSet<&ProjectId> = projects.iter().map(|p| &p.id).collect();
        let dependencies = projects
            .iter()
            .map(|p| {
                let deps = p
                    .depends_on
                    .iter()
                    .filter(|d| ids.contains(d))
                    .cloned()
                    .collect();
                (p.id.clone(), deps)
            })
            .collect();
        Self { dependencies }
    }

    pub fn nodes(&self) -> impl Iterator<Item = &ProjectId> {
        self.dependencies.keys()
    }

    pub fn len(&self) -> usize {
        self.dependencies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty()
    }

    /// Dependencies of `id` that are part of this graph.
    pub fn dependencies_of(&self, id: &ProjectId) -> impl Iterator<Item = &ProjectId> {
        self.dependencies.get(id).into_iter().flatten()
    }

    /// Projects in this graph that depend on `id`.
    pub fn dependents_of<'a>(&'a self, id: &'a ProjectId) -> impl Iterator<Item = &'a ProjectId> {
        self.dependencies
            .iter()
            .filter(move |(_, deps)| deps.contains(id))
            .map(|(node, _)| node)
    }

    /// All edges, provider first.
    pub fn edges(&self) -> Vec<DependencyEdge> {
        self.dependencies
            .iter()
            .flat_map(|(node, deps)| {
                deps.iter()
                    .map(move |dep| DependencyEdge::new(dep.clone(), node.clone()))
            })
            .collect()
    }
}

/// A batch of projects safe to process at the same dependency depth.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Wave {
    /// Zero-based position in the schedule
    pub index: usize,
    /// Projects in this wave, sorted by id
    pub projects: Vec<ProjectId>,
}

impl Wave {
    pub fn len(&self) -> usize {
        self.projects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.projects.is_empty()
    }
}
