use std::collections::{BTreeMap, BTreeSet};

use crate::domain::errors::{VerifyError, VerifyResult};
use crate::domain::models::{DependencyGraph, Project, ProjectId, Wave};

// Standalone helper for cycle detection (no self needed)
fn detect_cycle_util<'a>(
    node: &'a ProjectId,
    graph: &'a DependencyGraph,
    visited: &mut BTreeSet<&'a ProjectId>,
    rec_stack: &mut BTreeSet<&'a ProjectId>,
    path: &mut Vec<&'a ProjectId>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    for neighbor in graph.dependencies_of(node) {
        if !visited.contains(neighbor) {
            if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                return true;
            }
        } else if rec_stack.contains(neighbor) {
            // Cycle detected: keep only the cycle and close it
            if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                path.drain(0..cycle_start);
                path.push(neighbor);
                return true;
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

/// Find a dependency cycle, returned as a closed path such as `a -> b -> a`.
pub fn detect_cycle(graph: &DependencyGraph) -> Option<Vec<ProjectId>> {
    let mut visited = BTreeSet::new();
    let mut rec_stack = BTreeSet::new();
    let mut path = Vec::new();

    for node in graph.nodes() {
        if !visited.contains(node)
            && detect_cycle_util(node, graph, &mut visited, &mut rec_stack, &mut path)
        {
            return Some(path.into_iter().cloned().collect());
        }
    }

    None
}

/// Group projects into dependency-ordered execution waves.
///
/// Wave `k` holds every project whose in-set dependencies all sit in waves
/// before `k`. Dependencies on projects outside `projects` are ignored.
/// Ids inside a wave are sorted.
///
/// # Errors
///
/// Returns [`VerifyError::CyclicDependency`] naming the offending cycle.
pub fn build_waves(projects: &[Project]) -> VerifyResult<Vec<Wave>> {
    let graph = DependencyGraph::from_projects(projects);

    if let Some(cycle) = detect_cycle(&graph) {
        return Err(VerifyError::CyclicDependency(cycle));
    }

    // Kahn's algorithm, one layer at a time
    let mut in_degree: BTreeMap<&ProjectId, usize> = graph
        .nodes()
        .map(|id| (id, graph.dependencies_of(id).count()))
        .collect();

    let mut waves = Vec::new();
    let mut current: Vec<ProjectId> = in_degree
        .iter()
        .filter(|&(_, &degree)| degree == 0)
        .map(|(&id, _)| id.clone())
        .collect();

    while !current.is_empty() {
        let mut next = BTreeSet::new();
        for id in &current {
            in_degree.remove(id);
            for dependent in graph.dependents_of(id) {
                if let Some(degree) = in_degree.get_mut(dependent) {
                    *degree -= 1;
                    if *degree == 0 {
                        next.insert(dependent.clone());
                    }
                }
            }
        }

        waves.push(Wave {
            index: waves.len(),
            projects: std::mem::take(&mut current),
        });
        current = next.into_iter().collect();
    }

    if !in_degree.is_empty() {
        // Unreachable after the cycle check, kept as a hard guarantee
        let stuck: Vec<ProjectId> = in_degree.keys().map(|&id| id.clone()).collect();
        return Err(VerifyError::CyclicDependency(stuck));
    }

    Ok(waves)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(wave: &Wave) -> Vec<&str> {
        wave.projects.iter().map(ProjectId::as_str).collect()
    }

    #[test]
    fn test_waves_respect_dependencies() {
        let projects = vec![
            Project::new("web", "/w").with_dependency("api"),
            Project::new("api", "/a").with_dependency("core"),
            Project::new("cli", "/c").with_dependency("core"),
            Project::new("core", "/k"),
            Project::new("docs", "/d"),
        ];

        let waves = build_waves(&projects).unwrap();
        assert_eq!(waves.len(), 3);
        assert_eq!(ids(&waves[0]), vec!["core", "docs"]);
        assert_eq!(ids(&waves[1]), vec!["api", "cli"]);
        assert_eq!(ids(&waves[2]), vec!["web"]);
        assert_eq!(waves[2].index, 2);
    }

    #[test]
    fn test_cycle_is_named() {
        let projects = vec![
            Project::new("a", "/a").with_dependency("b"),
            Project::new("b", "/b").with_dependency("a"),
        ];

        let err = build_waves(&projects).unwrap_err();
        assert_eq!(err.to_string(), "Cyclic dependency detected: a -> b -> a");
        assert!(err.is_fatal_for_batch());
    }

    #[test]
    fn test_self_dependency_is_a_cycle() {
        let projects = vec![Project::new("a", "/a").with_dependency("a")];
        let err = build_waves(&projects).unwrap_err();
        assert_eq!(err.to_string(), "Cyclic dependency detected: a -> a");
    }

    #[test]
    fn test_external_dependencies_are_ignored() {
        let projects = vec![Project::new("api", "/a").with_dependency("core")];
        let waves = build_waves(&projects).unwrap();
        assert_eq!(waves.len(), 1);
        assert_eq!(ids(&waves[0]), vec!["api"]);
    }

    #[test]
    fn test_empty_input_yields_no_waves() {
        assert!(build_waves(&[]).unwrap().is_empty());
    }
}
