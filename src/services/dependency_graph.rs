//! Dependency graph over a decomposition tree.
//!
//! Edges point from a node to its prerequisites: its children (a parent is
//! composed from them) and its declared dependencies. The union must be
//! acyclic. Every traversal iterates ids in ascending order so results are
//! deterministic.

use std::collections::{BTreeMap, BTreeSet, VecDeque};

use crate::domain::errors::{DomainError, DomainResult, ValidationIssue};
use crate::domain::models::{ComponentContract, ComponentId, ComponentStatus, DecompositionTree};

/// Read-only graph view borrowed from a tree snapshot.
#[derive(Debug, Clone)]
pub struct DependencyGraph<'a> {
    tree: &'a DecompositionTree,
    prerequisites: BTreeMap<&'a str, BTreeSet<&'a str>>,
}

// Standalone helper for cycle detection
fn detect_cycle_util<'a>(
    node: &'a str,
    graph: &BTreeMap<&'a str, BTreeSet<&'a str>>,
    visited: &mut BTreeSet<&'a str>,
    rec_stack: &mut BTreeSet<&'a str>,
    path: &mut Vec<&'a str>,
) -> bool {
    visited.insert(node);
    rec_stack.insert(node);
    path.push(node);

    if let Some(neighbors) = graph.get(node) {
        for &neighbor in neighbors {
            if !visited.contains(neighbor) {
                if detect_cycle_util(neighbor, graph, visited, rec_stack, path) {
                    return true;
                }
            } else if rec_stack.contains(neighbor) {
                if let Some(cycle_start) = path.iter().position(|&id| id == neighbor) {
                    path.drain(0..cycle_start);
                    path.push(neighbor);
                    return true;
                }
            }
        }
    }

    rec_stack.remove(node);
    path.pop();
    false
}

impl<'a> DependencyGraph<'a> {
    /// Build the adjacency structure. Edges to unknown ids are dropped here and
    /// reported by [`Self::missing_dependencies`].
    pub fn new(tree: &'a DecompositionTree) -> Self {
        let mut prerequisites: BTreeMap<&'a str, BTreeSet<&'a str>> = BTreeMap::new();
        for (id, node) in &tree.nodes {
            let entry = prerequisites.entry(id.as_str()).or_default();
            for target in node.children.iter().chain(node.dependencies.iter()) {
                if tree.nodes.contains_key(target) {
                    entry.insert(target.as_str());
                }
            }
        }
        Self {
            tree,
            prerequisites,
        }
    }

    pub fn tree(&self) -> &'a DecompositionTree {
        self.tree
    }

    /// Nodes with no children, ascending. Dependency edges play no part.
    pub fn leaves(&self) -> Vec<ComponentId> {
        self.tree
            .nodes
            .values()
            .filter(|n| n.is_leaf())
            .map(|n| n.id.clone())
            .collect()
    }

    /// Nodes not yet at or past `target` whose every declared dependency is at
    /// or past `required`.
    ///
    /// Failed nodes are never ready; diagnosis resets them first.
    pub fn ready(&self, target: ComponentStatus, required: ComponentStatus) -> Vec<ComponentId> {
        self.tree
            .nodes
            .values()
            .filter(|n| n.status != ComponentStatus::Failed && !n.status.is_at_or_past(target))
            .filter(|n| self.unsatisfied_dependencies(&n.id, required).is_empty())
            .map(|n| n.id.clone())
            .collect()
    }

    /// Declared dependencies of `id` that are not at or past `required`.
    /// Unknown dependency ids count as unsatisfied.
    pub fn unsatisfied_dependencies(&self, id: &str, required: ComponentStatus) -> Vec<ComponentId> {
        let Some(node) = self.tree.get(id) else {
            return Vec::new();
        };
        node.dependencies
            .iter()
            .filter(|dep| {
                !self
                    .tree
                    .status_of(dep)
                    .is_some_and(|status| status.is_at_or_past(required))
            })
            .cloned()
            .collect()
    }

    /// Nodes that list `id` as a declared dependency, ascending.
    pub fn dependents_of(&self, id: &str) -> Vec<ComponentId> {
        self.tree
            .nodes
            .values()
            .filter(|n| n.dependencies.contains(id))
            .map(|n| n.id.clone())
            .collect()
    }

    /// First cycle found, as a closed path `a -> b -> a`.
    pub fn detect_cycles(&self) -> Option<Vec<ComponentId>> {
        let mut visited = BTreeSet::new();
        let mut rec_stack = BTreeSet::new();
        let mut path = Vec::new();

        for &id in self.prerequisites.keys() {
            if !visited.contains(id)
                && detect_cycle_util(
                    id,
                    &self.prerequisites,
                    &mut visited,
                    &mut rec_stack,
                    &mut path,
                )
            {
                return Some(path.into_iter().map(str::to_string).collect());
            }
        }
        None
    }

    /// Topological depth of every node: prerequisites-free nodes are depth 0,
    /// anything else sits one above its deepest prerequisite.
    pub fn depths(&self) -> DomainResult<BTreeMap<ComponentId, usize>> {
        let mut remaining: BTreeMap<&str, usize> = self
            .prerequisites
            .iter()
            .map(|(id, prereqs)| (*id, prereqs.len()))
            .collect();
        let mut dependents: BTreeMap<&str, Vec<&str>> = BTreeMap::new();
        for (id, prereqs) in &self.prerequisites {
            for prereq in prereqs {
                dependents.entry(*prereq).or_default().push(*id);
            }
        }

        // Kahn's algorithm, carrying the depth along
        let mut queue: VecDeque<&str> = remaining
            .iter()
            .filter(|(_, &count)| count == 0)
            .map(|(&id, _)| id)
            .collect();
        let mut depths: BTreeMap<ComponentId, usize> = BTreeMap::new();
        let mut depth_of: BTreeMap<&str, usize> = queue.iter().map(|&id| (id, 0)).collect();

        while let Some(id) = queue.pop_front() {
            let depth = depth_of.get(id).copied().unwrap_or(0);
            depths.insert(id.to_string(), depth);
            for &dependent in dependents.get(id).map(Vec::as_slice).unwrap_or_default() {
                let entry = depth_of.entry(dependent).or_insert(0);
                *entry = (*entry).max(depth + 1);
                if let Some(count) = remaining.get_mut(dependent) {
                    *count -= 1;
                    if *count == 0 {
                        queue.push_back(dependent);
                    }
                }
            }
        }

        if depths.len() != self.prerequisites.len() {
            let path = self.detect_cycles().unwrap_or_default();
            return Err(DomainError::DependencyCycle(path));
        }
        Ok(depths)
    }

    /// Nodes partitioned into strictly increasing depth batches, each batch
    /// ascending by id.
    pub fn depth_groups(&self) -> DomainResult<Vec<Vec<ComponentId>>> {
        let depths = self.depths()?;
        let mut groups: BTreeMap<usize, Vec<ComponentId>> = BTreeMap::new();
        for (id, depth) in depths {
            groups.entry(depth).or_default().push(id);
        }
        Ok(groups.into_values().collect())
    }

    /// Every dependency id named inside a contract must be a node of the tree.
    pub fn resolve_refs(
        &self,
        contracts: &BTreeMap<ComponentId, ComponentContract>,
    ) -> Vec<ValidationIssue> {
        contracts
            .values()
            .flat_map(|contract| {
                contract
                    .dependencies
                    .iter()
                    .filter(|dep| !self.tree.nodes.contains_key(*dep))
                    .map(|dep| ValidationIssue::UnresolvedReference {
                        component_id: contract.component_id.clone(),
                        missing_id: dep.clone(),
                    })
            })
            .collect()
    }

    /// Declared graph dependencies that name no node.
    pub fn missing_dependencies(&self) -> Vec<ValidationIssue> {
        self.tree
            .nodes
            .values()
            .flat_map(|node| {
                node.dependencies
                    .iter()
                    .filter(|dep| !self.tree.nodes.contains_key(*dep))
                    .map(|dep| ValidationIssue::MissingDependency {
                        component_id: node.id.clone(),
                        missing_id: dep.clone(),
                    })
            })
            .collect()
    }

    /// Nodes not reachable from the root through child edges.
    pub fn orphans(&self) -> Vec<ComponentId> {
        let reachable: BTreeSet<ComponentId> =
            self.tree.subtree(&self.tree.root_id).into_iter().collect();
        self.tree
            .nodes
            .keys()
            .filter(|id| !reachable.contains(*id))
            .cloned()
            .collect()
    }
}
