//! Dependency graph over the visible resources.
//!
//! Edges point from a resource to what it refs, so a reversed topological sort
//! lists dependencies before their dependents. Refs to names that are not
//! visible (a model reading a table outside the project, a theme that was
//! deleted) are left out of the graph.

use petgraph::algo::{tarjan_scc, toposort};
use petgraph::graph::{DiGraph, NodeIndex};
use std::collections::{BTreeMap, HashMap};

use crate::core::ResourceName;
use crate::table::Resource;

/// A directed graph of resources and their refs.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    graph: DiGraph<ResourceName, ()>,
    node_map: HashMap<ResourceName, NodeIndex>,
}

impl DependencyGraph {
    /// Builds the graph from a snapshot of resources.
    pub fn from_resources(resources: &BTreeMap<ResourceName, Resource>) -> Self {
        let mut graph = Self::default();
        for name in resources.keys() {
            graph.ensure_node(name.clone());
        }
        for (name, resource) in resources {
            for target in &resource.refs {
                if resources.contains_key(target) {
                    graph.add_dependency(name.clone(), target.clone());
                }
            }
        }
        graph
    }

    /// Adds a resource without dependencies.
    pub fn add_node(&mut self, name: ResourceName) {
        self.ensure_node(name);
    }

    fn ensure_node(&mut self, name: ResourceName) -> NodeIndex {
        if let Some(&index) = self.node_map.get(&name) {
            return index;
        }
        let index = self.graph.add_node(name.clone());
        self.node_map.insert(name, index);
        index
    }

    /// `from` depends on `to`.
    pub fn add_dependency(&mut self, from: ResourceName, to: ResourceName) {
        let from_idx = self.ensure_node(from);
        let to_idx = self.ensure_node(to);
        if !self.graph.contains_edge(from_idx, to_idx) {
            self.graph.add_edge(from_idx, to_idx, ());
        }
    }

    /// Resources ordered so that every resource comes after what it refs.
    ///
    /// Returns the resources on a cycle if there is one.
    pub fn topological_order(&self) -> Result<Vec<ResourceName>, Vec<ResourceName>> {
        match toposort(&self.graph, None) {
            Ok(indices) => Ok(indices
                .into_iter()
                .rev()
                .map(|idx| self.graph[idx].clone())
                .collect()),
            Err(cycle) => {
                let start = cycle.node_id();
                Err(self
                    .cycles()
                    .into_iter()
                    .find(|c| c.contains(&self.graph[start]))
                    .unwrap_or_else(|| vec![self.graph[start].clone()]))
            }
        }
    }

    /// Every group of resources that ref each other, each sorted by name.
    pub fn cycles(&self) -> Vec<Vec<ResourceName>> {
        let mut cycles: Vec<Vec<ResourceName>> = tarjan_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1
                    || scc
                        .first()
                        .is_some_and(|&idx| self.graph.contains_edge(idx, idx))
            })
            .map(|scc| {
                let mut names: Vec<ResourceName> =
                    scc.into_iter().map(|idx| self.graph[idx].clone()).collect();
                names.sort();
                names
            })
            .collect();
        cycles.sort();
        cycles
    }

    /// Direct dependencies of `name`, sorted.
    pub fn dependencies(&self, name: &ResourceName) -> Vec<ResourceName> {
        let Some(&idx) = self.node_map.get(name) else {
            return Vec::new();
        };
        let mut deps: Vec<ResourceName> = self
            .graph
            .neighbors(idx)
            .map(|n| self.graph[n].clone())
            .collect();
        deps.sort();
        deps
    }

    /// Every resource in the graph, sorted.
    pub fn names(&self) -> Vec<ResourceName> {
        let mut names: Vec<ResourceName> = self.node_map.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
