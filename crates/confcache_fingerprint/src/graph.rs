//! Project dependency graph derived from ledger entries.
//!
//! Edges point from the project whose model was read to the project that
//! read it, which is the direction invalidation travels: when a target is
//! invalidated, every consumer reachable from it must be re-evaluated too.

use std::collections::{HashMap, HashSet};

use confcache_common::ProjectPath;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::Direction;

use crate::entry::FingerprintEntry;

/// Reversed project dependency graph.
#[derive(Debug, Default)]
pub struct DependencyGraph {
    graph: DiGraph<ProjectPath, ()>,
    nodes: HashMap<ProjectPath, NodeIndex>,
    edges: HashSet<(NodeIndex, NodeIndex)>,
}

impl DependencyGraph {
    /// Creates an empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Builds the graph from the dependency entries among `entries`.
    ///
    /// Fingerprint entries are skipped, self-dependencies are dropped, and
    /// repeated edges are stored once.
    pub fn build<'a, V: 'a>(entries: impl IntoIterator<Item = &'a FingerprintEntry<V>>) -> Self {
        let mut graph = Self::new();
        for entry in entries {
            graph.add_entry(entry);
        }
        graph
    }

    /// Adds the edge recorded by `entry`, if it is a dependency entry.
    pub fn add_entry<V>(&mut self, entry: &FingerprintEntry<V>) {
        if let FingerprintEntry::ProjectDependency {
            consuming_project,
            target_project,
        } = entry
        {
            self.add_dependency(consuming_project, target_project);
        }
    }

    /// Records that `consumer` read the evaluated model of `target`.
    ///
    /// Returns `true` if a new edge was added.
    pub fn add_dependency(&mut self, consumer: &ProjectPath, target: &ProjectPath) -> bool {
        if consumer == target {
            return false;
        }
        let from = self.node(target);
        let to = self.node(consumer);
        if !self.edges.insert((from, to)) {
            return false;
        }
        self.graph.add_edge(from, to, ());
        true
    }

    fn node(&mut self, path: &ProjectPath) -> NodeIndex {
        if let Some(&idx) = self.nodes.get(path) {
            return idx;
        }
        let idx = self.graph.add_node(path.clone());
        self.nodes.insert(path.clone(), idx);
        idx
    }

    /// Returns the projects that consumed the model of `path`.
    ///
    /// Unknown paths have no neighbors.
    pub fn out_neighbors<'g>(
        &'g self,
        path: &ProjectPath,
    ) -> impl Iterator<Item = &'g ProjectPath> + 'g {
        let idx = self.nodes.get(path).copied();
        idx.into_iter().flat_map(move |idx| {
            self.graph
                .neighbors_directed(idx, Direction::Outgoing)
                .map(move |n| &self.graph[n])
        })
    }

    /// Returns every project that some other project consumed.
    pub fn targets(&self) -> impl Iterator<Item = &ProjectPath> + '_ {
        self.graph.node_indices().filter_map(move |idx| {
            self.graph
                .neighbors_directed(idx, Direction::Outgoing)
                .next()
                .map(|_| &self.graph[idx])
        })
    }

    /// Returns `true` if the graph has no edges.
    pub fn is_empty(&self) -> bool {
        self.graph.edge_count() == 0
    }

    /// Number of distinct projects mentioned by an edge.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of distinct edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }
}
