// src/dag/graph.rs

use std::collections::BTreeMap;

use crate::dag::order::DependencyNode;

/// Internal node structure: stores immediate deps and dependents.
#[derive(Debug, Clone)]
struct DagNode {
    /// Direct dependencies: nodes that must finish before this one can start.
    deps: Vec<String>,
    /// Direct dependents: nodes that depend on this one.
    dependents: Vec<String>,
}

/// Adjacency information keyed by node name.
///
/// Acyclicity is checked elsewhere (config validation or
/// [`crate::dag::order::order_for_execution`]); this only answers
/// "who depends on whom". Dependencies naming no node are dropped.
#[derive(Debug, Clone, Default)]
pub struct DagGraph {
    nodes: BTreeMap<String, DagNode>,
}

impl DagGraph {
    pub fn from_nodes<T: DependencyNode>(items: &[T]) -> Self {
        let mut nodes: BTreeMap<String, DagNode> = items
            .iter()
            .map(|item| {
                (
                    item.node_name().to_string(),
                    DagNode {
                        deps: Vec::new(),
                        dependents: Vec::new(),
                    },
                )
            })
            .collect();

        for item in items {
            let name = item.node_name();
            for dep in item.node_dependencies() {
                if !nodes.contains_key(dep) {
                    continue;
                }
                if let Some(dep_node) = nodes.get_mut(dep) {
                    dep_node.dependents.push(name.to_string());
                }
                if let Some(node) = nodes.get_mut(name) {
                    node.deps.push(dep.clone());
                }
            }
        }

        Self { nodes }
    }

    /// Return all node names.
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.nodes.keys().map(|s| s.as_str())
    }

    pub fn contains(&self, name: &str) -> bool {
        self.nodes.contains_key(name)
    }

    /// Immediate dependencies of a node.
    pub fn dependencies_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.deps.as_slice())
            .unwrap_or(&[])
    }

    /// Immediate dependents of a node.
    pub fn dependents_of(&self, name: &str) -> &[String] {
        self.nodes
            .get(name)
            .map(|n| n.dependents.as_slice())
            .unwrap_or(&[])
    }
}
