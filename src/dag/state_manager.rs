// src/dag/state_manager.rs

//! State transitions for nodes in the build scheduler.

use std::collections::{BTreeMap, HashSet};

use tracing::{debug, info, warn};

use crate::dag::DagGraph;
use crate::dag::node_info::{NodeInfo, RunState};

/// Applies state transitions to the scheduler's node table.
pub struct StateManager<'a> {
    graph: &'a DagGraph,
    nodes: &'a mut BTreeMap<String, NodeInfo>,
}

impl<'a> StateManager<'a> {
    pub fn new(graph: &'a DagGraph, nodes: &'a mut BTreeMap<String, NodeInfo>) -> Self {
        Self { graph, nodes }
    }

    /// Whether every dependency of `info` finished successfully.
    ///
    /// Dependencies naming no node are logged and treated as satisfied.
    pub fn deps_satisfied_for_info(&self, info: &NodeInfo) -> bool {
        info.deps.iter().all(|dep_name| match self.nodes.get(dep_name) {
            Some(dep) => dep.run_state == RunState::DoneSuccess,
            None => {
                warn!(
                    node = %info.name,
                    dep = %dep_name,
                    "dependency missing from scheduler; ignoring"
                );
                true
            }
        })
    }

    /// Mark every transitive dependent of a failed node as `DoneFailed`.
    ///
    /// Returns the newly failed names (excluding the root).
    pub fn mark_dependents_failed(&mut self, failed: &str) -> Vec<String> {
        let mut stack: Vec<String> = self.graph.dependents_of(failed).to_vec();
        let mut seen: HashSet<String> = HashSet::new();
        let mut newly_failed = Vec::new();

        while let Some(name) = stack.pop() {
            if !seen.insert(name.clone()) {
                continue;
            }
            if let Some(info) = self.nodes.get_mut(&name) {
                if info.run_state == RunState::Pending {
                    info.run_state = RunState::DoneFailed;
                    debug!(node = %info.name, "blocked by failed dependency");
                    newly_failed.push(info.name.clone());
                    stack.extend(self.graph.dependents_of(&name).iter().cloned());
                }
            }
        }

        newly_failed
    }

    /// Move ready `Pending` nodes to `Running`, in input order, without
    /// exceeding `limit` running nodes (`0` = no limit).
    pub fn collect_new_ready(&mut self, limit: usize) -> Vec<String> {
        let running = self
            .nodes
            .values()
            .filter(|n| n.run_state == RunState::Running)
            .count();
        let free = if limit == 0 {
            usize::MAX
        } else {
            limit.saturating_sub(running)
        };

        let mut candidates: Vec<(usize, String)> = self
            .nodes
            .values()
            .filter(|info| info.run_state == RunState::Pending && self.deps_satisfied_for_info(info))
            .map(|info| (info.position, info.name.clone()))
            .collect();
        candidates.sort();

        let mut ready = Vec::new();
        for (_, name) in candidates.into_iter().take(free) {
            if let Some(info) = self.nodes.get_mut(&name) {
                info!(node = %info.name, "dependencies satisfied; scheduling");
                info.run_state = RunState::Running;
                ready.push(name);
            }
        }
        ready
    }

    pub fn all_terminal(&self) -> bool {
        self.nodes.values().all(|info| info.run_state.is_terminal())
    }
}
