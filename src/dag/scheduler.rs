// src/dag/scheduler.rs

use std::collections::BTreeMap;

use tracing::{debug, info, warn};

use crate::dag::graph::DagGraph;
use crate::dag::node_info::{NodeInfo, RunState};
use crate::dag::order::DependencyNode;
use crate::dag::scheduler_step::SchedulerStep;
use crate::dag::state_manager::StateManager;

/// Decides which artifacts may be built next.
///
/// Holds the dependency graph plus the state of every node for a single
/// run:
/// - a node becomes ready once all its dependencies succeeded
/// - at most `concurrency` nodes run at once (`0` = unbounded)
/// - a failure fails every pending dependent
///
/// The scheduler does no I/O; the build runner drives it.
#[derive(Debug)]
pub struct BuildScheduler {
    graph: DagGraph,
    nodes: BTreeMap<String, NodeInfo>,
    concurrency: usize,
}

impl BuildScheduler {
    pub fn new<T: DependencyNode>(items: &[T], concurrency: usize) -> Self {
        let graph = DagGraph::from_nodes(items);
        let nodes = items
            .iter()
            .enumerate()
            .map(|(position, item)| {
                let name = item.node_name().to_string();
                let info = NodeInfo {
                    deps: graph.dependencies_of(&name).to_vec(),
                    name: name.clone(),
                    position,
                    run_state: RunState::Pending,
                };
                (name, info)
            })
            .collect();

        Self {
            graph,
            nodes,
            concurrency,
        }
    }

    /// Release the first batch of ready nodes.
    pub fn start(&mut self) -> SchedulerStep {
        let mut manager = StateManager::new(&self.graph, &mut self.nodes);
        let newly_scheduled = manager.collect_new_ready(self.concurrency);
        debug!(ready = ?newly_scheduled, "scheduler started");
        SchedulerStep {
            newly_scheduled,
            newly_failed: Vec::new(),
            finished: self.is_finished(),
        }
    }

    /// Record the outcome of a running node.
    pub fn complete(&mut self, name: &str, success: bool) -> SchedulerStep {
        let mut newly_failed = Vec::new();

        let failed = match self.nodes.get_mut(name) {
            Some(info) if info.run_state == RunState::Running => {
                info.run_state = if success {
                    RunState::DoneSuccess
                } else {
                    RunState::DoneFailed
                };
                !success
            }
            Some(info) => {
                warn!(node = %name, state = ?info.run_state, "completion for a node that is not running; ignoring");
                false
            }
            None => {
                warn!(node = %name, "completion for unknown node; ignoring");
                false
            }
        };

        if failed {
            warn!(node = %name, "failed; failing dependents");
            newly_failed.push(name.to_string());
            let mut manager = StateManager::new(&self.graph, &mut self.nodes);
            newly_failed.extend(manager.mark_dependents_failed(name));
        } else {
            debug!(node = %name, "completed");
        }

        let mut manager = StateManager::new(&self.graph, &mut self.nodes);
        let newly_scheduled = manager.collect_new_ready(self.concurrency);
        let finished = self.is_finished();
        if finished {
            info!("all nodes finished");
        }

        SchedulerStep {
            newly_scheduled,
            newly_failed,
            finished,
        }
    }

    /// Fail every node that is not yet terminal (used on cancellation).
    pub fn abort(&mut self) -> Vec<String> {
        let mut aborted = Vec::new();
        for info in self.nodes.values_mut() {
            if !info.run_state.is_terminal() {
                info.run_state = RunState::DoneFailed;
                aborted.push(info.name.clone());
            }
        }
        aborted
    }

    pub fn is_finished(&self) -> bool {
        self.nodes.values().all(|info| info.run_state.is_terminal())
    }

    pub fn state_of(&self, name: &str) -> Option<RunState> {
        self.nodes.get(name).map(|info| info.run_state)
    }

    pub fn running(&self) -> usize {
        self.nodes
            .values()
            .filter(|info| info.run_state == RunState::Running)
            .count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct N(&'static str, Vec<String>);

    impl DependencyNode for N {
        fn node_name(&self) -> &str {
            self.0
        }
        fn node_dependencies(&self) -> &[String] {
            &self.1
        }
    }

    fn n(name: &'static str, deps: &[&str]) -> N {
        N(name, deps.iter().map(|d| d.to_string()).collect())
    }

    #[test]
    fn releases_dependents_after_success() {
        let items = vec![n("app", &["base"]), n("base", &[]), n("tools", &[])];
        let mut s = BuildScheduler::new(&items, 0);

        let first = s.start();
        assert_eq!(first.newly_scheduled, vec!["base", "tools"]);

        let step = s.complete("base", true);
        assert_eq!(step.newly_scheduled, vec!["app"]);
        assert!(!step.finished);

        s.complete("tools", true);
        let last = s.complete("app", true);
        assert!(last.finished);
    }

    #[test]
    fn concurrency_limit_is_respected() {
        let items = vec![n("a", &[]), n("b", &[]), n("c", &[])];
        let mut s = BuildScheduler::new(&items, 2);

        assert_eq!(s.start().newly_scheduled, vec!["a", "b"]);
        assert_eq!(s.running(), 2);
        assert_eq!(s.complete("b", true).newly_scheduled, vec!["c"]);
    }

    #[test]
    fn failure_propagates_to_dependents() {
        let items = vec![n("base", &[]), n("mid", &["base"]), n("top", &["mid"]), n("other", &[])];
        let mut s = BuildScheduler::new(&items, 0);
        s.start();

        let step = s.complete("base", false);
        assert_eq!(step.newly_failed, vec!["base", "mid", "top"]);
        assert_eq!(s.state_of("top"), Some(RunState::DoneFailed));
        assert_eq!(s.state_of("other"), Some(RunState::Running));

        assert!(s.complete("other", true).finished);
    }
}
