// src/dag/order.rs

//! Dependency ordering for named units.

use std::collections::HashMap;

use tracing::{debug, warn};

use crate::build::artifact::ArtifactDescriptor;
use crate::config::model::DeploymentUnit;
use crate::errors::{Result, RolloutError};

/// Anything with a name and a list of names it depends on.
pub trait DependencyNode {
    fn node_name(&self) -> &str;
    fn node_dependencies(&self) -> &[String];
}

impl DependencyNode for DeploymentUnit {
    fn node_name(&self) -> &str {
        &self.name
    }

    fn node_dependencies(&self) -> &[String] {
        &self.depends_on
    }
}

impl DependencyNode for ArtifactDescriptor {
    fn node_name(&self) -> &str {
        &self.image_name
    }

    fn node_dependencies(&self) -> &[String] {
        &self.dependencies
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VisitState {
    Unvisited,
    InProgress,
    Done,
}

/// Order `units` so every unit comes after its dependencies.
///
/// - Depth-first from each unit in input order; a unit reachable from
///   several dependents appears once, at its first position.
/// - A unit naming itself fails before anything else is visited.
/// - Reaching a unit that is still in progress fails with
///   [`RolloutError::CircularDependency`] naming it. No partial order is returned.
/// - A dependency that names no unit in `units` is logged and skipped.
pub fn order_for_execution<T: DependencyNode>(units: &[T]) -> Result<Vec<&T>> {
    for unit in units {
        if unit
            .node_dependencies()
            .iter()
            .any(|d| d == unit.node_name())
        {
            return Err(RolloutError::SelfDependency(unit.node_name().to_string()));
        }
    }

    let mut index: HashMap<&str, usize> = HashMap::with_capacity(units.len());
    for (i, unit) in units.iter().enumerate() {
        if index.insert(unit.node_name(), i).is_some() {
            return Err(RolloutError::ConfigError(format!(
                "duplicate unit name '{}'",
                unit.node_name()
            )));
        }
    }

    let mut state = vec![VisitState::Unvisited; units.len()];
    let mut ordered: Vec<&T> = Vec::with_capacity(units.len());

    for root in 0..units.len() {
        if state[root] != VisitState::Unvisited {
            continue;
        }

        // (unit index, next dependency to look at)
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];
        state[root] = VisitState::InProgress;

        while let Some(frame) = stack.last_mut() {
            let (current, next) = *frame;
            let deps = units[current].node_dependencies();

            let Some(dep) = deps.get(next) else {
                stack.pop();
                state[current] = VisitState::Done;
                ordered.push(&units[current]);
                continue;
            };
            frame.1 += 1;

            let Some(&dep_idx) = index.get(dep.as_str()) else {
                warn!(
                    unit = %units[current].node_name(),
                    dependency = %dep,
                    "dependency not found; skipping"
                );
                continue;
            };

            match state[dep_idx] {
                VisitState::Done => {}
                VisitState::InProgress => {
                    return Err(RolloutError::CircularDependency(dep.clone()));
                }
                VisitState::Unvisited => {
                    state[dep_idx] = VisitState::InProgress;
                    stack.push((dep_idx, 0));
                }
            }
        }
    }

    debug!(
        order = ?ordered.iter().map(|u| u.node_name()).collect::<Vec<_>>(),
        "computed execution order"
    );
    Ok(ordered)
}
