// src/dag/node_info.rs

//! Per-node state for a build run.

/// State of one artifact within the current build run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunState {
    /// Waiting on dependencies or on a free build slot.
    Pending,
    /// Handed to a builder.
    Running,
    DoneSuccess,
    /// Failed, or blocked by a failed dependency.
    DoneFailed,
}

impl RunState {
    pub fn is_terminal(self) -> bool {
        matches!(self, RunState::DoneSuccess | RunState::DoneFailed)
    }
}

#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub name: String,
    /// Position in the input; ready nodes are released in this order.
    pub position: usize,
    pub deps: Vec<String>,
    pub run_state: RunState,
}
