// src/dag/scheduler_step.rs

/// Structured result of a single scheduler "step".
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SchedulerStep {
    /// Nodes that became ready to start as a result of this step.
    pub newly_scheduled: Vec<String>,
    /// Nodes newly marked as failed in this step (the failed node itself
    /// and every dependent blocked by it).
    pub newly_failed: Vec<String>,
    /// Whether every node is now terminal.
    pub finished: bool,
}
