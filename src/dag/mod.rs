// src/dag/mod.rs

//! Dependency ordering and scheduling.
//!
//! - [`order`] orders named units (deployment units, artifacts) so that
//!   dependencies come first, detecting self-dependencies and cycles.
//! - [`graph`] holds adjacency information.
//! - [`scheduler`] releases artifacts for building as their dependencies
//!   finish, within a concurrency limit.
//! - [`state_manager`], [`node_info`], [`scheduler_step`] support the scheduler.

pub mod graph;
pub mod node_info;
pub mod order;
pub mod scheduler;
pub mod scheduler_step;
pub mod state_manager;

pub use graph::DagGraph;
pub use node_info::RunState;
pub use order::{DependencyNode, order_for_execution};
pub use scheduler::BuildScheduler;
pub use scheduler_step::SchedulerStep;
