// src/engine/mod.rs

//! Orchestration of one rollout invocation.
//!
//! Every flow walks the same phases: Build, then Transform, then a terminal
//! step (deploy, cleanup, or emitting the manifest stream). A failure in any
//! phase aborts the ones after it.
//!
//! The pure state machine lives in [`core`]; [`driver`] is the async shell
//! that executes its commands against a [`context::RunContext`].

use std::path::PathBuf;

pub mod context;
pub mod core;
pub mod driver;

pub use context::{RunContext, RunOptions};
pub use core::{DriverCommand, DriverCore, DriverStep};
pub use driver::Driver;

/// What an invocation ends with.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Flow {
    /// Build only; optionally write the results file.
    Build { file_output: Option<PathBuf> },
    /// Compute tags, transform, emit the stream.
    Render { output: Option<PathBuf> },
    Deploy,
    /// Compute tags, transform, then clean up.
    Delete { dry_run: bool },
    /// Transform a manifest stream read from stdin.
    Filter(FilterOptions),
}

impl Flow {
    pub fn name(&self) -> &'static str {
        match self {
            Flow::Build { .. } => "build",
            Flow::Render { .. } => "render",
            Flow::Deploy => "deploy",
            Flow::Delete { .. } => "delete",
            Flow::Filter(_) => "filter",
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FilterOptions {
    /// Apply the debug stage.
    pub debugging: bool,
    /// Debugger protocols in priority order.
    pub protocols: Vec<String>,
    /// Executable fed the input stream on stdin; its stdout is transformed.
    pub post_renderer: Option<PathBuf>,
    /// Results file from an earlier `build --file-output`.
    pub build_artifacts: Option<PathBuf>,
}

/// Phase of a driver run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Building,
    Transforming,
    Deploying,
    CleaningUp,
    Emitting,
    Done,
    Failed,
}

impl Phase {
    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Done | Phase::Failed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Success,
    Failed,
}

/// Events fed into [`DriverCore::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DriverEvent {
    Start,
    BuildsFinished(Outcome),
    TransformFinished(Outcome),
    DeployFinished(Outcome),
    CleanupFinished(Outcome),
    EmitFinished(Outcome),
    /// Ctrl-C or a parent token fired.
    Cancelled,
}
