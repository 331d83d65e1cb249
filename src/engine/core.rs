// src/engine/core.rs

//! Pure driver state machine.
//!
//! [`DriverCore`] consumes [`DriverEvent`]s and answers with the commands the
//! async shell should execute next. It performs no IO and knows nothing about
//! Tokio, processes or files, so every transition is unit tested directly.

use tracing::warn;

use crate::engine::{DriverEvent, Flow, Outcome, Phase};

/// Command produced by the core, executed by [`crate::engine::Driver`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DriverCommand {
    RunBuilds,
    RunTransform,
    RunDeploy,
    RunCleanup { dry_run: bool },
    EmitManifests,
}

/// Decision returned after handling one event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverStep {
    pub commands: Vec<DriverCommand>,
    /// `false` once the run reached `Done` or `Failed`.
    pub keep_running: bool,
}

#[derive(Debug, Clone)]
pub struct DriverCore {
    flow: Flow,
    phase: Phase,
}

impl DriverCore {
    pub fn new(flow: Flow) -> Self {
        Self {
            flow,
            phase: Phase::Idle,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn flow(&self) -> &Flow {
        &self.flow
    }

    pub fn step(&mut self, event: DriverEvent) -> DriverStep {
        let next = match (self.phase, event) {
            (Phase::Idle, DriverEvent::Start) => {
                Some((Phase::Building, DriverCommand::RunBuilds))
            }

            (Phase::Building, DriverEvent::BuildsFinished(Outcome::Success)) => match self.flow {
                Flow::Build { .. } => return self.finish(Phase::Done),
                _ => Some((Phase::Transforming, DriverCommand::RunTransform)),
            },

            (Phase::Transforming, DriverEvent::TransformFinished(Outcome::Success)) => {
                Some(match self.flow {
                    Flow::Deploy => (Phase::Deploying, DriverCommand::RunDeploy),
                    Flow::Delete { dry_run } => {
                        (Phase::CleaningUp, DriverCommand::RunCleanup { dry_run })
                    }
                    Flow::Render { .. } | Flow::Filter(_) | Flow::Build { .. } => {
                        (Phase::Emitting, DriverCommand::EmitManifests)
                    }
                })
            }

            (Phase::Deploying, DriverEvent::DeployFinished(Outcome::Success))
            | (Phase::CleaningUp, DriverEvent::CleanupFinished(Outcome::Success))
            | (Phase::Emitting, DriverEvent::EmitFinished(Outcome::Success)) => {
                return self.finish(Phase::Done);
            }

            (Phase::Building, DriverEvent::BuildsFinished(Outcome::Failed))
            | (Phase::Transforming, DriverEvent::TransformFinished(Outcome::Failed))
            | (Phase::Deploying, DriverEvent::DeployFinished(Outcome::Failed))
            | (Phase::CleaningUp, DriverEvent::CleanupFinished(Outcome::Failed))
            | (Phase::Emitting, DriverEvent::EmitFinished(Outcome::Failed)) => {
                return self.finish(Phase::Failed);
            }

            (phase, DriverEvent::Cancelled) if !phase.is_terminal() => {
                return self.finish(Phase::Failed);
            }

            (phase, event) => {
                warn!(?phase, ?event, flow = self.flow.name(), "ignoring unexpected driver event");
                None
            }
        };

        match next {
            Some((phase, command)) => {
                self.phase = phase;
                DriverStep {
                    commands: vec![command],
                    keep_running: true,
                }
            }
            None => DriverStep {
                commands: Vec::new(),
                keep_running: !self.phase.is_terminal(),
            },
        }
    }

    fn finish(&mut self, phase: Phase) -> DriverStep {
        self.phase = phase;
        DriverStep {
            commands: Vec::new(),
            keep_running: false,
        }
    }
}
