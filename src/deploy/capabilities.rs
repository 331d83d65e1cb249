// src/deploy/capabilities.rs

//! Optional deployer capabilities.
//!
//! Every deployer carries a [`Capabilities`] record. Slots a backend does not
//! support hold the `Noop*` implementation, so callers can always use them.

use std::fmt::Debug;
use std::path::PathBuf;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::info;

use crate::build::BuiltArtifact;
use crate::errors::Result;

/// Attaches debuggers to deployed workloads.
pub trait Debugger: Send + Sync + Debug {
    fn start(&self, builds: &[BuiltArtifact]) -> Result<()>;
    fn stop(&self);
}

/// Receives output lines from deployed workloads or deploy tools.
pub trait Logger: Send + Sync + Debug {
    fn write_line(&self, source: &str, line: &str);
}

/// Exposes deployed services locally (port forwarding and the like).
pub trait Accessor: Send + Sync + Debug {
    fn start(&self) -> Result<()>;
    fn stop(&self);
}

/// Copies changed files into running workloads.
pub trait Syncer: Send + Sync + Debug {
    fn sync(&self, files: &[PathBuf]) -> Result<()>;
}

/// Outcome of the last deploy as seen by a status monitor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeployStatus {
    /// The backend has no notion of rollout status.
    NotApplicable,
    Pending,
    Succeeded,
    Failed(String),
}

pub trait StatusMonitor: Send + Sync + Debug {
    fn check(&self) -> DeployStatus;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopDebugger;

impl Debugger for NoopDebugger {
    fn start(&self, _builds: &[BuiltArtifact]) -> Result<()> {
        Ok(())
    }
    fn stop(&self) {}
}

/// Discards every line.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopLogger;

impl Logger for NoopLogger {
    fn write_line(&self, _source: &str, _line: &str) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopAccessor;

impl Accessor for NoopAccessor {
    fn start(&self) -> Result<()> {
        Ok(())
    }
    fn stop(&self) {}
}

#[derive(Debug, Clone, Copy, Default)]
pub struct NoopSyncer;

impl Syncer for NoopSyncer {
    fn sync(&self, _files: &[PathBuf]) -> Result<()> {
        Ok(())
    }
}

/// Always reports [`DeployStatus::NotApplicable`].
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMonitor;

impl StatusMonitor for NoopMonitor {
    fn check(&self) -> DeployStatus {
        DeployStatus::NotApplicable
    }
}

/// Forwards tool output to `tracing`.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingLogger;

impl Logger for TracingLogger {
    fn write_line(&self, source: &str, line: &str) {
        info!(source = %source, "{line}");
    }
}

/// Status set by the deployer itself after each deploy.
#[derive(Debug, Default)]
pub struct RecordedStatus {
    status: Mutex<Option<DeployStatus>>,
}

impl RecordedStatus {
    pub fn set(&self, status: DeployStatus) {
        *self.status.lock().unwrap_or_else(PoisonError::into_inner) = Some(status);
    }
}

impl StatusMonitor for RecordedStatus {
    fn check(&self) -> DeployStatus {
        self.status
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
            .unwrap_or(DeployStatus::Pending)
    }
}

/// The capability slots of one deployer. Defaults to all no-ops.
#[derive(Debug, Clone)]
pub struct Capabilities {
    pub debugger: Arc<dyn Debugger>,
    pub logger: Arc<dyn Logger>,
    pub accessor: Arc<dyn Accessor>,
    pub syncer: Arc<dyn Syncer>,
    pub status_monitor: Arc<dyn StatusMonitor>,
}

impl Default for Capabilities {
    fn default() -> Self {
        Self {
            debugger: Arc::new(NoopDebugger),
            logger: Arc::new(NoopLogger),
            accessor: Arc::new(NoopAccessor),
            syncer: Arc::new(NoopSyncer),
            status_monitor: Arc::new(NoopMonitor),
        }
    }
}

impl Capabilities {
    pub fn with_logger(mut self, logger: Arc<dyn Logger>) -> Self {
        self.logger = logger;
        self
    }

    pub fn with_status_monitor(mut self, monitor: Arc<dyn StatusMonitor>) -> Self {
        self.status_monitor = monitor;
        self
    }
}

/// Built and local images a deployer has been told about.
#[derive(Debug, Default)]
pub struct ArtifactTracker {
    inner: Mutex<TrackedArtifacts>,
}

#[derive(Debug, Default, Clone)]
pub struct TrackedArtifacts {
    pub builds: Vec<BuiltArtifact>,
    pub deployed: Vec<BuiltArtifact>,
    pub local_images: Vec<BuiltArtifact>,
}

impl ArtifactTracker {
    fn lock(&self) -> MutexGuard<'_, TrackedArtifacts> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn track(&self, builds: &[BuiltArtifact], deployed: &[BuiltArtifact]) {
        let mut inner = self.lock();
        merge(&mut inner.builds, builds);
        merge(&mut inner.deployed, deployed);
    }

    pub fn register_local(&self, images: &[BuiltArtifact]) {
        merge(&mut self.lock().local_images, images);
    }

    pub fn snapshot(&self) -> TrackedArtifacts {
        self.lock().clone()
    }
}

/// Newer entries replace older ones for the same image name.
fn merge(into: &mut Vec<BuiltArtifact>, items: &[BuiltArtifact]) {
    for item in items {
        match into.iter_mut().find(|a| a.image_name == item.image_name) {
            Some(existing) => *existing = item.clone(),
            None => into.push(item.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn built(name: &str, tag: &str) -> BuiltArtifact {
        BuiltArtifact {
            image_name: name.to_string(),
            tag: tag.to_string(),
            runtime: None,
        }
    }

    #[test]
    fn noop_record_satisfies_every_slot() {
        let caps = Capabilities::default();
        assert!(caps.debugger.start(&[]).is_ok());
        caps.logger.write_line("web", "discarded");
        assert!(caps.accessor.start().is_ok());
        assert!(caps.syncer.sync(&[PathBuf::from("main.go")]).is_ok());
        assert_eq!(caps.status_monitor.check(), DeployStatus::NotApplicable);
    }

    #[test]
    fn recorded_status_starts_pending() {
        let status = RecordedStatus::default();
        assert_eq!(status.check(), DeployStatus::Pending);
        status.set(DeployStatus::Succeeded);
        assert_eq!(status.check(), DeployStatus::Succeeded);
    }

    #[test]
    fn tracker_tolerates_empty_input_and_replaces_by_name() {
        let tracker = ArtifactTracker::default();
        tracker.track(&[], &[]);
        tracker.register_local(&[]);
        assert!(tracker.snapshot().builds.is_empty());

        tracker.track(&[built("web", "web:1")], &[]);
        tracker.track(&[built("web", "web:2")], &[]);
        assert_eq!(tracker.snapshot().builds, vec![built("web", "web:2")]);
    }
}
