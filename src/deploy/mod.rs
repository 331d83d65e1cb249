// src/deploy/mod.rs

//! Deploy backends.
//!
//! The driver only sees [`Deployer`]. A backend that manages several
//! independently deployable units (terraform) orders them itself with
//! [`crate::dag::order_for_execution`].

use std::fmt::Debug;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;

use crate::build::BuiltArtifact;
use crate::errors::Result;
use crate::exec::BoxFuture;
use crate::manifest::ManifestListByConfig;

pub mod capabilities;
pub mod kubectl;
pub mod mux;
pub mod terraform;

pub use capabilities::{
    Accessor, Capabilities, Debugger, DeployStatus, Logger, StatusMonitor, Syncer,
};
pub use kubectl::KubectlDeployer;
pub use mux::DeployerMux;
pub use terraform::TerraformDeployer;

/// Plan output sink for dry runs.
pub type PlanWriter<'a> = &'a mut (dyn Write + Send);

/// Contract every deploy backend implements.
pub trait Deployer: Send + Sync + Debug {
    /// Name of the configuration this deployer was built from. Unique per
    /// loaded configuration.
    fn config_name(&self) -> &str;

    /// Deploy `builds` / `manifests`. Safe to call repeatedly.
    fn deploy<'a>(
        &'a self,
        builds: &'a [BuiltArtifact],
        manifests: &'a ManifestListByConfig,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>>;

    /// Undo what [`Deployer::deploy`] did.
    ///
    /// With `dry_run`, writes one plan line per unit to `out` and runs nothing.
    fn cleanup<'a>(
        &'a self,
        dry_run: bool,
        manifests: &'a ManifestListByConfig,
        cancel: &'a CancellationToken,
        out: PlanWriter<'a>,
    ) -> BoxFuture<'a, Result<()>>;

    /// Files whose change should trigger a redeploy.
    fn dependencies(&self) -> Result<Vec<PathBuf>>;

    fn capabilities(&self) -> &Capabilities;

    fn debugger(&self) -> Arc<dyn Debugger> {
        Arc::clone(&self.capabilities().debugger)
    }

    fn logger(&self) -> Arc<dyn Logger> {
        Arc::clone(&self.capabilities().logger)
    }

    fn accessor(&self) -> Arc<dyn Accessor> {
        Arc::clone(&self.capabilities().accessor)
    }

    fn syncer(&self) -> Arc<dyn Syncer> {
        Arc::clone(&self.capabilities().syncer)
    }

    fn status_monitor(&self) -> Arc<dyn StatusMonitor> {
        Arc::clone(&self.capabilities().status_monitor)
    }

    /// Correlate built images with what was deployed. Empty input is fine.
    fn track_build_artifacts(&self, builds: &[BuiltArtifact], deployed: &[BuiltArtifact]);

    /// Images that exist only locally and must be made available to the target.
    fn register_local_images(&self, images: &[BuiltArtifact]);
}
