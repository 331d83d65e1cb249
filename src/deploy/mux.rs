// src/deploy/mux.rs

//! Fans deploy/cleanup out to one deployer per loaded configuration.

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::build::BuiltArtifact;
use crate::deploy::{Deployer, PlanWriter};
use crate::errors::{Result, RolloutError};
use crate::manifest::ManifestListByConfig;

/// Deployers keyed by config name, run in configuration order.
#[derive(Debug, Default)]
pub struct DeployerMux {
    deployers: Vec<Arc<dyn Deployer>>,
}

impl DeployerMux {
    pub fn new(deployers: Vec<Arc<dyn Deployer>>) -> Result<Self> {
        let mut seen = HashSet::new();
        for d in &deployers {
            if !seen.insert(d.config_name().to_string()) {
                return Err(RolloutError::ConfigError(format!(
                    "two deployers share the configuration name '{}'",
                    d.config_name()
                )));
            }
        }
        Ok(Self { deployers })
    }

    pub fn is_empty(&self) -> bool {
        self.deployers.is_empty()
    }

    pub fn get(&self, config_name: &str) -> Option<&Arc<dyn Deployer>> {
        self.deployers.iter().find(|d| d.config_name() == config_name)
    }

    pub fn config_names(&self) -> impl Iterator<Item = &str> {
        self.deployers.iter().map(|d| d.config_name())
    }

    pub async fn deploy(
        &self,
        builds: &[BuiltArtifact],
        manifests: &ManifestListByConfig,
        cancel: &CancellationToken,
    ) -> Result<()> {
        for deployer in &self.deployers {
            if cancel.is_cancelled() {
                return Err(RolloutError::Cancelled);
            }
            info!(config = %deployer.config_name(), "deploying");
            deployer.register_local_images(builds);
            deployer.deploy(builds, manifests, cancel).await?;
        }
        Ok(())
    }

    pub async fn cleanup(
        &self,
        dry_run: bool,
        manifests: &ManifestListByConfig,
        cancel: &CancellationToken,
        out: PlanWriter<'_>,
    ) -> Result<()> {
        for deployer in &self.deployers {
            if cancel.is_cancelled() {
                return Err(RolloutError::Cancelled);
            }
            debug!(config = %deployer.config_name(), dry_run, "cleaning up");
            deployer.cleanup(dry_run, manifests, cancel, &mut *out).await?;
        }
        Ok(())
    }

    /// Union of every deployer's dependencies, first occurrence kept.
    pub fn dependencies(&self) -> Result<Vec<PathBuf>> {
        let mut seen = HashSet::new();
        let mut all = Vec::new();
        for deployer in &self.deployers {
            for path in deployer.dependencies()? {
                if seen.insert(path.clone()) {
                    all.push(path);
                }
            }
        }
        Ok(all)
    }
}
