// src/deploy/kubectl.rs

//! Kubectl deployer: pipes the rendered manifests of its configuration to
//! `kubectl apply` / `kubectl delete`.

use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::build::BuiltArtifact;
use crate::config::model::KubectlDeploy;
use crate::deploy::capabilities::{
    ArtifactTracker, Capabilities, DeployStatus, RecordedStatus, TracingLogger, TrackedArtifacts,
};
use crate::deploy::{Deployer, PlanWriter};
use crate::errors::Result;
use crate::exec::{BoxFuture, Invocation, ProcessRunner, run_checked};
use crate::manifest::images::referenced_images;
use crate::manifest::{ManifestList, ManifestListByConfig};
use crate::types::Stage;

const BACKEND: &str = "kubectl";

#[derive(Debug)]
pub struct KubectlDeployer {
    config_name: String,
    config: KubectlDeploy,
    /// Manifest source files, reported as dependencies.
    manifest_files: Vec<PathBuf>,
    runner: Arc<dyn ProcessRunner>,
    status: Arc<RecordedStatus>,
    capabilities: Capabilities,
    tracker: ArtifactTracker,
}

impl KubectlDeployer {
    pub fn new(
        config_name: impl Into<String>,
        config: KubectlDeploy,
        manifest_files: Vec<PathBuf>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        let status = Arc::new(RecordedStatus::default());
        let capabilities = Capabilities::default()
            .with_logger(Arc::new(TracingLogger))
            .with_status_monitor(status.clone());
        Self {
            config_name: config_name.into(),
            config,
            manifest_files,
            runner,
            status,
            capabilities,
            tracker: ArtifactTracker::default(),
        }
    }

    /// `kubectl [--context C] [--namespace N] <global flags>`.
    fn base(&self) -> Invocation {
        let mut inv = Invocation::new(BACKEND);
        if let Some(ctx) = &self.config.kube_context {
            inv = inv.arg("--context").arg(ctx.as_str());
        }
        if let Some(ns) = &self.config.default_namespace {
            inv = inv.arg("--namespace").arg(ns.as_str());
        }
        inv.args(self.config.flags.global.iter().map(String::as_str))
    }

    pub fn apply_invocation(&self, stream: String) -> Invocation {
        self.base()
            .arg("apply")
            .args(self.config.flags.apply.iter().map(String::as_str))
            .args(["-f", "-"])
            .stdin(stream)
    }

    pub fn delete_invocation(&self, stream: String) -> Invocation {
        self.base()
            .args(["delete", "--ignore-not-found=true"])
            .args(self.config.flags.delete.iter().map(String::as_str))
            .args(["-f", "-"])
            .stdin(stream)
    }

    /// Builds seen so far, and those whose tag the applied manifests reference.
    pub fn tracked(&self) -> TrackedArtifacts {
        self.tracker.snapshot()
    }

    fn own_manifests<'m>(&self, manifests: &'m ManifestListByConfig) -> Option<&'m ManifestList> {
        manifests
            .get(&self.config_name)
            .filter(|list| !list.is_empty())
    }
}

impl Deployer for KubectlDeployer {
    fn config_name(&self) -> &str {
        &self.config_name
    }

    fn deploy<'a>(
        &'a self,
        builds: &'a [BuiltArtifact],
        manifests: &'a ManifestListByConfig,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(list) = self.own_manifests(manifests) else {
                info!(config = %self.config_name, "no manifests to apply");
                self.status.set(DeployStatus::Succeeded);
                return Ok(());
            };

            self.status.set(DeployStatus::Pending);
            let invocation = self.apply_invocation(list.render()?);
            match run_checked(self.runner.as_ref(), invocation, cancel, BACKEND, Stage::Apply).await {
                Ok(output) => {
                    let logger = self.logger();
                    for line in output.stdout_string().lines() {
                        logger.write_line(&self.config_name, line);
                    }
                    self.status.set(DeployStatus::Succeeded);
                    let images = referenced_images(list);
                    let deployed: Vec<BuiltArtifact> = builds
                        .iter()
                        .filter(|b| images.contains(&b.tag))
                        .cloned()
                        .collect();
                    self.track_build_artifacts(builds, &deployed);
                    info!(config = %self.config_name, resources = list.len(), "applied manifests");
                    Ok(())
                }
                Err(err) => {
                    self.status.set(DeployStatus::Failed(err.to_string()));
                    Err(err)
                }
            }
        })
    }

    fn cleanup<'a>(
        &'a self,
        dry_run: bool,
        manifests: &'a ManifestListByConfig,
        cancel: &'a CancellationToken,
        out: PlanWriter<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            let Some(list) = self.own_manifests(manifests) else {
                info!(config = %self.config_name, "no manifests to delete");
                return Ok(());
            };

            if dry_run {
                for doc in list.iter() {
                    let kind = doc
                        .group_kind()
                        .map(|gk| gk.to_string())
                        .unwrap_or_else(|| "<unknown>".to_string());
                    let name = doc.name().unwrap_or("<unnamed>");
                    match doc.namespace().or(self.config.default_namespace.as_deref()) {
                        Some(ns) => writeln!(out, "would delete {kind} {ns}/{name}")?,
                        None => writeln!(out, "would delete {kind} {name}")?,
                    }
                }
                return Ok(());
            }

            let invocation = self.delete_invocation(list.render()?);
            run_checked(self.runner.as_ref(), invocation, cancel, BACKEND, Stage::Destroy).await?;
            info!(config = %self.config_name, resources = list.len(), "deleted manifests");
            Ok(())
        })
    }

    fn dependencies(&self) -> Result<Vec<PathBuf>> {
        Ok(self.manifest_files.clone())
    }

    fn capabilities(&self) -> &Capabilities {
        &self.capabilities
    }

    fn track_build_artifacts(&self, builds: &[BuiltArtifact], deployed: &[BuiltArtifact]) {
        self.tracker.track(builds, deployed);
    }

    fn register_local_images(&self, images: &[BuiltArtifact]) {
        self.tracker.register_local(images);
    }
}
