// src/deploy/terraform.rs

//! Terraform deployer: one `init` / `workspace` / `apply` sequence per unit.
//!
//! Units run strictly one after another in dependency order; a unit may read
//! outputs of the units before it.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::build::BuiltArtifact;
use crate::config::model::{DeploymentUnit, TerraformDeploy};
use crate::dag::order_for_execution;
use crate::deploy::capabilities::{ArtifactTracker, Capabilities, TracingLogger};
use crate::deploy::{Deployer, PlanWriter};
use crate::errors::{Result, RolloutError};
use crate::exec::{BoxFuture, Invocation, ProcessOutput, ProcessRunner, run_checked};
use crate::manifest::ManifestListByConfig;
use crate::types::Stage;

const BACKEND: &str = "terraform";

#[derive(Debug)]
pub struct TerraformDeployer {
    config_name: String,
    base_dir: PathBuf,
    units: Vec<DeploymentUnit>,
    runner: Arc<dyn ProcessRunner>,
    capabilities: Capabilities,
    tracker: ArtifactTracker,
}

impl TerraformDeployer {
    pub fn new(
        config_name: impl Into<String>,
        base_dir: impl Into<PathBuf>,
        config: TerraformDeploy,
        runner: Arc<dyn ProcessRunner>,
    ) -> Self {
        Self {
            config_name: config_name.into(),
            base_dir: base_dir.into(),
            units: config.units,
            runner,
            capabilities: Capabilities::default().with_logger(Arc::new(TracingLogger)),
            tracker: ArtifactTracker::default(),
        }
    }

    /// Units in execution order.
    pub fn ordered_units(&self) -> Result<Vec<&DeploymentUnit>> {
        order_for_execution(&self.units)
    }

    fn unit_dir(&self, unit: &DeploymentUnit) -> PathBuf {
        let dir = Path::new(&unit.dir);
        if dir.is_absolute() {
            dir.to_path_buf()
        } else {
            self.base_dir.join(dir)
        }
    }

    /// `terraform init`, then `workspace select -or-create` if set, then `apply`.
    pub fn deploy_invocations(&self, unit: &DeploymentUnit) -> Vec<(Stage, Invocation)> {
        let dir = self.unit_dir(unit);

        let mut init = Invocation::new(BACKEND).arg("init");
        for (key, value) in &unit.backend_config {
            init = init.arg(format!("-backend-config={key}={value}"));
        }
        let mut steps = vec![(Stage::Init, init.current_dir(&dir))];

        if let Some(workspace) = &unit.workspace {
            steps.push((
                Stage::Workspace,
                Invocation::new(BACKEND)
                    .args(["workspace", "select", "-or-create", workspace.as_str()])
                    .current_dir(&dir),
            ));
        }

        let mut apply = with_inputs(Invocation::new(BACKEND).arg("apply"), unit);
        if unit.auto_approve {
            apply = apply.arg("-auto-approve");
        }
        steps.push((Stage::Apply, apply.current_dir(&dir)));
        steps
    }

    /// `terraform destroy`, always auto-approved.
    pub fn destroy_invocation(&self, unit: &DeploymentUnit) -> Invocation {
        with_inputs(Invocation::new(BACKEND).arg("destroy"), unit)
            .arg("-auto-approve")
            .current_dir(self.unit_dir(unit))
    }

    async fn run(
        &self,
        unit: &DeploymentUnit,
        stage: Stage,
        invocation: Invocation,
        cancel: &CancellationToken,
    ) -> Result<ProcessOutput> {
        let output = run_checked(self.runner.as_ref(), invocation, cancel, BACKEND, stage)
            .await
            .map_err(|err| in_unit(&unit.name, err))?;
        let logger = self.logger();
        for line in output.stdout_string().lines() {
            logger.write_line(&unit.name, line);
        }
        Ok(output)
    }
}

/// Append vars, var files and extra args shared by apply and destroy.
fn with_inputs(mut invocation: Invocation, unit: &DeploymentUnit) -> Invocation {
    for (key, value) in &unit.vars {
        invocation = invocation.arg("-var").arg(format!("{key}={value}"));
    }
    for file in &unit.var_files {
        invocation = invocation.arg("-var-file").arg(file.as_str());
    }
    invocation.args(unit.extra_args.iter().map(String::as_str))
}

fn in_unit(unit: &str, err: RolloutError) -> RolloutError {
    match err {
        RolloutError::BackendExecution {
            backend,
            stage,
            message,
        } => RolloutError::BackendExecution {
            backend,
            stage,
            message: format!("unit '{unit}': {message}"),
        },
        other => other,
    }
}

impl Deployer for TerraformDeployer {
    fn config_name(&self) -> &str {
        &self.config_name
    }

    fn deploy<'a>(
        &'a self,
        _builds: &'a [BuiltArtifact],
        _manifests: &'a ManifestListByConfig,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(config = %self.config_name, units = self.units.len(), "terraform deploy starting");
            for unit in self.ordered_units()? {
                for (stage, invocation) in self.deploy_invocations(unit) {
                    self.run(unit, stage, invocation, cancel).await?;
                }
                info!(unit = %unit.name, "unit applied");
            }
            info!(config = %self.config_name, "terraform deploy finished");
            Ok(())
        })
    }

    fn cleanup<'a>(
        &'a self,
        dry_run: bool,
        _manifests: &'a ManifestListByConfig,
        cancel: &'a CancellationToken,
        out: PlanWriter<'a>,
    ) -> BoxFuture<'a, Result<()>> {
        Box::pin(async move {
            info!(config = %self.config_name, dry_run, "terraform cleanup starting");
            // Same order as deploy.
            for unit in self.ordered_units()? {
                if dry_run {
                    writeln!(
                        out,
                        "would run 'terraform destroy' for unit {} in {}",
                        unit.name,
                        self.unit_dir(unit).display()
                    )?;
                    continue;
                }
                self.run(unit, Stage::Destroy, self.destroy_invocation(unit), cancel)
                    .await?;
                info!(unit = %unit.name, "unit destroyed");
            }
            Ok(())
        })
    }

    fn dependencies(&self) -> Result<Vec<PathBuf>> {
        Ok(self
            .units
            .iter()
            .flat_map(|unit| {
                let dir = self.unit_dir(unit);
                unit.var_files.iter().map(move |f| dir.join(f))
            })
            .collect())
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

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;
    use crate::deploy::capabilities::DeployStatus;
    use crate::exec::RealProcessRunner;

    fn unit(name: &str, deps: &[&str]) -> DeploymentUnit {
        DeploymentUnit {
            name: name.to_string(),
            dir: format!("infra/{name}"),
            depends_on: deps.iter().map(|d| d.to_string()).collect(),
            ..Default::default()
        }
    }

    fn deployer(units: Vec<DeploymentUnit>) -> TerraformDeployer {
        TerraformDeployer::new(
            "infra",
            "/repo",
            TerraformDeploy { units },
            Arc::new(RealProcessRunner),
        )
    }

    #[test]
    fn apply_arguments() {
        let mut u = unit("network", &[]);
        u.backend_config = BTreeMap::from([("bucket".to_string(), "state".to_string())]);
        u.workspace = Some("staging".to_string());
        u.vars = BTreeMap::from([("region".to_string(), "eu-west1".to_string())]);
        u.var_files = vec!["staging.tfvars".to_string()];
        u.extra_args = vec!["-parallelism=2".to_string()];
        u.auto_approve = true;
        let d = deployer(vec![u.clone()]);

        let lines: Vec<String> = d
            .deploy_invocations(&u)
            .iter()
            .map(|(_, inv)| inv.to_string())
            .collect();

        assert_eq!(
            lines,
            vec![
                "terraform init -backend-config=bucket=state",
                "terraform workspace select -or-create staging",
                "terraform apply -var region=eu-west1 -var-file staging.tfvars -parallelism=2 -auto-approve",
            ]
        );
        assert_eq!(
            d.destroy_invocation(&u).to_string(),
            "terraform destroy -var region=eu-west1 -var-file staging.tfvars -parallelism=2 -auto-approve"
        );
        assert_eq!(
            d.destroy_invocation(&u).dir,
            Some(PathBuf::from("/repo/infra/network"))
        );
    }

    #[test]
    fn apply_without_auto_approve() {
        let u = unit("dns", &[]);
        let d = deployer(vec![u.clone()]);
        let steps = d.deploy_invocations(&u);
        assert_eq!(steps.len(), 2);
        assert_eq!(steps[1].1.to_string(), "terraform apply");
    }

    #[test]
    fn units_ordered_by_dependencies() {
        let d = deployer(vec![unit("app", &["db"]), unit("db", &["network"]), unit("network", &[])]);
        let names: Vec<&str> = d.ordered_units().unwrap().iter().map(|u| u.name.as_str()).collect();
        assert_eq!(names, vec!["network", "db", "app"]);
    }

    #[test]
    fn dependencies_are_var_files() {
        let mut u = unit("db", &[]);
        u.var_files = vec!["db.tfvars".to_string()];
        let d = deployer(vec![u]);
        assert_eq!(
            d.dependencies().unwrap(),
            vec![PathBuf::from("/repo/infra/db/db.tfvars")]
        );
    }

    #[test]
    fn only_the_logger_is_real() {
        let d = deployer(vec![]);
        assert_eq!(format!("{:?}", d.logger()), "TracingLogger");
        assert_eq!(format!("{:?}", d.capabilities().debugger), "NoopDebugger");
        assert_eq!(format!("{:?}", d.capabilities().accessor), "NoopAccessor");
        assert_eq!(d.status_monitor().check(), DeployStatus::NotApplicable);
        assert!(d.syncer().sync(&[]).is_ok());
        d.track_build_artifacts(&[], &[]);
        d.register_local_images(&[]);
    }

    #[tokio::test]
    async fn self_dependency_fails_before_running_anything() {
        let d = deployer(vec![unit("a", &[]), unit("b", &["b"])]);
        let err = d
            .deploy(&[], &ManifestListByConfig::new(), &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, RolloutError::SelfDependency(ref n) if n == "b"), "{err:?}");
    }
}
