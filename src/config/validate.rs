// src/config/validate.rs

use std::collections::HashSet;

use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::build::artifact::ArtifactDescriptor;
use crate::build::platform::PlatformMatcher;
use crate::config::model::{
    ConfigFile, DeploySection, DeployerConfig, RawConfigFile, ResourceSelectorSection,
};
use crate::errors::{Result, RolloutError};
use crate::manifest::group_kind::GroupKind;
use crate::manifest::path::FieldPath;

impl TryFrom<RawConfigFile> for ConfigFile {
    type Error = RolloutError;

    fn try_from(raw: RawConfigFile) -> std::result::Result<Self, Self::Error> {
        ensure_has_content(&raw)?;
        let artifacts = resolve_artifacts(&raw)?;
        validate_artifact_dependencies(&artifacts)?;
        validate_artifact_dag(&artifacts)?;
        validate_build_settings(&raw)?;
        validate_resource_selector(&raw.resource_selector)?;
        let deploy = match &raw.deploy {
            Some(section) => Some(resolve_deployer(section)?),
            None => None,
        };
        Ok(ConfigFile::new_unchecked(raw, artifacts, deploy))
    }
}

/// Validate several loaded configs together (config names must be unique).
pub fn validate_config_set(configs: &[ConfigFile]) -> Result<()> {
    let mut seen = HashSet::new();
    for cfg in configs {
        if !seen.insert(cfg.name.as_str()) {
            return Err(RolloutError::ConfigError(format!(
                "configuration name '{}' is used by more than one config file; set [metadata] name",
                cfg.name
            )));
        }
    }
    Ok(())
}

fn ensure_has_content(cfg: &RawConfigFile) -> Result<()> {
    if cfg.build.artifacts.is_empty() && cfg.deploy.is_none() && cfg.manifests.raw.is_empty() {
        return Err(RolloutError::ConfigError(
            "config must define at least one of [[build.artifacts]], [manifests] or [deploy]"
                .to_string(),
        ));
    }
    Ok(())
}

fn resolve_artifacts(cfg: &RawConfigFile) -> Result<Vec<ArtifactDescriptor>> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(cfg.build.artifacts.len());
    for artifact in &cfg.build.artifacts {
        if artifact.image.trim().is_empty() {
            return Err(RolloutError::ConfigError(
                "artifact is missing required field `image`".to_string(),
            ));
        }
        if !seen.insert(artifact.image.as_str()) {
            return Err(RolloutError::ConfigError(format!(
                "artifact image '{}' is defined more than once",
                artifact.image
            )));
        }
        out.push(ArtifactDescriptor::try_from(artifact)?);
    }
    Ok(out)
}

fn validate_artifact_dependencies(artifacts: &[ArtifactDescriptor]) -> Result<()> {
    let names: HashSet<&str> = artifacts.iter().map(|a| a.image_name.as_str()).collect();
    for artifact in artifacts {
        for dep in &artifact.dependencies {
            if dep == &artifact.image_name {
                return Err(RolloutError::SelfDependency(artifact.image_name.clone()));
            }
            if !names.contains(dep.as_str()) {
                return Err(RolloutError::ConfigError(format!(
                    "artifact '{}' requires unknown artifact '{}'",
                    artifact.image_name, dep
                )));
            }
        }
    }
    Ok(())
}

fn validate_artifact_dag(artifacts: &[ArtifactDescriptor]) -> Result<()> {
    // Edge direction: dependency -> dependent.
    let mut graph: DiGraphMap<&str, ()> = DiGraphMap::new();

    for artifact in artifacts {
        graph.add_node(artifact.image_name.as_str());
    }
    for artifact in artifacts {
        for dep in &artifact.dependencies {
            graph.add_edge(dep.as_str(), artifact.image_name.as_str(), ());
        }
    }

    match toposort(&graph, None) {
        Ok(_order) => Ok(()),
        Err(cycle) => Err(RolloutError::CircularDependency(cycle.node_id().to_string())),
    }
}

fn validate_build_settings(cfg: &RawConfigFile) -> Result<()> {
    PlatformMatcher::parse(&cfg.build.platforms)?;

    if let Some(remote) = &cfg.build.remote {
        if remote.bucket.trim().is_empty() {
            return Err(RolloutError::ConfigError(
                "[build.remote] is missing required field `bucket`".to_string(),
            ));
        }
    }
    Ok(())
}

fn validate_resource_selector(section: &ResourceSelectorSection) -> Result<()> {
    for rule in section.allow.iter().chain(section.deny.iter()) {
        GroupKind::parse(&rule.group_kind)?;
        for path in rule.image.iter().chain(rule.labels.iter()) {
            FieldPath::parse(path)?;
        }
    }
    Ok(())
}

fn resolve_deployer(section: &DeploySection) -> Result<DeployerConfig> {
    match (&section.kubectl, &section.terraform) {
        (Some(k), None) => Ok(DeployerConfig::Kubectl(k.clone())),
        (None, Some(t)) => {
            validate_units(t)?;
            Ok(DeployerConfig::Terraform(t.clone()))
        }
        (None, None) => Err(RolloutError::ConfigError(
            "[deploy] must configure exactly one backend (kubectl or terraform), found none"
                .to_string(),
        )),
        (Some(_), Some(_)) => Err(RolloutError::ConfigError(
            "[deploy] must configure exactly one backend, found both kubectl and terraform"
                .to_string(),
        )),
    }
}

fn validate_units(tf: &crate::config::model::TerraformDeploy) -> Result<()> {
    let mut seen = HashSet::new();
    for unit in &tf.units {
        if unit.name.trim().is_empty() {
            return Err(RolloutError::ConfigError(
                "terraform unit is missing required field `name`".to_string(),
            ));
        }
        if !seen.insert(unit.name.as_str()) {
            return Err(RolloutError::ConfigError(format!(
                "terraform unit name '{}' is not unique",
                unit.name
            )));
        }
    }
    Ok(())
}
