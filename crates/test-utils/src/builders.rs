#![allow(dead_code)]

use std::path::Path;

use rollout::build::artifact::{BuildpackArtifact, DockerArtifact};
use rollout::build::{ArtifactDescriptor, ArtifactKind};
use rollout::config::model::{DeploySection, MetadataSection};
use rollout::config::{
    ArtifactConfig, ConfigFile, DeploymentUnit, KubectlDeploy, RawConfigFile, TerraformDeploy,
};
use rollout::types::TagPolicy;

/// Builder for `ConfigFile` to simplify test setup.
pub struct ConfigFileBuilder {
    config: RawConfigFile,
}

impl ConfigFileBuilder {
    pub fn new(name: &str) -> Self {
        Self {
            config: RawConfigFile {
                metadata: MetadataSection {
                    name: Some(name.to_string()),
                },
                ..Default::default()
            },
        }
    }

    pub fn with_artifact(mut self, artifact: ArtifactConfig) -> Self {
        self.config.build.artifacts.push(artifact);
        self
    }

    pub fn with_tag_policy(mut self, policy: TagPolicy) -> Self {
        self.config.build.tag_policy = policy;
        self
    }

    pub fn with_concurrency(mut self, concurrency: usize) -> Self {
        self.config.build.concurrency = concurrency;
        self
    }

    pub fn with_manifests(mut self, pattern: &str) -> Self {
        self.config.manifests.raw.push(pattern.to_string());
        self
    }

    pub fn with_setter(mut self, key: &str, value: &str) -> Self {
        self.config
            .manifests
            .setters
            .insert(key.to_string(), value.to_string());
        self
    }

    pub fn with_kubectl(mut self, kubectl: KubectlDeploy) -> Self {
        self.config.deploy = Some(DeploySection {
            kubectl: Some(kubectl),
            terraform: None,
        });
        self
    }

    pub fn with_terraform_units(mut self, units: Vec<DeploymentUnit>) -> Self {
        self.config.deploy = Some(DeploySection {
            kubectl: None,
            terraform: Some(TerraformDeploy { units }),
        });
        self
    }

    pub fn raw(self) -> RawConfigFile {
        self.config
    }

    pub fn build(self) -> ConfigFile {
        ConfigFile::try_from(self.config).expect("Failed to build valid config from builder")
    }

    /// Build as if loaded from `path`; relative paths resolve against its directory.
    pub fn build_at(self, path: impl AsRef<Path>) -> ConfigFile {
        self.build().with_source(path.as_ref())
    }
}

/// `[[build.artifacts]]` entry with a docker backend.
pub fn docker_artifact(image: &str, requires: &[&str]) -> ArtifactConfig {
    ArtifactConfig {
        image: image.to_string(),
        context: Some(image.to_string()),
        requires: requires.iter().map(|r| r.to_string()).collect(),
        docker: Some(DockerArtifact {
            dockerfile: "Dockerfile".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// `[[build.artifacts]]` entry with a buildpacks backend.
pub fn buildpacks_artifact(image: &str) -> ArtifactConfig {
    ArtifactConfig {
        image: image.to_string(),
        context: Some(image.to_string()),
        buildpacks: Some(BuildpackArtifact {
            builder: "paketobuildpacks/builder:base".to_string(),
            ..Default::default()
        }),
        ..Default::default()
    }
}

/// Docker descriptor without going through config validation.
pub fn descriptor(image: &str, deps: &[&str]) -> ArtifactDescriptor {
    ArtifactDescriptor {
        image_name: image.to_string(),
        workspace: image.into(),
        kind: ArtifactKind::Docker(DockerArtifact::default()),
        dependencies: deps.iter().map(|d| d.to_string()).collect(),
    }
}

/// Terraform unit in `infra/<name>`.
pub fn unit(name: &str, deps: &[&str]) -> DeploymentUnit {
    DeploymentUnit {
        name: name.to_string(),
        dir: format!("infra/{name}"),
        depends_on: deps.iter().map(|d| d.to_string()).collect(),
        ..Default::default()
    }
}
