// src/build/spec.rs

//! Remote build specifications.
//!
//! [`build_spec_for`] turns one artifact into a [`BuildSpec`]: the backend
//! constructor fills in only its own steps, then [`decorate`] applies the
//! settings shared by every backend (source, sizing, logging, timeout,
//! service account, secrets).

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::build::artifact::{
    ArtifactDescriptor, ArtifactKind, BuildpackArtifact, DockerArtifact, JibArtifact, JibTool,
    KanikoArtifact, KoArtifact, PackerArtifact,
};
use crate::build::platform::PlatformMatcher;
use crate::config::model::RemoteBuildConfig;
use crate::errors::{Result, RolloutError};
use crate::manifest::image::ImageReference;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildSpec {
    #[serde(default)]
    pub steps: Vec<BuildStep>,
    /// Images pushed by the build service once all steps succeed.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub images: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub options: Option<BuildOptions>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub service_account: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logs_bucket: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Source>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub available_secrets: Option<Secrets>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildStep {
    /// Container image running the step.
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub entrypoint: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dir: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub secret_env: Vec<String>,
}

impl BuildStep {
    fn new(image: &str) -> Self {
        Self {
            name: image.to_string(),
            ..Default::default()
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuildOptions {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub disk_size_gb: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub machine_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pool: Option<PoolOption>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub logging: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_streaming_option: Option<String>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolOption {
    pub name: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Source {
    pub storage_source: StorageSource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StorageSource {
    pub bucket: String,
    pub object: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Secrets {
    #[serde(default)]
    pub secret_manager: Vec<SecretManagerSecret>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SecretManagerSecret {
    pub env: String,
    pub version_name: String,
}

/// Build the full remote spec for `artifact`, tagged `tag`, with its source
/// archive at `bucket/object`.
pub fn build_spec_for(
    artifact: &ArtifactDescriptor,
    tag: &str,
    platforms: &PlatformMatcher,
    remote: &RemoteBuildConfig,
    bucket: &str,
    object: &str,
) -> Result<BuildSpec> {
    let mut spec = spec_for_artifact(artifact, tag, platforms, remote)?;
    decorate(&mut spec, remote, bucket, object);
    Ok(spec)
}

/// Backend-specific part of the spec.
///
/// Fails without building anything when the backend cannot produce any of
/// the requested platforms.
pub fn spec_for_artifact(
    artifact: &ArtifactDescriptor,
    tag: &str,
    platforms: &PlatformMatcher,
    remote: &RemoteBuildConfig,
) -> Result<BuildSpec> {
    check_platforms(artifact, platforms)?;
    debug!(artifact = %artifact.image_name, backend = artifact.kind.name(), "building remote spec");

    let spec = match &artifact.kind {
        ArtifactKind::Docker(d) => docker_spec(d, tag, platforms, remote),
        ArtifactKind::Kaniko(k) => kaniko_spec(k, tag, remote),
        ArtifactKind::Buildpacks(b) => buildpack_spec(b, tag, remote),
        ArtifactKind::Jib(j) => jib_spec(j, tag, platforms, remote),
        ArtifactKind::Ko(k) => ko_spec(k, tag, platforms, remote),
        ArtifactKind::Packer(p) => packer_spec(p, &artifact.image_name, tag, remote),
    };
    Ok(spec)
}

fn check_platforms(artifact: &ArtifactDescriptor, requested: &PlatformMatcher) -> Result<()> {
    let supported = artifact.kind.supported_platforms();
    if supported.is_all() || requested.is_empty() {
        return Ok(());
    }
    if requested.intersect(&supported).is_empty() {
        return Err(RolloutError::PlatformIncompatible {
            artifact: artifact.image_name.clone(),
            requested: requested.to_string(),
            supported: supported.to_string(),
        });
    }
    Ok(())
}

/// Settings applied uniformly on top of every backend's spec.
pub fn decorate(spec: &mut BuildSpec, remote: &RemoteBuildConfig, bucket: &str, object: &str) {
    spec.logs_bucket = Some(bucket.to_string());
    spec.source = Some(Source {
        storage_source: StorageSource {
            bucket: bucket.to_string(),
            object: object.to_string(),
        },
    });

    let options = spec.options.get_or_insert_with(BuildOptions::default);
    options.disk_size_gb = remote.disk_size_gb;
    options.machine_type = remote.machine_type.clone();
    options.pool = remote
        .worker_pool
        .as_ref()
        .filter(|p| !p.is_empty())
        .map(|name| PoolOption { name: name.clone() });
    options.logging = remote.logging.clone();
    options.log_streaming_option = remote.log_streaming_option.clone();

    spec.timeout = remote.timeout.clone();
    spec.service_account = remote.service_account.clone();

    let secrets: Vec<SecretManagerSecret> = remote
        .secrets
        .iter()
        .map(|s| SecretManagerSecret {
            env: s.env.clone(),
            version_name: s.version_name.clone(),
        })
        .collect();
    let secret_envs: Vec<String> = secrets.iter().map(|s| s.env.clone()).collect();
    if !secret_envs.is_empty() {
        for step in &mut spec.steps {
            for env in &secret_envs {
                if !step.secret_env.contains(env) {
                    step.secret_env.push(env.clone());
                }
            }
        }
    }
    spec.available_secrets = Some(Secrets {
        secret_manager: secrets,
    });
}

/// `--platform` value for tools that accept one, if a specific set was asked for.
fn platform_flag(platforms: &PlatformMatcher) -> Option<String> {
    if platforms.is_empty() || platforms.is_all() {
        return None;
    }
    Some(
        platforms
            .platforms()
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(","),
    )
}

fn docker_spec(
    d: &DockerArtifact,
    tag: &str,
    platforms: &PlatformMatcher,
    remote: &RemoteBuildConfig,
) -> BuildSpec {
    let mut args = vec![
        "build".to_string(),
        "--tag".to_string(),
        tag.to_string(),
        "-f".to_string(),
        d.dockerfile.clone(),
    ];
    for (k, v) in &d.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{k}={v}"));
    }
    if let Some(target) = &d.target {
        args.push("--target".to_string());
        args.push(target.clone());
    }
    if let Some(p) = platform_flag(platforms) {
        args.push("--platform".to_string());
        args.push(p);
    }
    args.push(".".to_string());

    let mut step = BuildStep::new(&remote.docker_image);
    step.args = args;
    BuildSpec {
        steps: vec![step],
        images: vec![tag.to_string()],
        ..Default::default()
    }
}

fn kaniko_spec(k: &KanikoArtifact, tag: &str, remote: &RemoteBuildConfig) -> BuildSpec {
    let mut args = vec![
        "--destination".to_string(),
        tag.to_string(),
        "--dockerfile".to_string(),
        k.dockerfile.clone(),
        "--context".to_string(),
        "dir:///workspace".to_string(),
    ];
    for (key, v) in &k.build_args {
        args.push("--build-arg".to_string());
        args.push(format!("{key}={v}"));
    }
    if let Some(target) = &k.target {
        args.push("--target".to_string());
        args.push(target.clone());
    }
    if k.cache {
        args.push("--cache=true".to_string());
    }

    let mut step = BuildStep::new(&remote.kaniko_image);
    step.args = args;
    // Kaniko pushes the image itself.
    BuildSpec {
        steps: vec![step],
        ..Default::default()
    }
}

fn buildpack_spec(b: &BuildpackArtifact, tag: &str, remote: &RemoteBuildConfig) -> BuildSpec {
    let mut args = vec![
        "build".to_string(),
        tag.to_string(),
        "--builder".to_string(),
        b.builder.clone(),
    ];
    if let Some(run_image) = &b.run_image {
        args.push("--run-image".to_string());
        args.push(run_image.clone());
    }
    for env in &b.env {
        args.push("--env".to_string());
        args.push(env.clone());
    }

    let mut step = BuildStep::new(&remote.pack_image);
    step.args = args;
    BuildSpec {
        steps: vec![step],
        images: vec![tag.to_string()],
        ..Default::default()
    }
}

fn jib_spec(
    j: &JibArtifact,
    tag: &str,
    platforms: &PlatformMatcher,
    remote: &RemoteBuildConfig,
) -> BuildSpec {
    let mut args = vec![format!("-Djib.to.image={tag}")];
    if let Some(p) = platform_flag(platforms) {
        args.push(format!("-Djib.from.platforms={p}"));
    }

    let step = match j.tool {
        JibTool::Maven => {
            if let Some(project) = &j.project {
                args.push("--projects".to_string());
                args.push(project.clone());
                args.push("--also-make".to_string());
            }
            args.extend(j.args.iter().cloned());
            args.push("prepare-package".to_string());
            args.push("jib:build".to_string());
            BuildStep {
                name: remote.maven_image.clone(),
                entrypoint: Some("mvn".to_string()),
                args,
                ..Default::default()
            }
        }
        JibTool::Gradle => {
            args.extend(j.args.iter().cloned());
            args.push(match &j.project {
                Some(project) => format!(":{project}:jib"),
                None => "jib".to_string(),
            });
            BuildStep {
                name: remote.gradle_image.clone(),
                entrypoint: Some("gradle".to_string()),
                args,
                ..Default::default()
            }
        }
    };

    BuildSpec {
        steps: vec![step],
        ..Default::default()
    }
}

fn ko_spec(
    k: &KoArtifact,
    tag: &str,
    platforms: &PlatformMatcher,
    remote: &RemoteBuildConfig,
) -> BuildSpec {
    let reference = ImageReference::parse(tag);
    let mut args = vec!["build".to_string(), "--bare".to_string()];
    if let Some(t) = &reference.tag {
        args.push("--tags".to_string());
        args.push(t.clone());
    }
    if let Some(p) = platform_flag(platforms) {
        args.push("--platform".to_string());
        args.push(p);
    }
    args.extend(k.flags.iter().cloned());
    args.push(k.main.clone());

    let mut env = vec![format!("KO_DOCKER_REPO={}", reference.base_name)];
    env.extend(k.env.iter().cloned());

    BuildSpec {
        steps: vec![BuildStep {
            name: remote.ko_image.clone(),
            entrypoint: Some("ko".to_string()),
            args,
            env,
            ..Default::default()
        }],
        ..Default::default()
    }
}

fn packer_spec(p: &PackerArtifact, image_name: &str, tag: &str, remote: &RemoteBuildConfig) -> BuildSpec {
    let init = BuildStep {
        name: remote.packer_image.clone(),
        args: vec!["init".to_string(), p.template.clone()],
        env: p.env.clone(),
        ..Default::default()
    };

    let mut args = vec!["build".to_string()];
    args.extend(p.build_args.iter().cloned());
    args.extend([
        "-var".to_string(),
        format!("image_name={image_name}"),
        "-var".to_string(),
        format!("image_tag={tag}"),
        p.template.clone(),
    ]);

    let build = BuildStep {
        name: remote.packer_image.clone(),
        args,
        env: p.env.clone(),
        ..Default::default()
    };

    BuildSpec {
        steps: vec![init, build],
        ..Default::default()
    }
}
