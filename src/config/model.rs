// src/config/model.rs

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::Deserialize;

use crate::build::artifact::{
    ArtifactDescriptor, BuildpackArtifact, DockerArtifact, JibArtifact, KanikoArtifact,
    KoArtifact, PackerArtifact,
};
use crate::types::TagPolicy;

/// Top-level configuration as read from a TOML file, before validation.
///
/// ```toml
/// [metadata]
/// name = "web"
///
/// [build]
/// concurrency = 2
///
/// [[build.artifacts]]
/// image = "web"
/// context = "web"
/// [build.artifacts.docker]
/// dockerfile = "Dockerfile"
///
/// [manifests]
/// raw = ["k8s/*.yaml"]
///
/// [deploy.kubectl]
/// ```
///
/// All sections are optional and have reasonable defaults.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct RawConfigFile {
    #[serde(default)]
    pub metadata: MetadataSection,

    #[serde(default)]
    pub build: BuildSection,

    #[serde(default)]
    pub manifests: ManifestsSection,

    #[serde(default)]
    pub deploy: Option<DeploySection>,

    #[serde(default)]
    pub resource_selector: ResourceSelectorSection,
}

/// `[metadata]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MetadataSection {
    /// Name of this configuration. Must be unique across all loaded configs.
    ///
    /// Defaults to the config file stem.
    #[serde(default)]
    pub name: Option<String>,
}

/// `[build]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct BuildSection {
    #[serde(default)]
    pub artifacts: Vec<ArtifactConfig>,

    /// Maximum number of artifacts built at the same time. `0` means no limit.
    #[serde(default)]
    pub concurrency: usize,

    #[serde(default)]
    pub tag_policy: TagPolicy,

    /// Target platforms, e.g. `["linux/amd64"]`. Empty means "host default".
    #[serde(default)]
    pub platforms: Vec<String>,

    #[serde(default)]
    pub insecure_registries: Vec<String>,

    /// When set, artifacts are submitted as remote build specs instead of
    /// being built with local tools.
    #[serde(default)]
    pub remote: Option<RemoteBuildConfig>,
}

/// `[[build.artifacts]]` entry.
///
/// Exactly one of the backend sub-tables must be present; validation turns
/// this into an [`ArtifactDescriptor`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ArtifactConfig {
    pub image: String,

    /// Build context directory, relative to the config file.
    #[serde(default)]
    pub context: Option<String>,

    /// Images that must be built before this one.
    #[serde(default)]
    pub requires: Vec<String>,

    #[serde(default)]
    pub docker: Option<DockerArtifact>,
    #[serde(default)]
    pub kaniko: Option<KanikoArtifact>,
    #[serde(default)]
    pub buildpacks: Option<BuildpackArtifact>,
    #[serde(default)]
    pub jib: Option<JibArtifact>,
    #[serde(default)]
    pub ko: Option<KoArtifact>,
    #[serde(default)]
    pub packer: Option<PackerArtifact>,
}

/// `[build.remote]` section: settings shared by every submitted build spec.
#[derive(Debug, Clone, Deserialize)]
pub struct RemoteBuildConfig {
    /// Bucket receiving source archives and build logs.
    pub bucket: String,

    #[serde(default)]
    pub machine_type: Option<String>,
    #[serde(default)]
    pub disk_size_gb: Option<i64>,
    #[serde(default)]
    pub worker_pool: Option<String>,
    #[serde(default)]
    pub logging: Option<String>,
    #[serde(default)]
    pub log_streaming_option: Option<String>,
    /// Build timeout, e.g. `"600s"`.
    #[serde(default)]
    pub timeout: Option<String>,
    #[serde(default)]
    pub service_account: Option<String>,
    #[serde(default)]
    pub secrets: Vec<SecretConfig>,

    /// Local directory standing in for the bucket; archives and specs are
    /// spooled here for the submission agent.
    #[serde(default = "default_staging_dir")]
    pub staging_dir: PathBuf,

    #[serde(default = "default_docker_image")]
    pub docker_image: String,
    #[serde(default = "default_kaniko_image")]
    pub kaniko_image: String,
    #[serde(default = "default_pack_image")]
    pub pack_image: String,
    #[serde(default = "default_maven_image")]
    pub maven_image: String,
    #[serde(default = "default_gradle_image")]
    pub gradle_image: String,
    #[serde(default = "default_ko_image")]
    pub ko_image: String,
    #[serde(default = "default_packer_image")]
    pub packer_image: String,
}

fn default_staging_dir() -> PathBuf {
    PathBuf::from(".rollout/remote")
}

fn default_docker_image() -> String {
    "gcr.io/cloud-builders/docker".to_string()
}

fn default_kaniko_image() -> String {
    "gcr.io/kaniko-project/executor:latest".to_string()
}

fn default_pack_image() -> String {
    "gcr.io/k8s-skaffold/pack".to_string()
}

fn default_maven_image() -> String {
    "maven:3-eclipse-temurin-17".to_string()
}

fn default_gradle_image() -> String {
    "gradle:8-jdk17".to_string()
}

fn default_ko_image() -> String {
    "ghcr.io/ko-build/ko:latest".to_string()
}

fn default_packer_image() -> String {
    "hashicorp/packer:latest".to_string()
}

impl RemoteBuildConfig {
    /// Minimal remote config for a bucket, everything else defaulted.
    pub fn for_bucket(bucket: impl Into<String>) -> Self {
        Self {
            bucket: bucket.into(),
            machine_type: None,
            disk_size_gb: None,
            worker_pool: None,
            logging: None,
            log_streaming_option: None,
            timeout: None,
            service_account: None,
            secrets: Vec::new(),
            staging_dir: default_staging_dir(),
            docker_image: default_docker_image(),
            kaniko_image: default_kaniko_image(),
            pack_image: default_pack_image(),
            maven_image: default_maven_image(),
            gradle_image: default_gradle_image(),
            ko_image: default_ko_image(),
            packer_image: default_packer_image(),
        }
    }
}

/// A secret-manager secret exposed to remote build steps as an env var.
#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SecretConfig {
    pub env: String,
    pub version_name: String,
}

/// `[manifests]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ManifestsSection {
    /// Glob patterns (relative to the config file) of raw manifest files.
    #[serde(default)]
    pub raw: Vec<String>,

    /// Setter values applied to documents carrying `# from-param:` markers.
    /// CLI `--set` values override these.
    #[serde(default)]
    pub setters: BTreeMap<String, String>,
}

/// `[deploy]` section. Exactly one backend table is expected.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeploySection {
    #[serde(default)]
    pub kubectl: Option<KubectlDeploy>,
    #[serde(default)]
    pub terraform: Option<TerraformDeploy>,
}

/// `[deploy.kubectl]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct KubectlDeploy {
    #[serde(default)]
    pub flags: KubectlFlags,
    #[serde(default)]
    pub default_namespace: Option<String>,
    #[serde(default)]
    pub kube_context: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct KubectlFlags {
    #[serde(default)]
    pub global: Vec<String>,
    #[serde(default)]
    pub apply: Vec<String>,
    #[serde(default)]
    pub delete: Vec<String>,
}

/// `[deploy.terraform]`.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct TerraformDeploy {
    #[serde(default)]
    pub units: Vec<DeploymentUnit>,
}

/// One independently applyable/destroyable infrastructure stack.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DeploymentUnit {
    pub name: String,
    /// Working directory, relative to the config file.
    pub dir: String,
    #[serde(default)]
    pub depends_on: Vec<String>,
    #[serde(default)]
    pub vars: BTreeMap<String, String>,
    #[serde(default)]
    pub var_files: Vec<String>,
    #[serde(default)]
    pub extra_args: Vec<String>,
    #[serde(default)]
    pub auto_approve: bool,
    #[serde(default)]
    pub backend_config: BTreeMap<String, String>,
    #[serde(default)]
    pub workspace: Option<String>,
}

/// `[resource_selector]` section.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ResourceSelectorSection {
    #[serde(default)]
    pub allow: Vec<ResourceFilter>,
    #[serde(default)]
    pub deny: Vec<ResourceFilter>,
}

/// A selector rule for one GroupKind (e.g. `"Deployment.apps"`).
#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct ResourceFilter {
    pub group_kind: String,
    /// Field paths holding image references, e.g. `".spec.containers[*].image"`.
    #[serde(default)]
    pub image: Vec<String>,
    /// Field paths of additional label maps, e.g. `".spec.template.metadata.labels"`.
    #[serde(default)]
    pub labels: Vec<String>,
}

/// Deploy backend selected at load time. Closed set.
#[derive(Debug, Clone)]
pub enum DeployerConfig {
    Kubectl(KubectlDeploy),
    Terraform(TerraformDeploy),
}

/// Validated configuration.
///
/// Construct via `ConfigFile::try_from(RawConfigFile)` (see `validate.rs`) or
/// [`crate::config::load_and_validate`].
#[derive(Debug, Clone)]
pub struct ConfigFile {
    pub name: String,
    /// Directory relative paths in the config are resolved against.
    pub base_dir: PathBuf,
    pub build: BuildSection,
    pub artifacts: Vec<ArtifactDescriptor>,
    pub manifests: ManifestsSection,
    pub deploy: Option<DeployerConfig>,
    pub resource_selector: ResourceSelectorSection,
    explicit_name: bool,
}

impl ConfigFile {
    /// Internal constructor used by validation.
    pub(crate) fn new_unchecked(
        raw: RawConfigFile,
        artifacts: Vec<ArtifactDescriptor>,
        deploy: Option<DeployerConfig>,
    ) -> Self {
        let explicit_name = raw.metadata.name.is_some();
        Self {
            name: raw.metadata.name.unwrap_or_else(|| "rollout".to_string()),
            base_dir: PathBuf::from("."),
            build: raw.build,
            artifacts,
            manifests: raw.manifests,
            deploy,
            resource_selector: raw.resource_selector,
            explicit_name,
        }
    }

    /// Attach the file this config was loaded from.
    ///
    /// Relative paths resolve against its directory, and the file stem
    /// becomes the config name unless `[metadata] name` was set.
    pub fn with_source(mut self, path: &Path) -> Self {
        self.base_dir = match path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        if !self.explicit_name {
            if let Some(stem) = path.file_stem().and_then(|s| s.to_str()) {
                self.name = stem.to_string();
            }
        }
        for artifact in &mut self.artifacts {
            artifact.workspace = self.base_dir.join(&artifact.workspace);
        }
        self
    }

    /// Resolve a path from the config against its base directory.
    pub fn resolve(&self, rel: impl AsRef<Path>) -> PathBuf {
        let rel = rel.as_ref();
        if rel.is_absolute() {
            rel.to_path_buf()
        } else {
            self.base_dir.join(rel)
        }
    }
}
