// src/build/artifact.rs

//! Artifact descriptors: what to build and with which backend.
//!
//! The config file carries one optional sub-table per backend; validation
//! collapses them into [`ArtifactKind`], a closed enum. Every dispatch site
//! matches on it exhaustively.

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::build::platform::{Platform, PlatformMatcher};
use crate::config::model::ArtifactConfig;
use crate::errors::{Result, RolloutError};

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct DockerArtifact {
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    #[serde(default)]
    pub target: Option<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct KanikoArtifact {
    #[serde(default = "default_dockerfile")]
    pub dockerfile: String,
    #[serde(default)]
    pub build_args: BTreeMap<String, String>,
    #[serde(default)]
    pub target: Option<String>,
    #[serde(default)]
    pub cache: bool,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct BuildpackArtifact {
    pub builder: String,
    #[serde(default)]
    pub run_image: Option<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Copy, Default, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JibTool {
    #[default]
    Maven,
    Gradle,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct JibArtifact {
    #[serde(default)]
    pub tool: JibTool,
    #[serde(default)]
    pub project: Option<String>,
    #[serde(default)]
    pub args: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct KoArtifact {
    #[serde(default = "default_ko_main")]
    pub main: String,
    #[serde(default)]
    pub flags: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct PackerArtifact {
    pub template: String,
    #[serde(default)]
    pub build_args: Vec<String>,
    #[serde(default)]
    pub env: Vec<String>,
}

fn default_dockerfile() -> String {
    "Dockerfile".to_string()
}

fn default_ko_main() -> String {
    ".".to_string()
}

/// Backend sub-descriptor. Exactly one per artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArtifactKind {
    Docker(DockerArtifact),
    Kaniko(KanikoArtifact),
    Buildpacks(BuildpackArtifact),
    Jib(JibArtifact),
    Ko(KoArtifact),
    Packer(PackerArtifact),
}

impl ArtifactKind {
    pub fn name(&self) -> &'static str {
        match self {
            ArtifactKind::Docker(_) => "docker",
            ArtifactKind::Kaniko(_) => "kaniko",
            ArtifactKind::Buildpacks(_) => "buildpacks",
            ArtifactKind::Jib(_) => "jib",
            ArtifactKind::Ko(_) => "ko",
            ArtifactKind::Packer(_) => "packer",
        }
    }

    /// Platforms the backend can produce images for.
    pub fn supported_platforms(&self) -> PlatformMatcher {
        match self {
            // Buildpacks only produce linux/amd64 images.
            ArtifactKind::Buildpacks(_) => {
                PlatformMatcher::from_platforms(vec![Platform::new("linux", "amd64")])
            }
            ArtifactKind::Docker(_)
            | ArtifactKind::Kaniko(_)
            | ArtifactKind::Jib(_)
            | ArtifactKind::Ko(_)
            | ArtifactKind::Packer(_) => PlatformMatcher::all(),
        }
    }

    /// Language runtime implied by the backend, used by debug transforms.
    pub fn runtime_hint(&self) -> Option<RuntimeHint> {
        match self {
            ArtifactKind::Jib(_) => Some(RuntimeHint::Jvm),
            ArtifactKind::Ko(_) => Some(RuntimeHint::Go),
            ArtifactKind::Docker(_)
            | ArtifactKind::Kaniko(_)
            | ArtifactKind::Buildpacks(_)
            | ArtifactKind::Packer(_) => None,
        }
    }
}

/// Language runtime of a built image.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RuntimeHint {
    Jvm,
    Go,
    Nodejs,
    Python,
    Netcore,
}

impl fmt::Display for RuntimeHint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RuntimeHint::Jvm => "jvm",
            RuntimeHint::Go => "go",
            RuntimeHint::Nodejs => "nodejs",
            RuntimeHint::Python => "python",
            RuntimeHint::Netcore => "netcore",
        };
        f.write_str(s)
    }
}

/// Immutable description of one buildable image.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArtifactDescriptor {
    pub image_name: String,
    pub workspace: PathBuf,
    pub kind: ArtifactKind,
    pub dependencies: Vec<String>,
}

impl TryFrom<&ArtifactConfig> for ArtifactDescriptor {
    type Error = RolloutError;

    fn try_from(cfg: &ArtifactConfig) -> std::result::Result<Self, Self::Error> {
        let kind = resolve_kind(cfg)?;
        Ok(Self {
            image_name: cfg.image.clone(),
            workspace: PathBuf::from(cfg.context.as_deref().unwrap_or(".")),
            kind,
            dependencies: cfg.requires.clone(),
        })
    }
}

fn resolve_kind(cfg: &ArtifactConfig) -> Result<ArtifactKind> {
    let mut found: Vec<ArtifactKind> = Vec::new();
    if let Some(a) = &cfg.docker {
        found.push(ArtifactKind::Docker(a.clone()));
    }
    if let Some(a) = &cfg.kaniko {
        found.push(ArtifactKind::Kaniko(a.clone()));
    }
    if let Some(a) = &cfg.buildpacks {
        found.push(ArtifactKind::Buildpacks(a.clone()));
    }
    if let Some(a) = &cfg.jib {
        found.push(ArtifactKind::Jib(a.clone()));
    }
    if let Some(a) = &cfg.ko {
        found.push(ArtifactKind::Ko(a.clone()));
    }
    if let Some(a) = &cfg.packer {
        found.push(ArtifactKind::Packer(a.clone()));
    }

    if found.len() == 1 {
        if let Some(kind) = found.pop() {
            return Ok(kind);
        }
    }

    Err(RolloutError::UnexpectedArtifactType {
        artifact: cfg.image.clone(),
        found: found.iter().map(ArtifactKind::name).collect(),
    })
}

/// Result of building (or tagging) one artifact.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BuiltArtifact {
    pub image_name: String,
    /// Fully qualified reference, e.g. `web:3f2a9c01d2e4`.
    pub tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeHint>,
}

/// Build results file format (`build --file-output`, `filter --build-artifacts`).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BuildOutputFile {
    pub builds: Vec<BuiltArtifact>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn base(image: &str) -> ArtifactConfig {
        ArtifactConfig {
            image: image.to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn no_backend_is_unexpected_type() {
        let err = ArtifactDescriptor::try_from(&base("web")).unwrap_err();
        match err {
            RolloutError::UnexpectedArtifactType { artifact, found } => {
                assert_eq!(artifact, "web");
                assert!(found.is_empty());
            }
            other => panic!("expected UnexpectedArtifactType, got {other:?}"),
        }
    }

    #[test]
    fn two_backends_are_unexpected_type() {
        let mut cfg = base("web");
        cfg.docker = Some(DockerArtifact::default());
        cfg.ko = Some(KoArtifact::default());
        let err = ArtifactDescriptor::try_from(&cfg).unwrap_err();
        assert!(err.to_string().contains("docker, ko"), "{err}");
    }

    #[test]
    fn single_backend_resolves() {
        let mut cfg = base("api");
        cfg.context = Some("api".into());
        cfg.requires = vec!["base".into()];
        cfg.jib = Some(JibArtifact::default());
        let desc = ArtifactDescriptor::try_from(&cfg).unwrap();
        assert_eq!(desc.kind.name(), "jib");
        assert_eq!(desc.workspace, PathBuf::from("api"));
        assert_eq!(desc.dependencies, vec!["base".to_string()]);
        assert_eq!(desc.kind.runtime_hint(), Some(RuntimeHint::Jvm));
    }
}
