// src/build/local.rs

//! Builds artifacts with locally installed tools.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::build::artifact::{
    ArtifactDescriptor, ArtifactKind, BuildpackArtifact, DockerArtifact, JibArtifact, JibTool,
    KoArtifact, PackerArtifact,
};
use crate::build::platform::PlatformMatcher;
use crate::build::{ArtifactBuilder, BuildOutput};
use crate::errors::{Result, RolloutError};
use crate::exec::{BoxFuture, Invocation, ProcessRunner, run_checked};
use crate::manifest::image::ImageReference;
use crate::types::Stage;

/// Invokes `docker`, `pack`, `mvn`/`gradle`, `ko` or `packer` per artifact.
#[derive(Debug, Clone)]
pub struct LocalBuilder {
    runner: Arc<dyn ProcessRunner>,
}

impl LocalBuilder {
    pub fn new(runner: Arc<dyn ProcessRunner>) -> Self {
        Self { runner }
    }

    /// Commands to run, in order, for one artifact.
    pub fn invocations(
        artifact: &ArtifactDescriptor,
        tag: &str,
        platforms: &PlatformMatcher,
    ) -> Result<Vec<Invocation>> {
        let ws = &artifact.workspace;
        let invocations = match &artifact.kind {
            ArtifactKind::Docker(d) => vec![docker(d, ws, tag, platforms)],
            ArtifactKind::Kaniko(_) => {
                return Err(RolloutError::ConfigError(format!(
                    "artifact '{}': kaniko builds need a [build.remote] section",
                    artifact.image_name
                )));
            }
            ArtifactKind::Buildpacks(b) => vec![buildpacks(b, ws, tag)],
            ArtifactKind::Jib(j) => vec![jib(j, ws, tag)],
            ArtifactKind::Ko(k) => vec![ko(k, ws, tag, platforms)],
            ArtifactKind::Packer(p) => packer(p, ws, &artifact.image_name, tag),
        };
        Ok(invocations)
    }
}

impl ArtifactBuilder for LocalBuilder {
    fn build<'a>(
        &'a self,
        artifact: &'a ArtifactDescriptor,
        tag: &'a str,
        platforms: &'a PlatformMatcher,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<BuildOutput>> {
        Box::pin(async move {
            let backend = artifact.kind.name();
            for invocation in Self::invocations(artifact, tag, platforms)? {
                run_checked(self.runner.as_ref(), invocation, cancel, backend, Stage::Build).await?;
            }
            info!(artifact = %artifact.image_name, tag = %tag, backend, "built locally");
            Ok(BuildOutput::LocalImage(tag.to_string()))
        })
    }
}

fn platform_arg(platforms: &PlatformMatcher) -> Option<String> {
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

fn path_arg(path: &Path) -> String {
    path.to_string_lossy().into_owned()
}

fn docker(d: &DockerArtifact, ws: &Path, tag: &str, platforms: &PlatformMatcher) -> Invocation {
    let mut inv = Invocation::new("docker")
        .args(["build", "--tag", tag, "-f"])
        .arg(path_arg(&ws.join(&d.dockerfile)));
    for (k, v) in &d.build_args {
        inv = inv.arg("--build-arg").arg(format!("{k}={v}"));
    }
    if let Some(target) = &d.target {
        inv = inv.arg("--target").arg(target.as_str());
    }
    if let Some(p) = platform_arg(platforms) {
        inv = inv.arg("--platform").arg(p);
    }
    inv.arg(path_arg(ws))
}

fn buildpacks(b: &BuildpackArtifact, ws: &Path, tag: &str) -> Invocation {
    let mut inv = Invocation::new("pack")
        .args(["build", tag, "--builder", b.builder.as_str(), "--path"])
        .arg(path_arg(ws));
    if let Some(run_image) = &b.run_image {
        inv = inv.arg("--run-image").arg(run_image.as_str());
    }
    for env in &b.env {
        inv = inv.arg("--env").arg(env.as_str());
    }
    inv
}

fn jib(j: &JibArtifact, ws: &Path, tag: &str) -> Invocation {
    match j.tool {
        JibTool::Maven => {
            let mut inv = Invocation::new("mvn").arg(format!("-Djib.to.image={tag}"));
            if let Some(project) = &j.project {
                inv = inv.args(["--projects", project.as_str(), "--also-make"]);
            }
            inv.args(j.args.iter().map(String::as_str))
                .args(["prepare-package", "jib:dockerBuild"])
                .current_dir(ws)
        }
        JibTool::Gradle => {
            let task = match &j.project {
                Some(project) => format!(":{project}:jibDockerBuild"),
                None => "jibDockerBuild".to_string(),
            };
            Invocation::new("gradle")
                .arg(format!("-Djib.to.image={tag}"))
                .args(j.args.iter().map(String::as_str))
                .arg(task)
                .current_dir(ws)
        }
    }
}

fn ko(k: &KoArtifact, ws: &Path, tag: &str, platforms: &PlatformMatcher) -> Invocation {
    let reference = ImageReference::parse(tag);
    let mut inv = Invocation::new("ko").args(["build", "--local", "--bare"]);
    if let Some(t) = &reference.tag {
        inv = inv.arg("--tags").arg(t.as_str());
    }
    if let Some(p) = platform_arg(platforms) {
        inv = inv.arg("--platform").arg(p);
    }
    inv.args(k.flags.iter().map(String::as_str))
        .arg(k.main.as_str())
        .env("KO_DOCKER_REPO", reference.base_name)
        .env_entries(&k.env)
        .current_dir(ws)
}

/// `packer init` then `packer build`, both from the workspace (or the
/// template's directory when the workspace is empty).
fn packer(p: &PackerArtifact, ws: &Path, image_name: &str, tag: &str) -> Vec<Invocation> {
    let dir = if ws.as_os_str().is_empty() {
        Path::new(&p.template)
            .parent()
            .map(Path::to_path_buf)
            .unwrap_or_else(|| PathBuf::from("."))
    } else {
        ws.to_path_buf()
    };

    let init = Invocation::new("packer")
        .args(["init", p.template.as_str()])
        .env_entries(&p.env)
        .current_dir(&dir);

    let build = Invocation::new("packer")
        .arg("build")
        .args(p.build_args.iter().map(String::as_str))
        .arg("-var")
        .arg(format!("image_name={image_name}"))
        .arg("-var")
        .arg(format!("image_tag={tag}"))
        .arg(p.template.as_str())
        .env_entries(&p.env)
        .current_dir(&dir);

    vec![init, build]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::artifact::KanikoArtifact;
    use crate::build::platform::Platform;

    fn artifact(kind: ArtifactKind) -> ArtifactDescriptor {
        ArtifactDescriptor {
            image_name: "web".to_string(),
            workspace: PathBuf::from("svc/web"),
            kind,
            dependencies: vec![],
        }
    }

    #[test]
    fn packer_runs_init_then_build_in_workspace() {
        let a = artifact(ArtifactKind::Packer(PackerArtifact {
            template: "image.pkr.hcl".to_string(),
            build_args: vec!["-force".to_string()],
            env: vec!["PKR_VAR_region=eu".to_string()],
        }));

        let invs = LocalBuilder::invocations(&a, "web:abc", &PlatformMatcher::default()).unwrap();

        assert_eq!(invs.len(), 2);
        assert_eq!(invs[0].to_string(), "packer init image.pkr.hcl");
        assert_eq!(
            invs[1].to_string(),
            "packer build -force -var image_name=web -var image_tag=web:abc image.pkr.hcl"
        );
        assert!(invs.iter().all(|i| i.dir == Some(PathBuf::from("svc/web"))));
        assert_eq!(invs[1].env, vec![("PKR_VAR_region".to_string(), "eu".to_string())]);
    }

    #[test]
    fn packer_falls_back_to_template_dir() {
        let mut a = artifact(ArtifactKind::Packer(PackerArtifact {
            template: "images/base.pkr.hcl".to_string(),
            ..Default::default()
        }));
        a.workspace = PathBuf::new();

        let invs = LocalBuilder::invocations(&a, "web:abc", &PlatformMatcher::default()).unwrap();
        assert_eq!(invs[0].dir, Some(PathBuf::from("images")));
    }

    #[test]
    fn docker_adds_platform_and_context() {
        let a = artifact(ArtifactKind::Docker(DockerArtifact {
            dockerfile: "Dockerfile".to_string(),
            target: Some("prod".to_string()),
            ..Default::default()
        }));
        let arm = PlatformMatcher::from_platforms(vec![Platform::new("linux", "arm64")]);

        let invs = LocalBuilder::invocations(&a, "web:1", &arm).unwrap();
        let line = invs[0].to_string();
        assert!(line.starts_with("docker build --tag web:1 -f svc/web/Dockerfile"), "{line}");
        assert!(line.contains("--target prod --platform linux/arm64"), "{line}");
        assert!(line.ends_with(" svc/web"), "{line}");
    }

    #[test]
    fn kaniko_needs_remote() {
        let a = artifact(ArtifactKind::Kaniko(KanikoArtifact::default()));
        let err = LocalBuilder::invocations(&a, "web:1", &PlatformMatcher::default()).unwrap_err();
        assert!(matches!(err, RolloutError::ConfigError(_)));
    }

    #[test]
    fn ko_sets_repo_and_tag() {
        let a = artifact(ArtifactKind::Ko(KoArtifact {
            main: "./cmd/web".to_string(),
            ..Default::default()
        }));
        let invs = LocalBuilder::invocations(&a, "gcr.io/p/web:abc", &PlatformMatcher::default())
            .unwrap();
        assert_eq!(invs[0].to_string(), "ko build --local --bare --tags abc ./cmd/web");
        assert_eq!(invs[0].env[0], ("KO_DOCKER_REPO".to_string(), "gcr.io/p/web".to_string()));
    }
}
