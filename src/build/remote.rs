// src/build/remote.rs

//! Remote builds: archive the workspace, write a build spec for the build
//! service.
//!
//! The bucket is modelled as a local staging directory
//! (`<staging_dir>/<bucket>/...`); a submission agent uploads its contents.

use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};

use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::archive::create_tar_gz;
use crate::build::artifact::ArtifactDescriptor;
use crate::build::platform::PlatformMatcher;
use crate::build::spec::build_spec_for;
use crate::build::{ArtifactBuilder, BuildOutput};
use crate::config::model::RemoteBuildConfig;
use crate::errors::{Result, RolloutError};
use crate::exec::BoxFuture;
use crate::fs::{RealFileSystem, walk_files};
use crate::types::Stage;

#[derive(Debug, Clone)]
pub struct RemoteBuilder {
    config: RemoteBuildConfig,
}

impl RemoteBuilder {
    pub fn new(config: RemoteBuildConfig) -> Self {
        Self { config }
    }

    fn bucket_dir(&self) -> PathBuf {
        self.config.staging_dir.join(&self.config.bucket)
    }

    async fn submit(
        &self,
        artifact: &ArtifactDescriptor,
        tag: &str,
        platforms: &PlatformMatcher,
        cancel: &CancellationToken,
    ) -> Result<BuildOutput> {
        let key = object_key(tag);
        let object = format!("source/{key}.tar.gz");

        // Platform and backend checks run before anything touches the bucket.
        let spec = build_spec_for(
            artifact,
            tag,
            platforms,
            &self.config,
            &self.config.bucket,
            &object,
        )?;

        let archive_path = self.bucket_dir().join(&object);
        upload_workspace(&artifact.workspace, &archive_path, cancel).await?;
        info!(artifact = %artifact.image_name, object = %object, "uploaded sources");

        let spec_path = self.bucket_dir().join("builds").join(format!("{key}.json"));
        if let Some(parent) = spec_path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(&spec_path, serde_json::to_vec_pretty(&spec)?)?;
        info!(artifact = %artifact.image_name, spec = ?spec_path, "submitted build");

        Ok(BuildOutput::Submitted(spec))
    }
}

impl ArtifactBuilder for RemoteBuilder {
    fn build<'a>(
        &'a self,
        artifact: &'a ArtifactDescriptor,
        tag: &'a str,
        platforms: &'a PlatformMatcher,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<BuildOutput>> {
        Box::pin(async move {
            self.submit(artifact, tag, platforms, cancel)
                .await
                .map_err(|err| match err {
                    RolloutError::IoError(_) | RolloutError::Other(_) | RolloutError::JsonError(_) => {
                        RolloutError::backend(
                            format!("remote {}", artifact.kind.name()),
                            Stage::Submit,
                            err.to_string(),
                        )
                    }
                    other => other,
                })
        })
    }
}

/// Object name derived from the full image reference.
fn object_key(tag: &str) -> String {
    tag.chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '-' || c == '.' { c } else { '_' })
        .collect()
}

async fn upload_workspace(workspace: &Path, dest: &Path, cancel: &CancellationToken) -> Result<()> {
    let workspace = workspace.to_path_buf();
    let dest = dest.to_path_buf();
    let cancel = cancel.clone();

    spawn_blocking(move || -> Result<()> {
        let files = walk_files(&RealFileSystem, &workspace)?;
        let rel: Vec<PathBuf> = files
            .iter()
            .filter_map(|p| p.strip_prefix(&workspace).ok().map(Path::to_path_buf))
            .collect();
        debug!(files = rel.len(), workspace = ?workspace, "archiving workspace");

        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let out = BufWriter::new(File::create(&dest)?);
        create_tar_gz(&cancel, out, &workspace, &rel)
    })
    .await
    .map_err(|e| RolloutError::Other(anyhow::anyhow!("archive task failed: {e}")))?
}
