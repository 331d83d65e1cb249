// src/build/runner.rs

//! Runs builds for a set of artifacts.
//!
//! The [`BuildScheduler`] decides what may start; this module owns the
//! async side: a `JoinSet` of in-flight builds across every configuration
//! and a child cancellation token shared by all of them.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::build::artifact::{ArtifactDescriptor, BuiltArtifact};
use crate::build::platform::PlatformMatcher;
use crate::build::tagger::Tagger;
use crate::build::{ArtifactBuilder, BuildOutput};
use crate::dag::BuildScheduler;
use crate::errors::{Result, RolloutError};
use crate::fs::FileSystem;
use crate::types::DigestSource;

type BuildResult = (String, Result<BuildOutput>);

/// One configuration's artifacts, with the builder, tagger and platforms
/// they are built with.
#[derive(Debug, Clone)]
pub struct BuildGroup {
    pub config: String,
    pub artifacts: Vec<ArtifactDescriptor>,
    pub builder: Arc<dyn ArtifactBuilder>,
    pub tagger: Tagger,
    pub platforms: PlatformMatcher,
}

impl BuildGroup {
    pub fn new(
        config: impl Into<String>,
        artifacts: Vec<ArtifactDescriptor>,
        builder: Arc<dyn ArtifactBuilder>,
        tagger: Tagger,
        platforms: PlatformMatcher,
    ) -> Self {
        Self {
            config: config.into(),
            artifacts,
            builder,
            tagger,
            platforms,
        }
    }
}

/// Builds the artifacts of every group in one scheduling pass.
///
/// The concurrency limit covers the whole run, so independent artifacts
/// from different configurations build side by side.
#[derive(Debug, Clone)]
pub struct BuildRunner {
    fs: Arc<dyn FileSystem>,
    /// Maximum number of concurrent builds; `0` = unbounded.
    concurrency: usize,
    digest_source: DigestSource,
}

impl BuildRunner {
    pub fn new(fs: Arc<dyn FileSystem>, concurrency: usize) -> Self {
        Self {
            fs,
            concurrency,
            digest_source: DigestSource::Build,
        }
    }

    pub fn with_digest_source(mut self, source: DigestSource) -> Self {
        self.digest_source = source;
        self
    }

    /// Build every artifact of every group, dependencies first.
    ///
    /// Results come back in group order, then input order. The first
    /// failure cancels all in-flight builds and no further builds are
    /// started. An image name may appear in only one group.
    pub async fn build_all(
        &self,
        groups: &[BuildGroup],
        cancel: &CancellationToken,
    ) -> Result<Vec<BuiltArtifact>> {
        let mut owner: HashMap<&str, &BuildGroup> = HashMap::new();
        let mut artifacts: Vec<ArtifactDescriptor> = Vec::new();
        for group in groups {
            for artifact in &group.artifacts {
                if let Some(other) = owner.insert(artifact.image_name.as_str(), group) {
                    return Err(RolloutError::ConfigError(format!(
                        "image '{}' is built by both '{}' and '{}'",
                        artifact.image_name, other.config, group.config
                    )));
                }
                artifacts.push(artifact.clone());
            }
        }
        if artifacts.is_empty() {
            return Ok(Vec::new());
        }

        let mut tags: HashMap<String, String> = HashMap::new();
        for group in groups {
            for artifact in &group.artifacts {
                let tag = group.tagger.tag(self.fs.as_ref(), artifact)?;
                tags.insert(artifact.image_name.clone(), tag);
            }
        }

        if self.digest_source == DigestSource::Tag {
            info!(count = artifacts.len(), "using computed tags without building");
            return Ok(collect_results(&artifacts, &tags, |_| true));
        }

        let token = cancel.child_token();
        let mut scheduler = BuildScheduler::new(&artifacts, self.concurrency);
        let mut in_flight: JoinSet<BuildResult> = JoinSet::new();
        let mut succeeded: HashSet<String> = HashSet::new();
        let mut first_error: Option<RolloutError> = None;

        info!(
            groups = groups.len(),
            artifacts = artifacts.len(),
            concurrency = self.concurrency,
            "starting builds"
        );
        let step = scheduler.start();
        for name in step.newly_scheduled {
            spawn_build(&mut in_flight, &owner, &tags, &name, &token);
        }

        while let Some(joined) = in_flight.join_next().await {
            let (name, result) = match joined {
                Ok(pair) => pair,
                Err(join_err) => {
                    error!(error = %join_err, "build task panicked or was aborted");
                    token.cancel();
                    first_error.get_or_insert(RolloutError::Other(anyhow::anyhow!(
                        "build task failed: {join_err}"
                    )));
                    scheduler.abort();
                    continue;
                }
            };

            let step = match result {
                Ok(output) => {
                    match &output {
                        BuildOutput::LocalImage(image) => {
                            info!(artifact = %name, image = %image, "build finished")
                        }
                        BuildOutput::Submitted(spec) => {
                            info!(artifact = %name, steps = spec.steps.len(), "build submitted")
                        }
                    }
                    succeeded.insert(name.clone());
                    scheduler.complete(&name, true)
                }
                Err(err) => {
                    if err.is_cancelled() {
                        debug!(artifact = %name, "build cancelled");
                    } else {
                        error!(artifact = %name, error = %err, "build failed");
                    }
                    token.cancel();
                    keep_most_relevant(&mut first_error, err);
                    scheduler.complete(&name, false)
                }
            };

            if !step.newly_failed.is_empty() {
                debug!(failed = ?step.newly_failed, "artifacts will not be built");
            }

            if first_error.is_none() && !token.is_cancelled() {
                for next in step.newly_scheduled {
                    spawn_build(&mut in_flight, &owner, &tags, &next, &token);
                }
            } else if !step.newly_scheduled.is_empty() {
                scheduler.abort();
            }
        }

        if let Some(err) = first_error {
            return Err(err);
        }
        if cancel.is_cancelled() {
            return Err(RolloutError::Cancelled);
        }
        if !scheduler.is_finished() {
            warn!("build run ended with unscheduled artifacts");
        }

        Ok(collect_results(&artifacts, &tags, |name| succeeded.contains(name)))
    }
}

fn spawn_build(
    set: &mut JoinSet<BuildResult>,
    owner: &HashMap<&str, &BuildGroup>,
    tags: &HashMap<String, String>,
    name: &str,
    token: &CancellationToken,
) {
    let Some(group) = owner.get(name) else {
        warn!(artifact = %name, "scheduled artifact is unknown; skipping");
        return;
    };
    let (Some(artifact), Some(tag)) = (
        group.artifacts.iter().find(|a| a.image_name == name),
        tags.get(name),
    ) else {
        warn!(artifact = %name, "scheduled artifact is unknown; skipping");
        return;
    };

    info!(config = %group.config, artifact = %name, tag = %tag, "starting build");
    let builder = Arc::clone(&group.builder);
    let artifact = artifact.clone();
    let tag = tag.clone();
    let platforms = group.platforms.clone();
    let token = token.clone();

    set.spawn(async move {
        let result = builder.build(&artifact, &tag, &platforms, &token).await;
        (artifact.image_name, result)
    });
}

/// Cancellation errors are a consequence of another failure; prefer the cause.
fn keep_most_relevant(slot: &mut Option<RolloutError>, err: RolloutError) {
    let replace = match slot.as_ref() {
        None => true,
        Some(existing) => existing.is_cancelled() && !err.is_cancelled(),
    };
    if replace {
        *slot = Some(err);
    }
}

fn collect_results<F>(
    artifacts: &[ArtifactDescriptor],
    tags: &HashMap<String, String>,
    include: F,
) -> Vec<BuiltArtifact>
where
    F: Fn(&str) -> bool,
{
    artifacts
        .iter()
        .filter(|a| include(&a.image_name))
        .filter_map(|a| {
            tags.get(&a.image_name).map(|tag| BuiltArtifact {
                image_name: a.image_name.clone(),
                tag: tag.clone(),
                runtime: a.kind.runtime_hint(),
            })
        })
        .collect()
}
