// src/engine/driver.rs

use std::collections::VecDeque;
use std::fmt;
use std::io::{self, Read, Write};
use std::path::Path;

use anyhow::{Context, anyhow};
use tokio::task::spawn_blocking;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::build::{BuildOutputFile, BuiltArtifact};
use crate::engine::context::RunContext;
use crate::engine::core::{DriverCommand, DriverCore};
use crate::engine::{DriverEvent, FilterOptions, Flow, Outcome, Phase};
use crate::errors::{Result, RolloutError};
use crate::exec::{Invocation, run_checked};
use crate::manifest::source::load_manifests;
use crate::manifest::{ManifestList, ManifestListByConfig};
use crate::types::{DigestSource, Stage};

/// Key the filter flow files its stream under.
const STREAM_KEY: &str = "stdin";

/// Async shell around [`DriverCore`]: executes its commands against a
/// [`RunContext`] and feeds the outcomes back in.
pub struct Driver<'c> {
    ctx: &'c RunContext,
    core: DriverCore,
    cancel: CancellationToken,
    input: Option<Box<dyn Read + Send>>,
    output: Box<dyn Write + Send>,
    builds: Vec<BuiltArtifact>,
    manifests: ManifestListByConfig,
    error: Option<RolloutError>,
}

impl fmt::Debug for Driver<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Driver")
            .field("core", &self.core)
            .field("builds", &self.builds)
            .finish_non_exhaustive()
    }
}

impl<'c> Driver<'c> {
    pub fn new(ctx: &'c RunContext, flow: Flow, cancel: CancellationToken) -> Self {
        Self {
            ctx,
            core: DriverCore::new(flow),
            cancel,
            input: None,
            output: Box::new(io::stdout()),
            builds: Vec::new(),
            manifests: ManifestListByConfig::new(),
            error: None,
        }
    }

    /// Manifest stream and plan text go here instead of stdout.
    pub fn with_output(mut self, output: Box<dyn Write + Send>) -> Self {
        self.output = output;
        self
    }

    /// Filter input read from here instead of stdin.
    pub fn with_input(mut self, input: Box<dyn Read + Send>) -> Self {
        self.input = Some(input);
        self
    }

    pub fn phase(&self) -> Phase {
        self.core.phase()
    }

    pub fn builds(&self) -> &[BuiltArtifact] {
        &self.builds
    }

    pub fn manifests(&self) -> &ManifestListByConfig {
        &self.manifests
    }

    /// Run the flow to completion. Returns the error of the phase that failed.
    pub async fn run(&mut self) -> Result<()> {
        let flow = self.core.flow().name();
        info!(flow, configs = self.ctx.configs().len(), "starting");

        let mut pending = VecDeque::from([DriverEvent::Start]);
        while let Some(event) = pending.pop_front() {
            let step = self.core.step(event);
            debug!(?event, phase = ?self.core.phase(), "driver step");
            for command in step.commands {
                let next = self.execute(command).await;
                pending.push_back(next);
            }
            if !step.keep_running {
                break;
            }
        }

        if let Some(err) = self.error.take() {
            return Err(err);
        }
        match self.core.phase() {
            Phase::Done => {
                info!(flow, "finished");
                Ok(())
            }
            phase => Err(RolloutError::Other(anyhow!("{flow} stopped in phase {phase:?}"))),
        }
    }

    async fn execute(&mut self, command: DriverCommand) -> DriverEvent {
        if self.cancel.is_cancelled() {
            self.error.get_or_insert(RolloutError::Cancelled);
            return DriverEvent::Cancelled;
        }

        debug!(?command, "executing");
        match command {
            DriverCommand::RunBuilds => {
                let result = self.run_builds().await;
                self.settle(result, DriverEvent::BuildsFinished)
            }
            DriverCommand::RunTransform => {
                let result = self.run_transform().await;
                self.settle(result, DriverEvent::TransformFinished)
            }
            DriverCommand::RunDeploy => {
                let result = self.run_deploy().await;
                self.settle(result, DriverEvent::DeployFinished)
            }
            DriverCommand::RunCleanup { dry_run } => {
                let result = self.run_cleanup(dry_run).await;
                self.settle(result, DriverEvent::CleanupFinished)
            }
            DriverCommand::EmitManifests => {
                let result = self.emit();
                self.settle(result, DriverEvent::EmitFinished)
            }
        }
    }

    fn settle(&mut self, result: Result<()>, event: fn(Outcome) -> DriverEvent) -> DriverEvent {
        match result {
            Ok(()) => event(Outcome::Success),
            Err(err) => {
                self.error.get_or_insert(err);
                event(Outcome::Failed)
            }
        }
    }

    async fn run_builds(&mut self) -> Result<()> {
        let flow = self.core.flow().clone();
        if let Flow::Filter(options) = &flow {
            self.builds = match &options.build_artifacts {
                Some(path) => read_build_output(self.ctx, path)?.builds,
                None => Vec::new(),
            };
            debug!(builds = self.builds.len(), "loaded build results");
            return Ok(());
        }

        // Render and delete only need the references builds would produce.
        let source = match flow {
            Flow::Render { .. } | Flow::Delete { .. } => DigestSource::Tag,
            _ => DigestSource::Build,
        };

        let groups = self
            .ctx
            .configs()
            .iter()
            .filter(|config| !config.artifacts.is_empty())
            .map(|config| self.ctx.build_group_for(config))
            .collect::<Result<Vec<_>>>()?;
        let built = self
            .ctx
            .build_runner()
            .with_digest_source(source)
            .build_all(&groups, &self.cancel)
            .await?;
        info!(configs = groups.len(), artifacts = built.len(), "builds complete");
        self.builds = built;

        if let Flow::Build {
            file_output: Some(path),
        } = &flow
        {
            let file = BuildOutputFile {
                builds: self.builds.clone(),
            };
            self.ctx
                .fs()
                .write(path, &serde_json::to_vec_pretty(&file)?)?;
            info!(path = ?path, "wrote build results");
        }
        Ok(())
    }

    async fn run_transform(&mut self) -> Result<()> {
        if let Flow::Filter(options) = self.core.flow().clone() {
            let list = self.read_stream(&options).await?;
            let pipeline = self
                .ctx
                .stream_pipeline(options.debugging, &options.protocols);
            let transformed = pipeline.apply(list, &self.builds)?;
            self.manifests.add(STREAM_KEY, transformed);
            return Ok(());
        }

        for config in self.ctx.configs() {
            let list = load_manifests(config, self.ctx.fs())?;
            let transformed = self.ctx.pipeline_for(config).apply(list, &self.builds)?;
            debug!(config = %config.name, documents = transformed.len(), "transformed manifests");
            self.manifests.add(&config.name, transformed);
        }
        Ok(())
    }

    /// The filter input, passed through the post-renderer when one is set.
    async fn read_stream(&mut self, options: &FilterOptions) -> Result<ManifestList> {
        let mut input: Box<dyn Read + Send> = match self.input.take() {
            Some(input) => input,
            None => Box::new(io::stdin()),
        };
        let bytes = spawn_blocking(move || -> io::Result<Vec<u8>> {
            let mut buf = Vec::new();
            input.read_to_end(&mut buf)?;
            Ok(buf)
        })
        .await
        .map_err(|e| RolloutError::Other(anyhow!("reading manifests: {e}")))??;

        let text = match &options.post_renderer {
            Some(exe) => {
                let invocation = Invocation::new(exe.to_string_lossy()).stdin(bytes);
                let output = run_checked(
                    self.ctx.runner().as_ref(),
                    invocation,
                    &self.cancel,
                    "post-renderer",
                    Stage::Render,
                )
                .await?;
                output.stdout_string()
            }
            None => String::from_utf8(bytes)
                .map_err(|e| RolloutError::ConfigError(format!("manifest input is not UTF-8: {e}")))?,
        };

        ManifestList::parse(&text)
            .map_err(|e| RolloutError::ConfigError(format!("loading manifests: {e}")))
    }

    async fn run_deploy(&mut self) -> Result<()> {
        let mux = self.ctx.deployer_mux()?;
        if mux.is_empty() {
            info!("no deployers configured");
            return Ok(());
        }
        mux.deploy(&self.builds, &self.manifests, &self.cancel).await
    }

    async fn run_cleanup(&mut self, dry_run: bool) -> Result<()> {
        let mux = self.ctx.deployer_mux()?;
        mux.cleanup(dry_run, &self.manifests, &self.cancel, self.output.as_mut())
            .await?;
        self.output.flush()?;
        Ok(())
    }

    fn emit(&mut self) -> Result<()> {
        let stream = self.manifests.flatten().render()?;
        if let Flow::Render {
            output: Some(path),
        } = self.core.flow()
        {
            self.ctx.fs().write(path, stream.as_bytes())?;
            info!(path = ?path, "wrote rendered manifests");
            return Ok(());
        }
        self.output.write_all(stream.as_bytes())?;
        self.output.flush()?;
        Ok(())
    }
}

fn read_build_output(ctx: &RunContext, path: &Path) -> Result<BuildOutputFile> {
    let text = ctx
        .fs()
        .read_to_string(path)
        .with_context(|| format!("reading build artifacts from {}", path.display()))?;
    Ok(serde_json::from_str(&text)?)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex, PoisonError};

    use super::*;
    use crate::build::{ArtifactBuilder, ArtifactDescriptor, BuildOutput, PlatformMatcher};
    use crate::config::{ConfigFile, GlobalConfig, RawConfigFile};
    use crate::engine::RunOptions;
    use crate::exec::{BoxFuture, RealProcessRunner};
    use crate::fs::mock::MockFileSystem;

    #[derive(Debug, Default)]
    struct CountingBuilder {
        built: Mutex<Vec<String>>,
    }

    impl ArtifactBuilder for CountingBuilder {
        fn build<'a>(
            &'a self,
            artifact: &'a ArtifactDescriptor,
            tag: &'a str,
            _platforms: &'a PlatformMatcher,
            _cancel: &'a CancellationToken,
        ) -> BoxFuture<'a, Result<BuildOutput>> {
            Box::pin(async move {
                self.built
                    .lock()
                    .unwrap_or_else(PoisonError::into_inner)
                    .push(artifact.image_name.clone());
                Ok(BuildOutput::LocalImage(tag.to_string()))
            })
        }
    }

    #[derive(Clone, Default)]
    struct Sink(Arc<Mutex<Vec<u8>>>);

    impl Write for Sink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    impl Sink {
        fn text(&self) -> String {
            String::from_utf8(self.0.lock().unwrap().clone()).unwrap()
        }
    }

    const CONFIG: &str = r#"
[metadata]
name = "web"

[build]
tag_policy = "latest"

[[build.artifacts]]
image = "web"
context = "web"
[build.artifacts.docker]

[manifests]
raw = ["k8s/*.yaml"]
"#;

    const DEPLOYMENT: &str = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  template:\n    spec:\n      containers:\n      - name: web\n        image: web\n";

    fn fixture() -> (RunContext, Arc<CountingBuilder>) {
        let fs = MockFileSystem::new();
        fs.add_file("proj/web/Dockerfile", "FROM scratch\n");
        fs.add_file("proj/k8s/web.yaml", DEPLOYMENT);
        let raw: RawConfigFile = toml::from_str(CONFIG).unwrap();
        let config = ConfigFile::try_from(raw)
            .unwrap()
            .with_source(Path::new("proj/Rollout.toml"));

        let builder = Arc::new(CountingBuilder::default());
        let ctx = RunContext::new(
            vec![config],
            &GlobalConfig::default(),
            RunOptions::default(),
            Arc::new(fs),
            Arc::new(RealProcessRunner),
        )
        .unwrap()
        .with_builder(builder.clone());
        (ctx, builder)
    }

    #[tokio::test]
    async fn render_uses_tags_without_building() {
        let (ctx, builder) = fixture();
        let sink = Sink::default();
        let mut driver = Driver::new(&ctx, Flow::Render { output: None }, CancellationToken::new())
            .with_output(Box::new(sink.clone()));

        driver.run().await.unwrap();

        assert_eq!(driver.phase(), Phase::Done);
        assert!(builder.built.lock().unwrap().is_empty());
        assert!(sink.text().contains("image: web:latest"), "{}", sink.text());
    }

    #[tokio::test]
    async fn build_flow_writes_results_file() {
        let (ctx, builder) = fixture();
        let flow = Flow::Build {
            file_output: Some("proj/out/builds.json".into()),
        };
        let mut driver = Driver::new(&ctx, flow, CancellationToken::new());

        driver.run().await.unwrap();

        assert_eq!(*builder.built.lock().unwrap(), vec!["web".to_string()]);
        let written = ctx.fs().read_to_string(Path::new("proj/out/builds.json")).unwrap();
        let parsed: BuildOutputFile = serde_json::from_str(&written).unwrap();
        assert_eq!(parsed.builds[0].tag, "web:latest");
    }

    #[tokio::test]
    async fn cancelled_before_start_fails() {
        let (ctx, builder) = fixture();
        let token = CancellationToken::new();
        token.cancel();
        let mut driver = Driver::new(&ctx, Flow::Deploy, token);

        let err = driver.run().await.unwrap_err();

        assert!(err.is_cancelled(), "{err:?}");
        assert_eq!(driver.phase(), Phase::Failed);
        assert!(builder.built.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn filter_reads_injected_input() {
        let (ctx, _) = fixture();
        let sink = Sink::default();
        let flow = Flow::Filter(FilterOptions::default());
        let mut driver = Driver::new(&ctx, flow, CancellationToken::new())
            .with_input(Box::new(io::Cursor::new(DEPLOYMENT.as_bytes().to_vec())))
            .with_output(Box::new(sink.clone()));

        driver.run().await.unwrap();

        assert!(driver.builds().is_empty());
        assert!(sink.text().contains("app.kubernetes.io/managed-by: rollout"), "{}", sink.text());
        assert!(sink.text().contains("image: web\n"));
    }
}
