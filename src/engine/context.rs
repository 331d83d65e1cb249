// src/engine/context.rs

//! Everything one invocation shares: loaded configs, CLI overrides, and the
//! read-only state derived from them once up front.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::build::{
    ArtifactBuilder, BuildGroup, BuildRunner, LocalBuilder, PlatformMatcher, RemoteBuilder, Tagger,
};
use crate::config::{ConfigFile, DeployerConfig, GlobalConfig};
use crate::deploy::{Deployer, DeployerMux, KubectlDeployer, TerraformDeployer};
use crate::errors::Result;
use crate::exec::ProcessRunner;
use crate::fs::FileSystem;
use crate::manifest::source::manifest_paths;
use crate::manifest::{DebugSettings, Registries, ResourceSelector, TransformPipeline};

/// Overrides taken from the command line.
#[derive(Debug, Clone, Default)]
pub struct RunOptions {
    /// `--set KEY=VALUE`; wins over config setters.
    pub setters: BTreeMap<String, String>,
    /// `--label KEY=VALUE`.
    pub labels: BTreeMap<String, String>,
    pub insecure_registries: Vec<String>,
    /// `--tag`; replaces every computed tag.
    pub tag: Option<String>,
    pub build_concurrency: Option<usize>,
    pub platforms: Vec<String>,
}

pub struct RunContext {
    configs: Vec<ConfigFile>,
    options: RunOptions,
    registries: Arc<Registries>,
    selector: ResourceSelector,
    fs: Arc<dyn FileSystem>,
    runner: Arc<dyn ProcessRunner>,
    builder: Option<Arc<dyn ArtifactBuilder>>,
}

impl fmt::Debug for RunContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("RunContext")
            .field("configs", &self.configs.iter().map(|c| &c.name).collect::<Vec<_>>())
            .field("options", &self.options)
            .field("registries", &self.registries)
            .finish_non_exhaustive()
    }
}

impl RunContext {
    pub fn new(
        configs: Vec<ConfigFile>,
        global: &GlobalConfig,
        options: RunOptions,
        fs: Arc<dyn FileSystem>,
        runner: Arc<dyn ProcessRunner>,
    ) -> Result<Self> {
        let registries = Arc::new(merge_registries(&configs, global, &options));
        let selector = ResourceSelector::from_sections(configs.iter().map(|c| &c.resource_selector))?;
        debug!(
            configs = configs.len(),
            insecure = registries.insecure_registries.len(),
            helpers = %registries.debug_helpers_registry,
            "run context ready"
        );
        Ok(Self {
            configs,
            options,
            registries,
            selector,
            fs,
            runner,
            builder: None,
        })
    }

    /// Use `builder` for every artifact instead of the configured backends.
    pub fn with_builder(mut self, builder: Arc<dyn ArtifactBuilder>) -> Self {
        self.builder = Some(builder);
        self
    }

    pub fn configs(&self) -> &[ConfigFile] {
        &self.configs
    }

    pub fn options(&self) -> &RunOptions {
        &self.options
    }

    pub fn registries(&self) -> Arc<Registries> {
        Arc::clone(&self.registries)
    }

    pub fn selector(&self) -> &ResourceSelector {
        &self.selector
    }

    pub fn fs(&self) -> &dyn FileSystem {
        self.fs.as_ref()
    }

    pub fn runner(&self) -> Arc<dyn ProcessRunner> {
        Arc::clone(&self.runner)
    }

    /// Config setters overridden by `--set`.
    pub fn setters_for(&self, config: &ConfigFile) -> BTreeMap<String, String> {
        let mut setters = config.manifests.setters.clone();
        setters.extend(self.options.setters.clone());
        setters
    }

    pub fn pipeline_for(&self, config: &ConfigFile) -> TransformPipeline {
        TransformPipeline::new(self.setters_for(config), &self.options.labels, self.selector.clone())
    }

    /// Pipeline for streams not owned by any config: only `--set` applies.
    pub fn stream_pipeline(&self, debugging: bool, protocols: &[String]) -> TransformPipeline {
        let pipeline = TransformPipeline::new(
            self.options.setters.clone(),
            &self.options.labels,
            self.selector.clone(),
        );
        if !debugging {
            return pipeline;
        }
        pipeline.with_debugging(DebugSettings {
            registries: self.registries(),
            protocols: protocols.to_vec(),
        })
    }

    /// `--platform` when given, else the config's platforms.
    pub fn platforms_for(&self, config: &ConfigFile) -> Result<PlatformMatcher> {
        if self.options.platforms.is_empty() {
            PlatformMatcher::parse(&config.build.platforms)
        } else {
            PlatformMatcher::parse(&self.options.platforms)
        }
    }

    fn builder_for(&self, config: &ConfigFile) -> Arc<dyn ArtifactBuilder> {
        if let Some(builder) = &self.builder {
            return Arc::clone(builder);
        }
        match &config.build.remote {
            Some(remote) => {
                let mut remote = remote.clone();
                remote.staging_dir = config.resolve(&remote.staging_dir);
                Arc::new(RemoteBuilder::new(remote))
            }
            None => Arc::new(LocalBuilder::new(self.runner())),
        }
    }

    /// Artifacts of `config` with the builder, tagger and platforms they use.
    pub fn build_group_for(&self, config: &ConfigFile) -> Result<BuildGroup> {
        Ok(BuildGroup::new(
            config.name.clone(),
            config.artifacts.clone(),
            self.builder_for(config),
            Tagger::new(config.build.tag_policy, self.options.tag.clone()),
            self.platforms_for(config)?,
        ))
    }

    /// Run-wide build limit: `--build-concurrency`, else the tightest
    /// positive limit among configs with artifacts, else unbounded.
    pub fn build_concurrency(&self) -> usize {
        if let Some(limit) = self.options.build_concurrency {
            return limit;
        }
        self.configs
            .iter()
            .filter(|c| !c.artifacts.is_empty())
            .map(|c| c.build.concurrency)
            .filter(|&limit| limit > 0)
            .min()
            .unwrap_or(0)
    }

    pub fn build_runner(&self) -> BuildRunner {
        BuildRunner::new(Arc::clone(&self.fs), self.build_concurrency())
    }

    /// One deployer per config with a `[deploy]` section, in config order.
    pub fn deployer_mux(&self) -> Result<DeployerMux> {
        let mut deployers: Vec<Arc<dyn Deployer>> = Vec::new();
        for config in &self.configs {
            let Some(deploy) = &config.deploy else {
                continue;
            };
            let deployer: Arc<dyn Deployer> = match deploy {
                DeployerConfig::Kubectl(kubectl) => Arc::new(KubectlDeployer::new(
                    config.name.clone(),
                    kubectl.clone(),
                    manifest_paths(config, self.fs.as_ref())?,
                    self.runner(),
                )),
                DeployerConfig::Terraform(terraform) => Arc::new(TerraformDeployer::new(
                    config.name.clone(),
                    config.base_dir.clone(),
                    terraform.clone(),
                    self.runner(),
                )),
            };
            deployers.push(deployer);
        }
        DeployerMux::new(deployers)
    }
}

/// Insecure registries from the CLI, every config and the global config.
fn merge_registries(configs: &[ConfigFile], global: &GlobalConfig, options: &RunOptions) -> Registries {
    let insecure_registries: BTreeSet<String> = options
        .insecure_registries
        .iter()
        .chain(configs.iter().flat_map(|c| c.build.insecure_registries.iter()))
        .chain(global.insecure_registries.iter())
        .cloned()
        .collect();
    Registries {
        debug_helpers_registry: global.debug_helpers_registry().to_string(),
        insecure_registries,
    }
}
