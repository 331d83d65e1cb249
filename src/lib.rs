// src/lib.rs

pub mod archive;
pub mod build;
pub mod cli;
pub mod config;
pub mod dag;
pub mod deploy;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod fs;
pub mod logging;
pub mod manifest;
pub mod types;

use std::sync::Arc;

use anyhow::Result;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cli::{CliArgs, Command, GlobalArgs};
use crate::config::GlobalConfig;
use crate::config::loader::{default_config_path, load_all};
use crate::engine::{Driver, FilterOptions, Flow, RunContext, RunOptions};
use crate::exec::RealProcessRunner;
use crate::fs::RealFileSystem;
use crate::types::env_slice_to_map;

/// High-level entry point used by `main.rs`.
///
/// Loads every config, builds the run context once, and drives the chosen
/// flow. Ctrl-C cancels everything in flight.
pub async fn run(args: CliArgs) -> Result<()> {
    let config_paths = if args.global.configs.is_empty() {
        vec![default_config_path()]
    } else {
        args.global.configs.clone()
    };
    let configs = load_all(&config_paths)?;
    let global = GlobalConfig::load(args.global.global_config.as_deref())?;

    let ctx = RunContext::new(
        configs,
        &global,
        run_options(&args.global),
        Arc::new(RealFileSystem),
        Arc::new(RealProcessRunner),
    )?;

    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                warn!(error = %e, "failed to listen for Ctrl+C");
                return;
            }
            info!("interrupted; cancelling");
            cancel.cancel();
        });
    }

    let mut driver = Driver::new(&ctx, flow_for(args.command), cancel);
    driver.run().await?;
    Ok(())
}

fn run_options(global: &GlobalArgs) -> RunOptions {
    RunOptions {
        setters: env_slice_to_map(&global.setters),
        labels: env_slice_to_map(&global.labels),
        insecure_registries: global.insecure_registries.clone(),
        tag: global.tag.clone(),
        build_concurrency: global.build_concurrency,
        platforms: global.platforms.clone(),
    }
}

fn flow_for(command: Command) -> Flow {
    match command {
        Command::Build { file_output } => Flow::Build { file_output },
        Command::Render { output } => Flow::Render { output },
        Command::Deploy => Flow::Deploy,
        Command::Delete { dry_run } => Flow::Delete { dry_run },
        Command::Filter(filter) => Flow::Filter(FilterOptions {
            debugging: filter.debugging,
            protocols: filter.protocols,
            post_renderer: filter.post_renderer,
            build_artifacts: filter.build_artifacts,
        }),
    }
}
