// src/cli.rs

//! CLI argument parsing using `clap`.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand, ValueEnum};

/// Command-line arguments for `rollout`.
#[derive(Debug, Clone, Parser)]
#[command(
    name = "rollout",
    version,
    about = "Build images, render manifests and deploy them.",
    long_about = None
)]
pub struct CliArgs {
    #[command(flatten)]
    pub global: GlobalArgs,

    #[command(subcommand)]
    pub command: Command,
}

/// Flags shared by every subcommand.
#[derive(Debug, Clone, Default, Args)]
pub struct GlobalArgs {
    /// Project config file (TOML). Repeat to load several configurations.
    ///
    /// Default: `Rollout.toml` in the current working directory.
    #[arg(long = "config", short = 'c', value_name = "PATH", global = true)]
    pub configs: Vec<PathBuf>,

    /// Logging level (error, warn, info, debug, trace).
    ///
    /// If omitted, `ROLLOUT_LOG` or a default level will be used.
    #[arg(long, value_enum, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// User-level settings file. Default: `~/.rollout/config.toml`.
    #[arg(long, value_name = "PATH", global = true)]
    pub global_config: Option<PathBuf>,

    /// Registry reachable over plain http.
    #[arg(long = "insecure-registry", value_name = "HOST", global = true)]
    pub insecure_registries: Vec<String>,

    /// Setter override, `KEY=VALUE`.
    #[arg(long = "set", value_name = "KEY=VALUE", global = true)]
    pub setters: Vec<String>,

    /// Extra label for every selected resource, `KEY=VALUE`.
    #[arg(long = "label", short = 'l', value_name = "KEY=VALUE", global = true)]
    pub labels: Vec<String>,

    /// Use this tag for every artifact.
    #[arg(long, short = 't', value_name = "TAG", global = true)]
    pub tag: Option<String>,

    /// Maximum concurrent builds; `0` means unlimited.
    #[arg(long, value_name = "N", global = true)]
    pub build_concurrency: Option<usize>,

    /// Target platform, `os/arch`.
    #[arg(long = "platform", value_name = "OS/ARCH", global = true)]
    pub platforms: Vec<String>,
}

#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Build every artifact.
    Build {
        /// Write build results as JSON to this file.
        #[arg(long, value_name = "PATH")]
        file_output: Option<PathBuf>,
    },
    /// Print the transformed manifests without building.
    Render {
        /// Write the stream to this file instead of stdout.
        #[arg(long, short = 'o', value_name = "PATH")]
        output: Option<PathBuf>,
    },
    /// Build, transform and deploy.
    Deploy,
    /// Remove what `deploy` created.
    Delete {
        /// Print what would be deleted without running anything.
        #[arg(long)]
        dry_run: bool,
    },
    /// Transform a manifest stream from stdin and print it.
    Filter(FilterArgs),
}

#[derive(Debug, Clone, Default, Args)]
pub struct FilterArgs {
    /// Apply debug transforms.
    #[arg(long)]
    pub debugging: bool,

    /// Debugger protocols in priority order.
    #[arg(long, value_delimiter = ',', value_name = "PROTOCOL")]
    pub protocols: Vec<String>,

    /// Executable that reads manifests on stdin and writes manifests to stdout.
    #[arg(long, value_name = "EXE")]
    pub post_renderer: Option<PathBuf>,

    /// Results file from a previous `build --file-output`.
    #[arg(long, short = 'a', value_name = "PATH")]
    pub build_artifacts: Option<PathBuf>,
}

/// Log level as exposed on the CLI.
#[derive(Debug, Copy, Clone, ValueEnum)]
pub enum LogLevel {
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

/// Convenience wrapper around `CliArgs::parse()`.
pub fn parse() -> CliArgs {
    CliArgs::parse()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn global_flags_after_subcommand() {
        let args = CliArgs::try_parse_from([
            "rollout",
            "delete",
            "--dry-run",
            "--config",
            "a.toml",
            "--config",
            "b.toml",
            "--set",
            "replicas=2",
        ])
        .unwrap();
        assert_eq!(args.global.configs, vec![PathBuf::from("a.toml"), PathBuf::from("b.toml")]);
        assert_eq!(args.global.setters, vec!["replicas=2".to_string()]);
        assert!(matches!(args.command, Command::Delete { dry_run: true }));
    }

    #[test]
    fn filter_protocols_split_on_commas() {
        let args = CliArgs::try_parse_from(["rollout", "filter", "--debugging", "--protocols", "dap,jdwp"])
            .unwrap();
        let Command::Filter(filter) = args.command else {
            panic!("expected filter");
        };
        assert!(filter.debugging);
        assert_eq!(filter.protocols, vec!["dap".to_string(), "jdwp".to_string()]);
    }

    #[test]
    fn verify_cli() {
        use clap::CommandFactory;
        CliArgs::command().debug_assert();
    }
}
