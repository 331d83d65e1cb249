// src/config/mod.rs

//! Configuration loading and validation for rollout.
//!
//! Responsibilities:
//! - Define the TOML-backed data model (`model.rs`).
//! - Load config files from disk (`loader.rs`).
//! - Validate invariants and resolve backend variants (`validate.rs`).
//! - Read user-level settings (`global.rs`).

pub mod global;
pub mod loader;
pub mod model;
pub mod validate;

pub use global::GlobalConfig;
pub use loader::{load_all, load_and_validate, load_from_path};
pub use model::{
    ArtifactConfig, BuildSection, ConfigFile, DeployerConfig, DeploymentUnit, KubectlDeploy,
    ManifestsSection, RawConfigFile, RemoteBuildConfig, ResourceFilter, ResourceSelectorSection,
    SecretConfig, TerraformDeploy,
};
pub use validate::validate_config_set;
