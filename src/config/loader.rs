// src/config/loader.rs

use std::fs;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::config::model::{ConfigFile, RawConfigFile};
use crate::config::validate::validate_config_set;
use crate::errors::Result;

/// Load a configuration file from a given path and return the raw `RawConfigFile`.
///
/// This only performs TOML deserialization; it does **not** perform semantic
/// validation. Use [`load_and_validate`] for that.
pub fn load_from_path(path: impl AsRef<Path>) -> Result<RawConfigFile> {
    let path = path.as_ref();
    let contents = fs::read_to_string(path)?;

    let config: RawConfigFile = toml::from_str(&contents)?;

    Ok(config)
}

/// Load a configuration file from path and validate it.
///
/// - Reads TOML.
/// - Applies defaults (handled by `serde` + `Default` impls).
/// - Resolves artifact and deployer backends to their closed variants.
/// - Checks artifact `requires` references and cycles, unit name
///   uniqueness, and selector GroupKind syntax.
pub fn load_and_validate(path: impl AsRef<Path>) -> Result<ConfigFile> {
    let path = path.as_ref();
    let raw_config = load_from_path(path)?;
    let config = ConfigFile::try_from(raw_config)?.with_source(path);
    debug!(config = %config.name, path = ?path, "loaded configuration");
    Ok(config)
}

/// Load every given config and check they can be used together.
pub fn load_all(paths: &[PathBuf]) -> Result<Vec<ConfigFile>> {
    let configs = paths
        .iter()
        .map(|p| load_and_validate(p))
        .collect::<Result<Vec<_>>>()?;
    validate_config_set(&configs)?;
    Ok(configs)
}

/// Default project config path: `Rollout.toml` in the working directory.
pub fn default_config_path() -> PathBuf {
    PathBuf::from("Rollout.toml")
}
