// src/manifest/source.rs

//! Reading a configuration's raw manifests from disk.

use std::path::PathBuf;

use tracing::debug;

use crate::config::model::ConfigFile;
use crate::errors::{Result, RolloutError};
use crate::fs::{FileSystem, PatternSet};
use crate::manifest::document::ManifestList;

/// Manifest files selected by a config's `[manifests] raw` globs, sorted.
pub fn manifest_paths(config: &ConfigFile, fs: &dyn FileSystem) -> Result<Vec<PathBuf>> {
    let patterns = PatternSet::new(&config.manifests.raw)
        .map_err(|e| RolloutError::ConfigError(format!("config {}: {e:#}", config.name)))?;
    let paths = patterns.collect(fs, &config.base_dir)?;
    Ok(paths)
}

/// Load and concatenate every manifest file of a config, in path order.
pub fn load_manifests(config: &ConfigFile, fs: &dyn FileSystem) -> Result<ManifestList> {
    let mut list = ManifestList::new();
    for path in manifest_paths(config, fs)? {
        let text = fs.read_to_string(&path)?;
        let parsed = ManifestList::parse(&text).map_err(|e| {
            RolloutError::ConfigError(format!("parsing manifest {}: {e}", path.display()))
        })?;
        debug!(config = %config.name, path = %path.display(), documents = parsed.len(), "loaded manifests");
        list.extend(parsed);
    }
    Ok(list)
}
