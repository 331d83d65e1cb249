// src/config/global.rs

//! User-level settings shared by all projects (`~/.rollout/config.toml`).

use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::errors::Result;

/// Registry that hosts the debug helper images when nothing else is set.
pub const DEFAULT_DEBUG_HELPERS_REGISTRY: &str = "gcr.io/k8s-skaffold/skaffold-debug-support";

#[derive(Debug, Clone, Default, Deserialize)]
pub struct GlobalConfig {
    #[serde(default)]
    pub insecure_registries: Vec<String>,
    #[serde(default)]
    pub debug_helpers_registry: Option<String>,
}

impl GlobalConfig {
    /// Load from an explicit path, or from `$HOME/.rollout/config.toml`.
    ///
    /// A missing file yields the defaults.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        let path = match explicit {
            Some(p) => p.to_path_buf(),
            None => match default_global_config_path() {
                Some(p) => p,
                None => return Ok(Self::default()),
            },
        };

        if !path.is_file() {
            debug!(path = ?path, "no global config file; using defaults");
            return Ok(Self::default());
        }

        let contents = std::fs::read_to_string(&path)?;
        let cfg: GlobalConfig = toml::from_str(&contents)?;
        Ok(cfg)
    }

    pub fn debug_helpers_registry(&self) -> &str {
        self.debug_helpers_registry
            .as_deref()
            .unwrap_or(DEFAULT_DEBUG_HELPERS_REGISTRY)
    }
}

fn default_global_config_path() -> Option<PathBuf> {
    std::env::var_os("HOME").map(|home| PathBuf::from(home).join(".rollout").join("config.toml"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn missing_explicit_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = GlobalConfig::load(Some(&dir.path().join("nope.toml"))).unwrap();
        assert!(cfg.insecure_registries.is_empty());
        assert_eq!(cfg.debug_helpers_registry(), DEFAULT_DEBUG_HELPERS_REGISTRY);
    }

    #[test]
    fn reads_registries() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"
insecure_registries = ["localhost:5000"]
debug_helpers_registry = "registry.local/debug"
"#
        )
        .unwrap();
        let cfg = GlobalConfig::load(Some(file.path())).unwrap();
        assert_eq!(cfg.insecure_registries, vec!["localhost:5000".to_string()]);
        assert_eq!(cfg.debug_helpers_registry(), "registry.local/debug");
    }
}
