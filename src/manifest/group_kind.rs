// src/manifest/group_kind.rs

use std::fmt;

use crate::errors::{Result, RolloutError};

/// The (API group, kind) pair identifying a resource type.
///
/// Written as `Kind.group` (`Deployment.apps`) or just `Kind` for the core
/// group (`Pod`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct GroupKind {
    pub group: String,
    pub kind: String,
}

impl GroupKind {
    pub fn new(group: &str, kind: &str) -> Self {
        Self {
            group: group.to_string(),
            kind: kind.to_string(),
        }
    }

    /// Parse `Kind.group` from configuration.
    ///
    /// Malformed keys are a configuration error: empty input, whitespace,
    /// an empty kind (`.apps`) or an empty group after the dot (`Deployment.`).
    pub fn parse(s: &str) -> Result<Self> {
        let malformed =
            |why: &str| RolloutError::ConfigError(format!("malformed GroupKind '{s}': {why}"));

        if s.is_empty() {
            return Err(malformed("empty"));
        }
        if s.chars().any(char::is_whitespace) {
            return Err(malformed("contains whitespace"));
        }

        match s.split_once('.') {
            None => Ok(Self::new("", s)),
            Some(("", _)) => Err(malformed("missing kind")),
            Some((_, "")) => Err(malformed("missing group after '.'")),
            Some((kind, group)) => Ok(Self::new(group, kind)),
        }
    }

    /// Derive from a document's `apiVersion` and `kind`.
    ///
    /// `apps/v1` yields group `apps`; `v1` yields the core group.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        let group = match api_version.split_once('/') {
            Some((group, _version)) => group,
            None => "",
        };
        Self::new(group, kind)
    }
}

impl fmt::Display for GroupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.group.is_empty() {
            f.write_str(&self.kind)
        } else {
            write!(f, "{}.{}", self.kind, self.group)
        }
    }
}
