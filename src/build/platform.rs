// src/build/platform.rs

//! Target platform constraints (`os/arch[/variant]`).

use std::fmt;
use std::str::FromStr;

use crate::errors::RolloutError;

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Platform {
    pub os: String,
    pub arch: String,
    pub variant: Option<String>,
}

impl Platform {
    pub fn new(os: &str, arch: &str) -> Self {
        Self {
            os: os.to_string(),
            arch: arch.to_string(),
            variant: None,
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.variant {
            Some(v) => write!(f, "{}/{}/{}", self.os, self.arch, v),
            None => write!(f, "{}/{}", self.os, self.arch),
        }
    }
}

impl FromStr for Platform {
    type Err = RolloutError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let parts: Vec<&str> = s.trim().split('/').collect();
        let invalid = || RolloutError::ConfigError(format!("invalid platform '{s}' (expected os/arch[/variant])"));
        match parts.as_slice() {
            [os, arch] if !os.is_empty() && !arch.is_empty() => Ok(Platform::new(os, arch)),
            [os, arch, variant] if !os.is_empty() && !arch.is_empty() && !variant.is_empty() => {
                Ok(Platform {
                    os: os.to_string(),
                    arch: arch.to_string(),
                    variant: Some(variant.to_string()),
                })
            }
            _ => Err(invalid()),
        }
    }
}

/// A set of platforms, or "all platforms".
///
/// An empty, non-`all` matcher means "no constraint requested".
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct PlatformMatcher {
    all: bool,
    platforms: Vec<Platform>,
}

impl PlatformMatcher {
    pub fn all() -> Self {
        Self {
            all: true,
            platforms: Vec::new(),
        }
    }

    pub fn from_platforms(mut platforms: Vec<Platform>) -> Self {
        platforms.sort();
        platforms.dedup();
        Self {
            all: false,
            platforms,
        }
    }

    /// Parse a list of `os/arch` strings.
    pub fn parse<S: AsRef<str>>(specs: &[S]) -> Result<Self, RolloutError> {
        let platforms = specs
            .iter()
            .map(|s| s.as_ref().parse::<Platform>())
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self::from_platforms(platforms))
    }

    pub fn is_all(&self) -> bool {
        self.all
    }

    pub fn is_empty(&self) -> bool {
        !self.all && self.platforms.is_empty()
    }

    pub fn is_not_empty(&self) -> bool {
        !self.is_empty()
    }

    pub fn platforms(&self) -> &[Platform] {
        &self.platforms
    }

    pub fn intersect(&self, other: &PlatformMatcher) -> PlatformMatcher {
        if self.all {
            return other.clone();
        }
        if other.all {
            return self.clone();
        }
        let common = self
            .platforms
            .iter()
            .filter(|p| other.platforms.contains(p))
            .cloned()
            .collect();
        Self::from_platforms(common)
    }
}

impl fmt::Display for PlatformMatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.all {
            return f.write_str("all");
        }
        let names: Vec<String> = self.platforms.iter().map(ToString::to_string).collect();
        write!(f, "[{}]", names.join(", "))
    }
}
