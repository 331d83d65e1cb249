use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

/// How image tags are computed for artifacts.
///
/// - `InputDigest`: hash of the artifact workspace contents (default).
/// - `Latest`: always `latest`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum TagPolicy {
    InputDigest,
    Latest,
}

impl Default for TagPolicy {
    fn default() -> Self {
        TagPolicy::InputDigest
    }
}

impl FromStr for TagPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "input-digest" => Ok(TagPolicy::InputDigest),
            "latest" => Ok(TagPolicy::Latest),
            other => Err(format!(
                "invalid tag_policy: {other} (expected \"input-digest\" or \"latest\")"
            )),
        }
    }
}

/// Where the final image reference of a build comes from.
///
/// `Tag` means "compute the tag, but do not run any builder". The delete and
/// render flows force this so that nothing gets rebuilt just to be removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DigestSource {
    #[default]
    Build,
    Tag,
}

/// Stage identifier attached to backend execution failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Init,
    Workspace,
    Apply,
    Destroy,
    Build,
    Submit,
    Render,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Stage::Init => "init",
            Stage::Workspace => "workspace",
            Stage::Apply => "apply",
            Stage::Destroy => "destroy",
            Stage::Build => "build",
            Stage::Submit => "submit",
            Stage::Render => "render",
        };
        f.write_str(s)
    }
}

/// Split `KEY=VALUE` strings into a map. Entries without `=` map to "".
///
/// Later entries win on duplicate keys.
pub fn env_slice_to_map<I, S>(entries: I) -> std::collections::BTreeMap<String, String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    entries
        .into_iter()
        .map(|entry| {
            let entry = entry.as_ref();
            match entry.split_once('=') {
                Some((k, v)) => (k.to_string(), v.to_string()),
                None => (entry.to_string(), String::new()),
            }
        })
        .collect()
}
