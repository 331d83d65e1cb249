// src/manifest/setters.rs

//! Setter overrides: literal substitutions driven by line markers.
//!
//! ```yaml
//! image: nginx:1.25 # from-param: ${image}:${tag}
//! replicas: 1       # kpt-set: ${replicas}
//! ```
//!
//! When every `${name}` in a marker has a value, the field value on that
//! line is replaced by the expanded pattern. Lines whose marker references
//! an unknown name are left alone. The stage works on the document text so
//! comments and layout survive, then re-parses the result.

use std::collections::BTreeMap;
use std::sync::LazyLock;

use regex::Regex;
use tracing::debug;

use crate::errors::{Result, RolloutError};
use crate::manifest::document::ManifestList;

static MARKER: LazyLock<Option<Regex>> = LazyLock::new(|| {
    Regex::new(r"\s#\s*(?:kpt-set|from-param):\s*(?P<pattern>\S.*?)\s*$").ok()
});

fn stage_error(message: impl Into<String>) -> RolloutError {
    RolloutError::Transform {
        stage: "setters",
        message: message.into(),
    }
}

/// Apply setter values to every document in place.
pub fn apply_setters(list: &mut ManifestList, setters: &BTreeMap<String, String>) -> Result<()> {
    if setters.is_empty() || list.is_empty() {
        return Ok(());
    }

    for doc in list.iter_mut() {
        let mut changed = false;
        let mut out = String::with_capacity(doc.raw().len());
        for line in doc.raw().split_inclusive('\n') {
            let (body, newline) = match line.strip_suffix('\n') {
                Some(body) => (body, "\n"),
                None => (line, ""),
            };
            match set_line(body, setters)? {
                Some(updated) if updated != body => {
                    changed = true;
                    out.push_str(&updated);
                }
                _ => out.push_str(body),
            }
            out.push_str(newline);
        }

        if changed {
            debug!(resource = ?doc.name(), "applied setters");
            doc.replace_raw(out)
                .map_err(|e| stage_error(format!("re-parsing document after setters: {e}")))?;
        }
    }
    Ok(())
}

/// Rewrite one line, or `None` when it carries no applicable marker.
fn set_line(line: &str, setters: &BTreeMap<String, String>) -> Result<Option<String>> {
    let Some(marker_re) = MARKER.as_ref() else {
        return Err(stage_error("setter marker pattern failed to compile"));
    };
    let Some(caps) = marker_re.captures(line) else {
        return Ok(None);
    };
    let Some(marker) = caps.get(0) else {
        return Ok(None);
    };
    let pattern = &caps["pattern"];

    let Some(value) = expand(pattern, setters)? else {
        return Ok(None);
    };

    let head = &line[..marker.start()];
    let Some((prefix, old_value)) = split_value(head) else {
        return Ok(None);
    };

    let new_value = render_scalar(&value, old_value.trim());
    let gap = &head[prefix.len() + old_value.trim_end().len()..];
    let comment = &line[marker.start()..];
    Ok(Some(format!("{prefix}{new_value}{gap}{comment}")))
}

/// Split `  key: value  ` or `  - value  ` into prefix and value.
fn split_value(head: &str) -> Option<(&str, &str)> {
    if let Some(idx) = head.find(": ") {
        let mut start = idx + 2;
        while head[start..].starts_with(' ') {
            start += 1;
        }
        return Some((&head[..start], &head[start..]));
    }
    let trimmed = head.trim_start();
    if let Some(rest) = trimmed.strip_prefix("- ") {
        let start = head.len() - rest.trim_start().len();
        return Some((&head[..start], &head[start..]));
    }
    None
}

/// Expand `${name}` references. `None` when any name has no value.
fn expand(pattern: &str, setters: &BTreeMap<String, String>) -> Result<Option<String>> {
    let mut out = String::new();
    let mut rest = pattern;
    while let Some(open) = rest.find("${") {
        out.push_str(&rest[..open]);
        let after = &rest[open + 2..];
        let Some(close) = after.find('}') else {
            return Err(stage_error(format!("unterminated '${{' in setter marker '{pattern}'")));
        };
        let name = &after[..close];
        match setters.get(name) {
            Some(v) => out.push_str(v),
            None => return Ok(None),
        }
        rest = &after[close + 1..];
    }
    out.push_str(rest);
    Ok(Some(out))
}

/// Quote the new value like the old one, or when YAML would misread it.
fn render_scalar(value: &str, old: &str) -> String {
    if old.starts_with('"') {
        return format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""));
    }
    if old.starts_with('\'') {
        return format!("'{}'", value.replace('\'', "''"));
    }
    let needs_quotes = value.is_empty()
        || value.contains(": ")
        || value.contains(" #")
        || value.starts_with(|c: char| "-?:,[]{}#&*!|>'\"%@`".contains(c))
        || value != value.trim();
    if needs_quotes {
        format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
    } else {
        value.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn setters(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn replaces_value_and_keeps_marker() {
        let s = setters(&[("image", "web"), ("tag", "v2")]);
        let line = "    image: web:v1 # from-param: ${image}:${tag}";
        assert_eq!(
            set_line(line, &s).unwrap().unwrap(),
            "    image: web:v2 # from-param: ${image}:${tag}"
        );
    }

    #[test]
    fn list_items_and_quoting() {
        let s = setters(&[("flag", "--verbose")]);
        assert_eq!(
            set_line("  - --quiet # kpt-set: ${flag}", &s).unwrap().unwrap(),
            "  - \"--verbose\" # kpt-set: ${flag}"
        );
        let s = setters(&[("env", "prod")]);
        assert_eq!(
            set_line("  ENV: 'dev' # kpt-set: ${env}", &s).unwrap().unwrap(),
            "  ENV: 'prod' # kpt-set: ${env}"
        );
    }

    #[test]
    fn unknown_names_leave_line_alone() {
        let s = setters(&[("a", "1")]);
        assert!(set_line("x: 0 # kpt-set: ${b}", &s).unwrap().is_none());
        assert!(set_line("x: 0 # ordinary comment", &s).unwrap().is_none());
    }

    #[test]
    fn unterminated_reference_is_an_error() {
        let s = setters(&[("a", "1")]);
        let err = set_line("x: 0 # kpt-set: ${a", &s).unwrap_err();
        assert!(err.to_string().contains("setters"));
    }

    #[test]
    fn applying_twice_is_idempotent() {
        let s = setters(&[("replicas", "3")]);
        let mut list =
            ManifestList::parse("kind: Deployment\nspec:\n  replicas: 1 # kpt-set: ${replicas}\n")
                .unwrap();
        apply_setters(&mut list, &s).unwrap();
        let once = list.render().unwrap();
        apply_setters(&mut list, &s).unwrap();
        assert_eq!(list.render().unwrap(), once);
        assert!(once.contains("replicas: 3 # kpt-set: ${replicas}"));
        let doc = list.iter().next().unwrap();
        assert_eq!(doc.value()["spec"]["replicas"].as_u64(), Some(3));
    }
}
