// src/manifest/path.rs

//! Field paths into a manifest's field tree.
//!
//! Paths are written like `.spec.template.spec.containers[*].image`. Bracket
//! indexes are normalised to dotted segments (`.containers.*.image`), and
//! `*` matches any single map key or sequence index. The lone path `.*`
//! matches every field.

use std::fmt;

use serde_yaml::{Mapping, Value};

use crate::errors::{Result, RolloutError};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Key(String),
    Any,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(raw: &str) -> Result<Self> {
        let invalid = |why: &str| RolloutError::ConfigError(format!("invalid field path '{raw}': {why}"));

        let trimmed = raw.trim();
        let Some(rest) = trimmed.strip_prefix('.') else {
            return Err(invalid("must start with '.'"));
        };

        let normalised = rest.replace('[', ".").replace(']', "");
        let mut segments = Vec::new();
        for part in normalised.split('.') {
            match part {
                "" => return Err(invalid("empty segment")),
                "*" => segments.push(Segment::Any),
                key => segments.push(Segment::Key(key.to_string())),
            }
        }

        Ok(Self {
            raw: trimmed.to_string(),
            segments,
        })
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// `.*`: every field.
    pub fn matches_everything(&self) -> bool {
        self.segments == [Segment::Any]
    }

    /// Whether a concrete path (map keys and stringified indexes) matches.
    pub fn matches(&self, concrete: &[String]) -> bool {
        if self.matches_everything() {
            return true;
        }
        self.segments.len() == concrete.len()
            && self
                .segments
                .iter()
                .zip(concrete)
                .all(|(seg, part)| match seg {
                    Segment::Any => true,
                    Segment::Key(k) => k == part,
                })
    }

    /// Call `f` on every node at this path.
    ///
    /// Numeric keys index into sequences. Does nothing for `.*`; callers
    /// handling "every field" use [`for_each_keyed_mut`].
    pub fn for_each_match_mut<F>(&self, root: &mut Value, mut f: F)
    where
        F: FnMut(&mut Value),
    {
        if self.matches_everything() {
            return;
        }

        let mut stack: Vec<(&mut Value, usize)> = vec![(root, 0)];
        while let Some((node, depth)) = stack.pop() {
            let Some(segment) = self.segments.get(depth) else {
                f(node);
                continue;
            };

            // Children are pushed in reverse so they pop in document order.
            let mut children: Vec<&mut Value> = Vec::new();
            match (segment, node) {
                (Segment::Any, Value::Mapping(map)) => children.extend(map.values_mut()),
                (Segment::Any, Value::Sequence(seq)) => children.extend(seq.iter_mut()),
                (Segment::Key(key), Value::Mapping(map)) => {
                    if let Some(child) = map.get_mut(key.as_str()) {
                        children.push(child);
                    }
                }
                (Segment::Key(key), Value::Sequence(seq)) => {
                    if let Some(child) = key.parse::<usize>().ok().and_then(|i| seq.get_mut(i)) {
                        children.push(child);
                    }
                }
                _ => {}
            }
            for child in children.into_iter().rev() {
                stack.push((child, depth + 1));
            }
        }
    }
}

/// Call `f` on the value of every mapping entry named `key`, anywhere in the tree.
pub fn for_each_keyed_mut<F>(root: &mut Value, key: &str, mut f: F)
where
    F: FnMut(&mut Value),
{
    let mut stack: Vec<&mut Value> = vec![root];
    while let Some(node) = stack.pop() {
        match node {
            Value::Mapping(map) => {
                let mut children = Vec::new();
                for (k, v) in map.iter_mut() {
                    if k.as_str() == Some(key) {
                        f(v);
                    } else {
                        children.push(v);
                    }
                }
                stack.extend(children.into_iter().rev());
            }
            Value::Sequence(seq) => stack.extend(seq.iter_mut().rev()),
            _ => {}
        }
    }
}

/// Follow `keys` from `root` without creating anything.
pub(crate) fn descend_mut<'a>(root: &'a mut Value, keys: &[&str]) -> Option<&'a mut Value> {
    let mut node = root;
    for key in keys {
        node = node.get_mut(*key)?;
    }
    Some(node)
}

/// Get `parent[key]` as a mapping, creating it when absent or null.
///
/// `None` when the parent is not a mapping or the key holds something else.
pub(crate) fn child_mapping<'a>(parent: &'a mut Value, key: &str) -> Option<&'a mut Mapping> {
    match parent {
        Value::Mapping(map) => mapping_child(map, key),
        _ => None,
    }
}

pub(crate) fn mapping_child<'a>(map: &'a mut Mapping, key: &str) -> Option<&'a mut Mapping> {
    let slot = map.entry(Value::String(key.to_string())).or_insert(Value::Null);
    if slot.is_null() {
        *slot = Value::Mapping(Mapping::new());
    }
    match slot {
        Value::Mapping(child) => Some(child),
        _ => None,
    }
}

/// Like [`mapping_child`], for sequences.
pub(crate) fn mapping_seq<'a>(map: &'a mut Mapping, key: &str) -> Option<&'a mut Vec<Value>> {
    let slot = map.entry(Value::String(key.to_string())).or_insert(Value::Null);
    if slot.is_null() {
        *slot = Value::Sequence(Vec::new());
    }
    match slot {
        Value::Sequence(seq) => Some(seq),
        _ => None,
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}
