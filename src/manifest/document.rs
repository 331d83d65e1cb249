// src/manifest/document.rs

//! Manifest documents and ordered collections of them.
//!
//! A document keeps its original text next to the parsed field tree. Until
//! a transform changes the tree, rendering returns the original text, so
//! untouched documents round-trip byte for byte.

use std::collections::BTreeMap;
use std::fmt;

use serde_yaml::Value;

use crate::errors::Result;
use crate::manifest::group_kind::GroupKind;

/// Document separator line in a manifest stream.
pub const SEPARATOR: &str = "---";

#[derive(Debug, Clone)]
pub struct ManifestDocument {
    raw: String,
    value: Value,
    modified: bool,
}

impl ManifestDocument {
    pub fn parse(raw: impl Into<String>) -> Result<Self> {
        let raw = raw.into();
        let value: Value = serde_yaml::from_str(&raw)?;
        Ok(Self {
            raw,
            value,
            modified: false,
        })
    }

    pub fn value(&self) -> &Value {
        &self.value
    }

    /// Mutable access to the field tree.
    ///
    /// Callers report a real change through [`ManifestDocument::mark_modified`];
    /// borrowing alone does not dirty the document.
    pub fn value_mut(&mut self) -> &mut Value {
        &mut self.value
    }

    pub fn mark_modified(&mut self) {
        self.modified = true;
    }

    pub fn is_modified(&self) -> bool {
        self.modified
    }

    pub fn raw(&self) -> &str {
        &self.raw
    }

    /// Replace the document text wholesale (text-level transforms).
    ///
    /// No-op when the text is unchanged.
    pub fn replace_raw(&mut self, raw: String) -> Result<()> {
        if raw == self.raw {
            return Ok(());
        }
        self.value = serde_yaml::from_str(&raw)?;
        self.raw = raw;
        self.modified = false;
        Ok(())
    }

    pub fn group_kind(&self) -> Option<GroupKind> {
        let kind = self.value.get("kind")?.as_str()?;
        let api_version = self
            .value
            .get("apiVersion")
            .and_then(Value::as_str)
            .unwrap_or("v1");
        Some(GroupKind::from_api_version(api_version, kind))
    }

    pub fn name(&self) -> Option<&str> {
        self.value.get("metadata")?.get("name")?.as_str()
    }

    pub fn namespace(&self) -> Option<&str> {
        self.value.get("metadata")?.get("namespace")?.as_str()
    }

    /// Text of this document in an output stream, newline terminated.
    pub fn render(&self) -> Result<String> {
        let mut out = if self.modified {
            serde_yaml::to_string(&self.value)?
        } else {
            self.raw.clone()
        };
        if !out.ends_with('\n') {
            out.push('\n');
        }
        Ok(out)
    }
}

/// Ordered sequence of manifest documents.
#[derive(Debug, Clone, Default)]
pub struct ManifestList {
    docs: Vec<ManifestDocument>,
}

impl ManifestList {
    pub fn new() -> Self {
        Self::default()
    }

    /// Split a stream on separator lines and parse each non-blank document.
    pub fn parse(stream: &str) -> Result<Self> {
        let mut list = Self::new();
        let mut current = String::new();

        for line in stream.split_inclusive('\n') {
            if line.trim_end() == SEPARATOR {
                list.push_chunk(std::mem::take(&mut current))?;
            } else {
                current.push_str(line);
            }
        }
        list.push_chunk(current)?;

        Ok(list)
    }

    fn push_chunk(&mut self, chunk: String) -> Result<()> {
        if chunk.trim().is_empty() {
            return Ok(());
        }
        self.docs.push(ManifestDocument::parse(chunk)?);
        Ok(())
    }

    /// Append every document of `other`, preserving order.
    pub fn extend(&mut self, other: ManifestList) {
        self.docs.extend(other.docs);
    }

    pub fn push(&mut self, doc: ManifestDocument) {
        self.docs.push(doc);
    }

    pub fn len(&self) -> usize {
        self.docs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.docs.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, ManifestDocument> {
        self.docs.iter()
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, ManifestDocument> {
        self.docs.iter_mut()
    }

    /// Render the whole stream.
    pub fn render(&self) -> Result<String> {
        let rendered = self
            .docs
            .iter()
            .map(ManifestDocument::render)
            .collect::<Result<Vec<_>>>()?;
        Ok(rendered.join("---\n"))
    }
}

impl fmt::Display for ManifestList {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let text = self.render().map_err(|_| fmt::Error)?;
        f.write_str(&text)
    }
}

impl<'a> IntoIterator for &'a ManifestList {
    type Item = &'a ManifestDocument;
    type IntoIter = std::slice::Iter<'a, ManifestDocument>;

    fn into_iter(self) -> Self::IntoIter {
        self.docs.iter()
    }
}

/// Manifests grouped by the name of the configuration they came from.
#[derive(Debug, Clone, Default)]
pub struct ManifestListByConfig {
    by_config: BTreeMap<String, ManifestList>,
    order: Vec<String>,
}

impl ManifestListByConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append to a config's list, remembering first-seen config order.
    pub fn add(&mut self, config_name: &str, list: ManifestList) {
        match self.by_config.get_mut(config_name) {
            Some(existing) => existing.extend(list),
            None => {
                self.order.push(config_name.to_string());
                self.by_config.insert(config_name.to_string(), list);
            }
        }
    }

    pub fn get(&self, config_name: &str) -> Option<&ManifestList> {
        self.by_config.get(config_name)
    }

    /// Lists in configuration order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &ManifestList)> {
        self.order
            .iter()
            .filter_map(|name| self.by_config.get(name).map(|l| (name.as_str(), l)))
    }

    /// Every document of every config, concatenated in configuration order.
    pub fn flatten(&self) -> ManifestList {
        let mut all = ManifestList::new();
        for (_, list) in self.iter() {
            all.extend(list.clone());
        }
        all
    }

    pub fn is_empty(&self) -> bool {
        self.by_config.values().all(ManifestList::is_empty)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const STREAM: &str = "apiVersion: v1\nkind: Service\nmetadata:\n  name: web   # keep\n---\napiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\n  namespace: prod\n";

    #[test]
    fn untouched_stream_round_trips() {
        let list = ManifestList::parse(STREAM).unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list.render().unwrap(), STREAM);
    }

    #[test]
    fn addresses_documents() {
        let list = ManifestList::parse(STREAM).unwrap();
        let docs: Vec<_> = list.iter().collect();
        assert_eq!(docs[0].group_kind().unwrap().to_string(), "Service");
        assert_eq!(docs[1].group_kind().unwrap().to_string(), "Deployment.apps");
        assert_eq!(docs[1].name(), Some("web"));
        assert_eq!(docs[1].namespace(), Some("prod"));
    }

    #[test]
    fn blank_documents_are_skipped() {
        let list = ManifestList::parse("---\n\n---\nkind: Pod\n---\n").unwrap();
        assert_eq!(list.len(), 1);
        assert!(ManifestList::parse("").unwrap().is_empty());
    }

    #[test]
    fn grouping_keeps_config_order() {
        let mut by_config = ManifestListByConfig::new();
        by_config.add("zeta", ManifestList::parse("kind: Pod\n").unwrap());
        by_config.add("alpha", ManifestList::parse("kind: Service\n").unwrap());
        let names: Vec<_> = by_config.iter().map(|(n, _)| n).collect();
        assert_eq!(names, vec!["zeta", "alpha"]);
        assert_eq!(by_config.flatten().len(), 2);
    }
}
