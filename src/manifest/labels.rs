// src/manifest/labels.rs

use std::collections::BTreeMap;

use serde_yaml::{Mapping, Value};
use tracing::debug;

use crate::errors::Result;
use crate::manifest::document::ManifestList;
use crate::manifest::path::{child_mapping, mapping_child};
use crate::manifest::selector::ResourceSelector;

/// Provenance label attached to every selected resource.
pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "rollout";

/// Fixed provenance labels merged with user labels. User labels win.
pub fn provenance_labels(custom: &BTreeMap<String, String>) -> BTreeMap<String, String> {
    let mut labels = BTreeMap::from([(MANAGED_BY_LABEL.to_string(), MANAGED_BY_VALUE.to_string())]);
    labels.extend(custom.iter().map(|(k, v)| (k.clone(), v.clone())));
    labels
}

/// Write `labels` into `metadata.labels` of every selected document, and
/// into the extra label maps its selector rule names.
///
/// Existing identical labels are left alone, so reapplying is a no-op.
pub fn set_labels(
    list: &mut ManifestList,
    labels: &BTreeMap<String, String>,
    selector: &ResourceSelector,
) -> Result<()> {
    if labels.is_empty() {
        return Ok(());
    }

    for doc in list.iter_mut() {
        let Some(gk) = doc.group_kind() else {
            continue;
        };
        let Some(rule) = selector.rule_for(&gk) else {
            continue;
        };
        let root = doc.value_mut();
        let mut changed = false;

        if let Some(metadata) = child_mapping(root, "metadata") {
            if let Some(target) = mapping_child(metadata, "labels") {
                changed |= merge_labels(target, labels);
            }
        }

        for path in rule.labels.iter().filter(|p| !p.matches_everything()) {
            path.for_each_match_mut(root, |node| {
                if let Value::Mapping(map) = node {
                    changed |= merge_labels(map, labels);
                }
            });
        }

        if changed {
            debug!(kind = %gk, resource = ?doc.name(), "labels applied");
            doc.mark_modified();
        }
    }
    Ok(())
}

fn merge_labels(target: &mut Mapping, labels: &BTreeMap<String, String>) -> bool {
    let mut changed = false;
    for (k, v) in labels {
        let key = Value::String(k.clone());
        if target.get(&key).and_then(Value::as_str) != Some(v.as_str()) {
            target.insert(key, Value::String(v.clone()));
            changed = true;
        }
    }
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    const DEPLOYMENT: &str = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  template:\n    metadata:\n      labels:\n        app: web\n";
    const CRD: &str = "apiVersion: apiextensions.k8s.io/v1\nkind: CustomResourceDefinition\nmetadata:\n  name: widgets.example.com\n";

    #[test]
    fn labels_selected_resources_and_template() {
        let mut list = ManifestList::parse(DEPLOYMENT).unwrap();
        let labels = provenance_labels(&BTreeMap::from([("team".to_string(), "core".to_string())]));
        set_labels(&mut list, &labels, &ResourceSelector::defaults()).unwrap();

        let doc = list.iter().next().unwrap();
        assert!(doc.is_modified());
        let v = doc.value();
        assert_eq!(v["metadata"]["labels"][MANAGED_BY_LABEL].as_str(), Some(MANAGED_BY_VALUE));
        assert_eq!(v["metadata"]["labels"]["team"].as_str(), Some("core"));
        assert_eq!(v["spec"]["template"]["metadata"]["labels"]["app"].as_str(), Some("web"));
        assert_eq!(v["spec"]["template"]["metadata"]["labels"]["team"].as_str(), Some("core"));
    }

    #[test]
    fn denied_kinds_are_untouched() {
        let mut list = ManifestList::parse(CRD).unwrap();
        set_labels(&mut list, &provenance_labels(&BTreeMap::new()), &ResourceSelector::defaults())
            .unwrap();
        let doc = list.iter().next().unwrap();
        assert!(!doc.is_modified());
        assert_eq!(list.render().unwrap(), CRD);
    }

    #[test]
    fn reapplying_changes_nothing() {
        let mut list = ManifestList::parse(DEPLOYMENT).unwrap();
        let labels = provenance_labels(&BTreeMap::new());
        let selector = ResourceSelector::defaults();
        set_labels(&mut list, &labels, &selector).unwrap();
        let once = list.render().unwrap();
        set_labels(&mut list, &labels, &selector).unwrap();
        assert_eq!(list.render().unwrap(), once);
        assert_eq!(once.matches(MANAGED_BY_LABEL).count(), 2);
    }
}
