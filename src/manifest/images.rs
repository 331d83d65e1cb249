// src/manifest/images.rs

use std::collections::BTreeSet;

use serde_yaml::Value;
use tracing::debug;

use crate::build::artifact::BuiltArtifact;
use crate::errors::Result;
use crate::manifest::document::ManifestList;
use crate::manifest::image::ImageReference;
use crate::manifest::path::for_each_keyed_mut;
use crate::manifest::selector::ResourceSelector;

/// Replace image references naming a built artifact with its final tag.
///
/// Only fields at the selector's image paths are considered. Images whose
/// base name matches no artifact are left as they are, and documents with
/// no replacement keep their original text.
pub fn replace_images(
    list: &mut ManifestList,
    builds: &[BuiltArtifact],
    selector: &ResourceSelector,
) -> Result<()> {
    if builds.is_empty() {
        return Ok(());
    }

    for doc in list.iter_mut() {
        let Some(gk) = doc.group_kind() else {
            continue;
        };
        let Some(rule) = selector.rule_for(&gk) else {
            continue;
        };

        let mut replaced = 0usize;
        let root = doc.value_mut();
        let mut replace = |node: &mut Value| {
            if let Some(tag) = node.as_str().and_then(|image| replacement_for(image, builds)) {
                *node = Value::String(tag);
                replaced += 1;
            }
        };

        for path in &rule.image {
            if path.matches_everything() {
                for_each_keyed_mut(root, "image", &mut replace);
            } else {
                path.for_each_match_mut(root, &mut replace);
            }
        }

        if replaced > 0 {
            debug!(kind = %gk, resource = ?doc.name(), replaced, "images replaced");
            doc.mark_modified();
        }
    }
    Ok(())
}

/// Every string stored under an `image` key, anywhere in the list.
pub fn referenced_images(list: &ManifestList) -> BTreeSet<String> {
    let mut images = BTreeSet::new();
    let mut stack: Vec<&Value> = list.iter().map(|doc| doc.value()).collect();
    while let Some(node) = stack.pop() {
        match node {
            Value::Mapping(map) => {
                for (key, value) in map {
                    if key.as_str() == Some("image") {
                        if let Some(image) = value.as_str() {
                            images.insert(image.to_string());
                        }
                    }
                    stack.push(value);
                }
            }
            Value::Sequence(items) => stack.extend(items),
            Value::Tagged(tagged) => stack.push(&tagged.value),
            _ => {}
        }
    }
    images
}

/// The new reference for `image`, or `None` when nothing needs to change.
fn replacement_for(image: &str, builds: &[BuiltArtifact]) -> Option<String> {
    let base = ImageReference::parse(image).base_name;
    builds
        .iter()
        .find(|b| b.image_name == base)
        .filter(|b| b.tag != image)
        .map(|b| b.tag.clone())
}

#[cfg(test)]
mod tests {
    use super::*;

    const PODS: &str = "apiVersion: v1\nkind: Pod\nmetadata:\n  name: a\nspec:\n  containers:\n  - name: web\n    image: web\n  - name: proxy\n    image: envoy:1.29\n---\napiVersion: v1\nkind: Pod\nmetadata:\n  name: b   # untouched\nspec:\n  containers:\n  - name: db\n    image: postgres:16\n";

    fn built(name: &str, tag: &str) -> BuiltArtifact {
        BuiltArtifact {
            image_name: name.to_string(),
            tag: tag.to_string(),
            runtime: None,
        }
    }

    #[test]
    fn replaces_only_matching_images() {
        let mut list = ManifestList::parse(PODS).unwrap();
        replace_images(&mut list, &[built("web", "web:abc123")], &ResourceSelector::defaults())
            .unwrap();

        let docs: Vec<_> = list.iter().collect();
        let containers = &docs[0].value()["spec"]["containers"];
        assert_eq!(containers[0]["image"].as_str(), Some("web:abc123"));
        assert_eq!(containers[1]["image"].as_str(), Some("envoy:1.29"));
        assert!(!docs[1].is_modified());
        assert!(list.render().unwrap().ends_with("  name: b   # untouched\nspec:\n  containers:\n  - name: db\n    image: postgres:16\n"));
    }

    #[test]
    fn already_tagged_image_is_not_rewritten() {
        let mut list = ManifestList::parse("kind: Pod\nspec:\n  containers:\n  - image: web:abc\n").unwrap();
        replace_images(&mut list, &[built("web", "web:abc")], &ResourceSelector::defaults()).unwrap();
        assert!(!list.iter().next().unwrap().is_modified());
    }

    #[test]
    fn unselected_kinds_keep_their_images() {
        let mut list = ManifestList::parse("apiVersion: example.com/v1\nkind: Widget\nspec:\n  image: web\n").unwrap();
        replace_images(&mut list, &[built("web", "web:abc")], &ResourceSelector::defaults()).unwrap();
        assert!(!list.iter().next().unwrap().is_modified());
    }

    #[test]
    fn lists_every_referenced_image() {
        let list = ManifestList::parse(PODS).unwrap();
        let images: Vec<String> = referenced_images(&list).into_iter().collect();
        assert_eq!(images, vec!["envoy:1.29", "postgres:16", "web"]);
    }
}
