// src/manifest/pipeline.rs

use std::collections::BTreeMap;
use std::sync::Arc;

use tracing::debug;

use crate::build::artifact::BuiltArtifact;
use crate::errors::{Result, RolloutError};
use crate::manifest::debug::{Registries, apply_debug_transforms};
use crate::manifest::document::ManifestList;
use crate::manifest::images::replace_images;
use crate::manifest::labels::{provenance_labels, set_labels};
use crate::manifest::selector::ResourceSelector;
use crate::manifest::setters::apply_setters;

/// Debug stage settings. Present only when debugging is enabled.
#[derive(Debug, Clone)]
pub struct DebugSettings {
    pub registries: Arc<Registries>,
    /// Protocol priority list; empty means each runtime's default.
    pub protocols: Vec<String>,
}

/// The fixed sequence of manifest transforms:
///
/// 1. setter overrides
/// 2. provenance and user labels
/// 3. image substitution for built artifacts
/// 4. debug instrumentation (when enabled)
///
/// The pipeline owns the list for the duration of [`TransformPipeline::apply`];
/// stages run one after another on the same thread.
#[derive(Debug, Clone)]
pub struct TransformPipeline {
    setters: BTreeMap<String, String>,
    labels: BTreeMap<String, String>,
    selector: ResourceSelector,
    debug: Option<DebugSettings>,
}

impl TransformPipeline {
    pub fn new(
        setters: BTreeMap<String, String>,
        custom_labels: &BTreeMap<String, String>,
        selector: ResourceSelector,
    ) -> Self {
        Self {
            setters,
            labels: provenance_labels(custom_labels),
            selector,
            debug: None,
        }
    }

    pub fn with_debugging(mut self, settings: DebugSettings) -> Self {
        self.debug = Some(settings);
        self
    }

    pub fn debugging_enabled(&self) -> bool {
        self.debug.is_some()
    }

    pub fn apply(&self, mut manifests: ManifestList, builds: &[BuiltArtifact]) -> Result<ManifestList> {
        if manifests.is_empty() {
            return Ok(manifests);
        }

        apply_setters(&mut manifests, &self.setters)?;
        debug!(documents = manifests.len(), "setters stage done");

        set_labels(&mut manifests, &self.labels, &self.selector).map_err(|e| stage("labels", e))?;
        debug!("labels stage done");

        replace_images(&mut manifests, builds, &self.selector).map_err(|e| stage("images", e))?;
        debug!(builds = builds.len(), "images stage done");

        if let Some(settings) = &self.debug {
            apply_debug_transforms(&mut manifests, builds, &settings.registries, &settings.protocols)?;
            debug!("debug stage done");
        }

        Ok(manifests)
    }
}

/// Name the failing stage unless the error already does.
fn stage(name: &'static str, err: RolloutError) -> RolloutError {
    match err {
        RolloutError::Transform { .. } => err,
        other => RolloutError::Transform {
            stage: name,
            message: other.to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::build::artifact::RuntimeHint;

    const APP: &str = "apiVersion: apps/v1\nkind: Deployment\nmetadata:\n  name: web\nspec:\n  replicas: 1 # from-param: ${replicas}\n  template:\n    spec:\n      containers:\n      - name: web\n        image: web\n        command: [\"python\", \"app.py\"]\n---\napiVersion: v1\nkind: ConfigMap   # plain\nmetadata:\n  name: cfg\n  labels:\n    app.kubernetes.io/managed-by: rollout\n";

    fn pipeline() -> TransformPipeline {
        TransformPipeline::new(
            BTreeMap::from([("replicas".to_string(), "2".to_string())]),
            &BTreeMap::new(),
            ResourceSelector::defaults(),
        )
    }

    fn builds() -> Vec<BuiltArtifact> {
        vec![BuiltArtifact {
            image_name: "web".into(),
            tag: "web:0f3c".into(),
            runtime: None,
        }]
    }

    #[test]
    fn runs_stages_in_order_and_keeps_document_order() {
        let out = pipeline().apply(ManifestList::parse(APP).unwrap(), &builds()).unwrap();
        let docs: Vec<_> = out.iter().collect();
        assert_eq!(docs.len(), 2);
        assert_eq!(docs[0].name(), Some("web"));
        assert_eq!(docs[1].name(), Some("cfg"));

        let v = docs[0].value();
        assert_eq!(v["spec"]["replicas"].as_u64(), Some(2));
        assert_eq!(v["spec"]["template"]["spec"]["containers"][0]["image"].as_str(), Some("web:0f3c"));
        // Already labelled and no image: byte-identical.
        assert!(!docs[1].is_modified());
        assert!(out.render().unwrap().ends_with("kind: ConfigMap   # plain\nmetadata:\n  name: cfg\n  labels:\n    app.kubernetes.io/managed-by: rollout\n"));
    }

    #[test]
    fn same_input_same_output() {
        let a = pipeline().apply(ManifestList::parse(APP).unwrap(), &builds()).unwrap();
        let b = pipeline().apply(ManifestList::parse(APP).unwrap(), &builds()).unwrap();
        assert_eq!(a.render().unwrap(), b.render().unwrap());
    }

    #[test]
    fn empty_input_is_a_no_op() {
        let out = pipeline().apply(ManifestList::new(), &builds()).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn debug_failure_names_the_stage() {
        let settings = DebugSettings {
            registries: Arc::new(Registries::default()),
            protocols: vec![],
        };
        let mut b = builds();
        b[0].runtime = Some(RuntimeHint::Python);
        let err = pipeline()
            .with_debugging(settings)
            .apply(ManifestList::parse(APP).unwrap(), &b)
            .unwrap_err();
        match err {
            RolloutError::Transform { stage, .. } => assert_eq!(stage, "debug"),
            other => panic!("expected a transform error, got {other:?}"),
        }
    }
}
