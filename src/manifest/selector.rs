// src/manifest/selector.rs

//! Allow/deny tables deciding which resources the label and image stages
//! touch, and at which field paths.
//!
//! Built-in tables are plain values produced fresh by [`ResourceSelector::defaults`].
//! Configured rules are merged on top once per invocation; a configured
//! entry replaces the built-in entry with the same GroupKind.

use std::collections::BTreeMap;

use crate::config::model::{ResourceFilter, ResourceSelectorSection};
use crate::errors::Result;
use crate::manifest::group_kind::GroupKind;
use crate::manifest::path::FieldPath;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SelectorRule {
    pub group_kind: GroupKind,
    pub image: Vec<FieldPath>,
    pub labels: Vec<FieldPath>,
}

impl SelectorRule {
    fn from_filter(filter: &ResourceFilter) -> Result<Self> {
        Ok(Self {
            group_kind: GroupKind::parse(&filter.group_kind)?,
            image: parse_paths(&filter.image)?,
            labels: parse_paths(&filter.labels)?,
        })
    }
}

fn parse_paths(paths: &[String]) -> Result<Vec<FieldPath>> {
    paths.iter().map(|p| FieldPath::parse(p)).collect()
}

pub type SelectorTable = BTreeMap<GroupKind, SelectorRule>;

#[derive(Debug, Clone, Default)]
pub struct ResourceSelector {
    allow: SelectorTable,
    deny: SelectorTable,
}

const POD_IMAGES: &[&str] = &[".spec.containers[*].image", ".spec.initContainers[*].image"];
const TEMPLATE_IMAGES: &[&str] = &[
    ".spec.template.spec.containers[*].image",
    ".spec.template.spec.initContainers[*].image",
];
const TEMPLATE_LABELS: &[&str] = &[".spec.template.metadata.labels"];
const CRONJOB_IMAGES: &[&str] = &[
    ".spec.jobTemplate.spec.template.spec.containers[*].image",
    ".spec.jobTemplate.spec.template.spec.initContainers[*].image",
];
const CRONJOB_LABELS: &[&str] = &[".spec.jobTemplate.spec.template.metadata.labels"];

fn rule(group: &str, kind: &str, image: &[&str], labels: &[&str]) -> SelectorRule {
    let paths = |raw: &[&str]| {
        raw.iter()
            .filter_map(|p| FieldPath::parse(p).ok())
            .collect::<Vec<_>>()
    };
    SelectorRule {
        group_kind: GroupKind::new(group, kind),
        image: paths(image),
        labels: paths(labels),
    }
}

fn default_allow() -> SelectorTable {
    [
        rule("", "Pod", POD_IMAGES, &[]),
        rule("apps", "Deployment", TEMPLATE_IMAGES, TEMPLATE_LABELS),
        rule("apps", "ReplicaSet", TEMPLATE_IMAGES, TEMPLATE_LABELS),
        rule("apps", "StatefulSet", TEMPLATE_IMAGES, TEMPLATE_LABELS),
        rule("apps", "DaemonSet", TEMPLATE_IMAGES, TEMPLATE_LABELS),
        rule("batch", "Job", TEMPLATE_IMAGES, TEMPLATE_LABELS),
        rule("batch", "CronJob", CRONJOB_IMAGES, CRONJOB_LABELS),
        rule("", "Service", &[], &[]),
        rule("", "ConfigMap", &[], &[]),
        rule("", "Secret", &[], &[]),
        rule("", "ServiceAccount", &[], &[]),
        rule("networking.k8s.io", "Ingress", &[], &[]),
    ]
    .into_iter()
    .map(|r| (r.group_kind.clone(), r))
    .collect()
}

fn default_deny() -> SelectorTable {
    [rule(
        "apiextensions.k8s.io",
        "CustomResourceDefinition",
        &[".*"],
        &[".*"],
    )]
    .into_iter()
    .map(|r| (r.group_kind.clone(), r))
    .collect()
}

impl ResourceSelector {
    /// Built-in tables only.
    pub fn defaults() -> Self {
        Self {
            allow: default_allow(),
            deny: default_deny(),
        }
    }

    /// Built-in tables overridden by every given config section, in order.
    pub fn from_sections<'a, I>(sections: I) -> Result<Self>
    where
        I: IntoIterator<Item = &'a ResourceSelectorSection>,
    {
        let mut selector = Self::defaults();
        for section in sections {
            selector.merge(section)?;
        }
        Ok(selector)
    }

    fn merge(&mut self, section: &ResourceSelectorSection) -> Result<()> {
        for filter in &section.allow {
            let rule = SelectorRule::from_filter(filter)?;
            self.allow.insert(rule.group_kind.clone(), rule);
        }
        for filter in &section.deny {
            let rule = SelectorRule::from_filter(filter)?;
            self.deny.insert(rule.group_kind.clone(), rule);
        }
        Ok(())
    }

    /// Allowed and not denied.
    pub fn selects(&self, gk: &GroupKind) -> bool {
        self.allow.contains_key(gk) && !self.deny.contains_key(gk)
    }

    /// Rule for a selected GroupKind, `None` when the stages must skip it.
    pub fn rule_for(&self, gk: &GroupKind) -> Option<&SelectorRule> {
        if self.deny.contains_key(gk) {
            return None;
        }
        self.allow.get(gk)
    }

    pub fn allow(&self) -> &SelectorTable {
        &self.allow
    }

    pub fn deny(&self) -> &SelectorTable {
        &self.deny
    }
}
