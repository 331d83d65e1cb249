// src/manifest/mod.rs

//! Manifest model and the transform pipeline.
//!
//! - `document.rs`: documents, ordered lists, per-config grouping.
//! - `group_kind.rs`, `path.rs`, `image.rs`: addressing helpers.
//! - `selector.rs`: allow/deny tables for the label and image stages.
//! - `setters.rs`, `labels.rs`, `images.rs`, `debug.rs`: the stages.
//! - `pipeline.rs`: runs the stages in their fixed order.
//! - `source.rs`: loads a config's manifest files.

pub mod debug;
pub mod document;
pub mod group_kind;
pub mod image;
pub mod images;
pub mod labels;
pub mod path;
pub mod pipeline;
pub mod selector;
pub mod setters;
pub mod source;

pub use debug::Registries;
pub use document::{ManifestDocument, ManifestList, ManifestListByConfig};
pub use group_kind::GroupKind;
pub use pipeline::{DebugSettings, TransformPipeline};
pub use selector::ResourceSelector;
