// src/build/mod.rs

//! Artifact building.
//!
//! - [`artifact`] / [`platform`]: what to build and for which platforms.
//! - [`tagger`]: the image reference each artifact is published under.
//! - [`spec`]: remote build specifications (per-backend dispatch).
//! - [`local`] / [`remote`]: [`ArtifactBuilder`] implementations.
//! - [`runner`]: builds a set of artifacts concurrently in dependency order.

use std::fmt::Debug;

use tokio_util::sync::CancellationToken;

use crate::errors::Result;
use crate::exec::BoxFuture;

pub mod artifact;
pub mod local;
pub mod platform;
pub mod remote;
pub mod runner;
pub mod spec;
pub mod tagger;

pub use artifact::{ArtifactDescriptor, ArtifactKind, BuildOutputFile, BuiltArtifact};
pub use local::LocalBuilder;
pub use platform::{Platform, PlatformMatcher};
pub use remote::RemoteBuilder;
pub use runner::{BuildGroup, BuildRunner};
pub use spec::{BuildSpec, build_spec_for};
pub use tagger::Tagger;

/// What a builder produced.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BuildOutput {
    /// Image available under this reference.
    LocalImage(String),
    /// Spec handed to the remote build service.
    Submitted(BuildSpec),
}

/// Builds one artifact.
///
/// Implementations wrap tool failures as `BackendExecution` errors naming
/// their backend, and return `Cancelled` when `cancel` fires.
pub trait ArtifactBuilder: Send + Sync + Debug {
    fn build<'a>(
        &'a self,
        artifact: &'a ArtifactDescriptor,
        tag: &'a str,
        platforms: &'a PlatformMatcher,
        cancel: &'a CancellationToken,
    ) -> BoxFuture<'a, Result<BuildOutput>>;
}
