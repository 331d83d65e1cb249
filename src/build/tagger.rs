// src/build/tagger.rs

//! Image tag computation.

use std::io::Read;
use std::path::Path;

use anyhow::Context;
use blake3::Hasher;
use tracing::debug;

use crate::build::artifact::ArtifactDescriptor;
use crate::errors::Result;
use crate::fs::{FileSystem, relative_slash_path, walk_files};
use crate::manifest::image::tagged_reference;
use crate::types::TagPolicy;

/// Length of the hex digest used as an input-digest tag.
const DIGEST_TAG_LEN: usize = 12;

/// Computes the full image reference an artifact will be published under.
#[derive(Debug, Clone)]
pub struct Tagger {
    policy: TagPolicy,
    /// `--tag` override; wins over the policy.
    fixed: Option<String>,
}

impl Tagger {
    pub fn new(policy: TagPolicy, fixed: Option<String>) -> Self {
        Self { policy, fixed }
    }

    /// Full reference, e.g. `web:3f2a9c01d2e4`.
    pub fn tag(&self, fs: &dyn FileSystem, artifact: &ArtifactDescriptor) -> Result<String> {
        let tag = match (&self.fixed, self.policy) {
            (Some(fixed), _) => fixed.clone(),
            (None, TagPolicy::Latest) => "latest".to_string(),
            (None, TagPolicy::InputDigest) => input_digest(fs, artifact)?,
        };
        let reference = tagged_reference(&artifact.image_name, &tag);
        debug!(artifact = %artifact.image_name, tag = %reference, "computed tag");
        Ok(reference)
    }
}

/// Hash over the backend settings plus every file in the workspace.
///
/// Files are visited in sorted order and keyed by their relative path, so
/// renames change the digest and the workspace location does not.
fn input_digest(fs: &dyn FileSystem, artifact: &ArtifactDescriptor) -> Result<String> {
    let mut hasher = Hasher::new();
    hasher.update(format!("{:?}", artifact.kind).as_bytes());

    let root: &Path = &artifact.workspace;
    for path in walk_files(fs, root)? {
        let rel = relative_slash_path(root, &path).unwrap_or_default();
        hasher.update(rel.as_bytes());
        hasher.update(&[0]);

        // A link contributes its target, not what it points at.
        if fs.is_symlink(&path) {
            hasher.update(b"symlink:");
            hasher.update(fs.read_link(&path)?.to_string_lossy().as_bytes());
            continue;
        }

        let mut reader = fs.open_read(&path)?;
        let mut buf = [0u8; 8192];
        loop {
            let n = reader
                .read(&mut buf)
                .with_context(|| format!("hashing {:?}", path))?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }
        hasher.update(&[0]);
    }

    let hex = hasher.finalize().to_hex();
    Ok(hex[..DIGEST_TAG_LEN].to_string())
}

#[cfg(test)]
mod tests {
    use std::path::PathBuf;

    use super::*;
    use crate::build::artifact::{ArtifactKind, DockerArtifact};
    use crate::fs::mock::MockFileSystem;

    fn artifact(workspace: &str) -> ArtifactDescriptor {
        ArtifactDescriptor {
            image_name: "web".to_string(),
            workspace: PathBuf::from(workspace),
            kind: ArtifactKind::Docker(DockerArtifact::default()),
            dependencies: vec![],
        }
    }

    #[test]
    fn digest_follows_content_not_location() {
        let fs = MockFileSystem::new();
        fs.add_file("a/web/Dockerfile", "FROM scratch");
        fs.add_file("b/web/Dockerfile", "FROM scratch");
        let tagger = Tagger::new(TagPolicy::InputDigest, None);

        let first = tagger.tag(&fs, &artifact("a/web")).unwrap();
        let second = tagger.tag(&fs, &artifact("b/web")).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.len(), "web:".len() + DIGEST_TAG_LEN);

        fs.add_file("b/web/Dockerfile", "FROM alpine");
        assert_ne!(tagger.tag(&fs, &artifact("b/web")).unwrap(), first);
    }

    #[test]
    fn links_hash_their_target() {
        let fs = MockFileSystem::new();
        fs.add_file("web/Dockerfile", "FROM scratch");
        fs.add_symlink("web/loop", ".");
        let tagger = Tagger::new(TagPolicy::InputDigest, None);

        let first = tagger.tag(&fs, &artifact("web")).unwrap();
        assert_eq!(tagger.tag(&fs, &artifact("web")).unwrap(), first);

        fs.add_symlink("web/loop", "..");
        assert_ne!(tagger.tag(&fs, &artifact("web")).unwrap(), first);
    }

    #[test]
    fn fixed_tag_wins() {
        let fs = MockFileSystem::new();
        let tagger = Tagger::new(TagPolicy::InputDigest, Some("v1.2".to_string()));
        assert_eq!(tagger.tag(&fs, &artifact("web")).unwrap(), "web:v1.2");
    }

    #[test]
    fn latest_policy() {
        let fs = MockFileSystem::new();
        let tagger = Tagger::new(TagPolicy::Latest, None);
        assert_eq!(tagger.tag(&fs, &artifact("web")).unwrap(), "web:latest");
    }
}
