// src/manifest/image.rs

/// A container image reference split into its parts.
///
/// `registry.local:5000/team/web:v1@sha256:abc` has base name
/// `registry.local:5000/team/web`, tag `v1` and digest `sha256:abc`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ImageReference {
    pub base_name: String,
    pub tag: Option<String>,
    pub digest: Option<String>,
}

impl ImageReference {
    pub fn parse(image: &str) -> Self {
        let (rest, digest) = match image.split_once('@') {
            Some((rest, digest)) => (rest, Some(digest.to_string())),
            None => (image, None),
        };

        // A ':' only starts a tag after the last path separator; before it,
        // it's a registry port.
        let name_start = rest.rfind('/').map_or(0, |i| i + 1);
        let (base_name, tag) = match rest[name_start..].rfind(':') {
            Some(i) => {
                let split = name_start + i;
                (&rest[..split], Some(rest[split + 1..].to_string()))
            }
            None => (rest, None),
        };

        Self {
            base_name: base_name.to_string(),
            tag,
            digest,
        }
    }
}

/// Join an image name and a tag. Digests are attached with `@`.
pub fn tagged_reference(image_name: &str, tag: &str) -> String {
    if tag.starts_with("sha256:") {
        format!("{image_name}@{tag}")
    } else {
        format!("{image_name}:{tag}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_registry_port_tag_and_digest() {
        let r = ImageReference::parse("registry.local:5000/team/web:v1@sha256:abc");
        assert_eq!(r.base_name, "registry.local:5000/team/web");
        assert_eq!(r.tag.as_deref(), Some("v1"));
        assert_eq!(r.digest.as_deref(), Some("sha256:abc"));
    }

    #[test]
    fn bare_name() {
        let r = ImageReference::parse("registry.local:5000/web");
        assert_eq!(r.base_name, "registry.local:5000/web");
        assert_eq!(r.tag, None);
        assert_eq!(r.digest, None);
    }

    #[test]
    fn joins_tags_and_digests() {
        assert_eq!(tagged_reference("web", "abc"), "web:abc");
        assert_eq!(tagged_reference("web", "sha256:ff"), "web@sha256:ff");
    }
}
