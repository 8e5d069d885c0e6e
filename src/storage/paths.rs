//! Mapping from logical registry entities to storage keys.
//!
//! Keys are plain strings with a stable prefix structure so that the tags of
//! a repository can be enumerated with a single prefix listing. Tag entries
//! are distinguished from the repository's `json` sibling by [`TAG_PREFIX`].

pub const TAG_PREFIX: &str = "tag_";

pub fn image_json(image_id: &str) -> String {
    format!("images/{image_id}/json")
}

pub fn image_layer(image_id: &str) -> String {
    format!("images/{image_id}/layer")
}

pub fn image_checksum(image_id: &str) -> String {
    format!("images/{image_id}/checksum")
}

pub fn image_ancestry(image_id: &str) -> String {
    format!("images/{image_id}/ancestry")
}

/// Sentinel key whose presence means the image upload has not completed.
pub fn image_mark(image_id: &str) -> String {
    format!("images/{image_id}/_inprogress")
}

pub fn image_files(image_id: &str) -> String {
    format!("images/{image_id}/_files")
}

pub fn image_diff(image_id: &str) -> String {
    format!("images/{image_id}/_diff")
}

/// Key of a single tag, or with an empty `tag` the listing prefix for all
/// tags of the repository.
pub fn repo_tag(namespace: &str, repository: &str, tag: &str) -> String {
    if tag.is_empty() {
        format!("repositories/{namespace}/{repository}")
    } else {
        format!("repositories/{namespace}/{repository}/{TAG_PREFIX}{tag}")
    }
}

pub fn repo_json(namespace: &str, repository: &str) -> String {
    format!("repositories/{namespace}/{repository}/json")
}

/// Basename of a key, for filtering listing results.
pub fn base_name(key: &str) -> &str {
    key.rsplit('/').next().unwrap_or(key)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_image_keys() {
        assert_eq!(image_json("abc"), "images/abc/json");
        assert_eq!(image_layer("abc"), "images/abc/layer");
        assert_eq!(image_checksum("abc"), "images/abc/checksum");
        assert_eq!(image_ancestry("abc"), "images/abc/ancestry");
        assert_eq!(image_mark("abc"), "images/abc/_inprogress");
        assert_eq!(image_files("abc"), "images/abc/_files");
        assert_eq!(image_diff("abc"), "images/abc/_diff");
    }

    #[test]
    fn test_tag_keys() {
        assert_eq!(repo_tag("foo", "bar", "latest"), "repositories/foo/bar/tag_latest");
        assert_eq!(repo_tag("foo", "bar", ""), "repositories/foo/bar");
        assert_eq!(repo_json("foo", "bar"), "repositories/foo/bar/json");
    }

    #[test]
    fn test_repo_json_is_not_a_tag() {
        // The repository metadata key lives next to the tags and must be
        // filtered out of listings by the tag prefix.
        let json_key = repo_json("foo", "bar");
        let json_base = base_name(&json_key);
        assert!(!json_base.starts_with(TAG_PREFIX));
        let tag_key = repo_tag("foo", "bar", "v1");
        let tag_base = base_name(&tag_key);
        assert!(tag_base.starts_with(TAG_PREFIX));
    }

    #[test]
    fn test_base_name() {
        assert_eq!(base_name("repositories/a/b/tag_latest"), "tag_latest");
        assert_eq!(base_name("flat"), "flat");
    }
}
