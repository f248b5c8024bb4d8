use std::path::{Component, Path, PathBuf};

use thiserror::Error;

#[derive(Debug, Error)]
pub enum PathError {
    #[error("staging key is empty")]
    Empty,
    #[error("staging key contains unsupported component")]
    UnsupportedComponent,
}

/// Splits a remote path into its folder names.
///
/// Repeated separators collapse and leading/trailing separators are ignored,
/// so `/a//b/`, `a/b` and `/a/b` all yield `["a", "b"]`.
pub fn segments(path: &str) -> Vec<&str> {
    path.split('/').filter(|part| !part.is_empty()).collect()
}

/// Canonical directory form: leading and trailing `/`, no empty segments.
/// The drive root is `/`.
pub fn canonical_dir(path: &str) -> String {
    let parts = segments(path);
    if parts.is_empty() {
        return "/".to_string();
    }
    format!("/{}/", parts.join("/"))
}

pub fn join_dir(base: &str, child: &str) -> String {
    canonical_dir(&format!("{base}/{child}"))
}

/// Directory containing `dir`, or `None` for the root.
pub fn parent_dir(dir: &str) -> Option<String> {
    let parts = segments(dir);
    let (_, parents) = parts.split_last()?;
    Some(canonical_dir(&parents.join("/")))
}

/// Canonical directory prefixes of `dir`, shortest first, root excluded:
/// `/a/b/` yields `/a/`, `/a/b/`.
pub fn prefixes(dir: &str) -> Vec<String> {
    let parts = segments(dir);
    (1..=parts.len())
        .map(|len| canonical_dir(&parts[..len].join("/")))
        .collect()
}

/// Whether `ancestor` is `dir` itself or one of its parents.
pub fn is_same_or_ancestor(ancestor: &str, dir: &str) -> bool {
    let ancestor = canonical_dir(ancestor);
    canonical_dir(dir).starts_with(&ancestor)
}

pub fn staging_path_for(staging_root: &Path, key: &str) -> Result<PathBuf, PathError> {
    if key.is_empty() {
        return Err(PathError::Empty);
    }

    // Keys come from the tracker; refuse anything that would escape the root.
    let mut components = Path::new(key).components();
    match (components.next(), components.next()) {
        (Some(Component::Normal(part)), None) => Ok(staging_root.join(part)),
        _ => Err(PathError::UnsupportedComponent),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn segments_collapse_separators() {
        assert_eq!(segments("/some//folder/"), vec!["some", "folder"]);
        assert_eq!(segments("some/folder"), vec!["some", "folder"]);
        assert!(segments("/").is_empty());
        assert!(segments("").is_empty());
    }

    #[test]
    fn canonical_dir_wraps_segments() {
        assert_eq!(canonical_dir("Jira//X/X-1"), "/Jira/X/X-1/");
        assert_eq!(canonical_dir("//"), "/");
        assert_eq!(join_dir("/", "X"), "/X/");
        assert_eq!(join_dir("/Jira/", "X-1"), "/Jira/X-1/");
    }

    #[test]
    fn parent_and_prefixes() {
        assert_eq!(parent_dir("/X/X-1/").as_deref(), Some("/X/"));
        assert_eq!(parent_dir("/X/").as_deref(), Some("/"));
        assert_eq!(parent_dir("/"), None);
        assert_eq!(prefixes("/a/b/"), vec!["/a/".to_string(), "/a/b/".to_string()]);
    }

    #[test]
    fn ancestor_check_respects_segment_boundaries() {
        assert!(is_same_or_ancestor("/X/", "/X/X-1/"));
        assert!(is_same_or_ancestor("/X/X-1", "/X/X-1/"));
        assert!(!is_same_or_ancestor("/X/X-1/", "/X/"));
        assert!(!is_same_or_ancestor("/X", "/XY/X-1/"));
    }

    #[test]
    fn maps_key_under_staging_root() {
        let root = PathBuf::from("/staging");
        assert_eq!(
            staging_path_for(&root, "10042").unwrap(),
            PathBuf::from("/staging/10042")
        );
    }

    #[test]
    fn rejects_escaping_keys() {
        let root = PathBuf::from("/staging");
        assert!(matches!(
            staging_path_for(&root, "../secret"),
            Err(PathError::UnsupportedComponent)
        ));
        assert!(matches!(
            staging_path_for(&root, "a/b"),
            Err(PathError::UnsupportedComponent)
        ));
        assert!(matches!(staging_path_for(&root, ""), Err(PathError::Empty)));
    }
}
