//! Logical path normalization
//!
//! Every node is addressed by a root-relative `relpath` that starts with `/`.
//! Directory paths end with exactly one `/`, file paths never do. Nothing in
//! this module touches the filesystem.

use crate::error::{FsError, FsResult};
use crate::node::NodeKind;

/// Canonicalizes raw path strings with per-instance defaults.
#[derive(Debug, Clone, Default)]
pub struct PathNormalizer {
    /// Cleaned default directory segment, no leading or trailing slash.
    default_dir: String,
    default_ext: Option<String>,
}

impl PathNormalizer {
    pub fn new(default_dir: &str, default_ext: Option<&str>) -> FsResult<Self> {
        let default_dir = clean(&format!("/{}", default_dir.trim()))?
            .trim_matches('/')
            .to_string();
        let default_ext = default_ext
            .map(|ext| ext.trim().trim_start_matches('.').to_string())
            .filter(|ext| !ext.is_empty());
        Ok(Self {
            default_dir,
            default_ext,
        })
    }

    pub fn default_ext(&self) -> Option<&str> {
        self.default_ext.as_deref()
    }

    /// The directory an empty path resolves to.
    pub fn default_root(&self) -> String {
        if self.default_dir.is_empty() {
            "/".to_string()
        } else {
            format!("/{}/", self.default_dir)
        }
    }

    /// Normalize a raw path for a node of the given kind.
    ///
    /// `None` means the path was never set, which is a `PathNotDefined`
    /// error. An empty string maps to the default root.
    pub fn normalize(&self, raw: Option<&str>, kind: NodeKind) -> FsResult<String> {
        let raw = raw.ok_or(FsError::PathNotDefined(kind))?;
        let trimmed = raw.trim();

        let joined = if trimmed.is_empty() {
            self.default_root()
        } else if trimmed.starts_with('/') {
            trimmed.to_string()
        } else {
            format!("{}{}", self.default_root(), trimmed)
        };

        let cleaned = clean(&joined)?;
        match kind {
            NodeKind::Dir => Ok(as_dir_path(&cleaned)),
            NodeKind::File => {
                let path = cleaned.trim_end_matches('/');
                if path.is_empty() {
                    return Err(FsError::InvalidPath(format!(
                        "'{}' does not name a file",
                        raw
                    )));
                }
                let parent = parent_of(path);
                let (stem, ext) = split_ext(basename(path), self.default_ext());
                Ok(format!("{}{}", parent, file_name(&stem, &ext)))
            }
        }
    }
}

/// Collapse duplicate slashes, drop `.` segments and reject traversal.
///
/// The result always starts with `/`; a trailing slash on the input is kept.
pub fn clean(path: &str) -> FsResult<String> {
    if path.chars().any(|c| c.is_control()) {
        return Err(FsError::InvalidPath(format!(
            "'{}' contains control characters",
            path.escape_debug()
        )));
    }

    let mut normalized = String::with_capacity(path.len() + 1);
    for segment in path.split('/') {
        match segment {
            "" | "." => continue,
            ".." => {
                return Err(FsError::InvalidPath(format!(
                    "'{}' contains a traversal sequence '..'",
                    path
                )))
            }
            _ => {
                normalized.push('/');
                normalized.push_str(segment);
            }
        }
    }

    let trailing = path.ends_with('/') || path.ends_with("/.");
    if normalized.is_empty() || trailing {
        normalized.push('/');
    }
    Ok(normalized)
}

/// Force exactly one trailing slash.
pub fn as_dir_path(path: &str) -> String {
    let trimmed = path.trim_end_matches('/');
    format!("{}/", trimmed)
}

/// Parent directory of a relpath
/// e.g., "/documents/file.txt" -> "/documents/"
/// e.g., "/documents/" -> "/"
pub fn parent_of(path: &str) -> String {
    if path.is_empty() || path == "/" {
        return "/".to_string();
    }

    let clean_path = path.trim_end_matches('/');
    match clean_path.rfind('/') {
        Some(0) | None => "/".to_string(),
        Some(pos) => format!("{}/", &clean_path[..pos]),
    }
}

/// Last segment of a relpath, without any trailing slash.
pub fn basename(path: &str) -> &str {
    let clean_path = path.trim_end_matches('/');
    match clean_path.rfind('/') {
        Some(pos) => &clean_path[pos + 1..],
        None => clean_path,
    }
}

/// Directory prefixes strictly between the root and `path`.
///
/// `"/a/b/c/"` yields `["/a/", "/a/b/"]`; `"/a/b.txt"` yields `["/a/"]`.
pub fn ancestors(path: &str) -> Vec<String> {
    let clean_path = path.trim_matches('/');
    let segments: Vec<&str> = clean_path.split('/').filter(|s| !s.is_empty()).collect();
    if segments.len() < 2 {
        return Vec::new();
    }

    let mut prefix = String::from("/");
    segments[..segments.len() - 1]
        .iter()
        .map(|segment| {
            prefix.push_str(segment);
            prefix.push('/');
            prefix.clone()
        })
        .collect()
}

/// Split a file name into stem and extension on the last dot.
///
/// A leading dot (`.profile`) or a trailing one (`notes.`) does not start an
/// extension. When there is no extension and `default_ext` is set, the
/// default becomes the extension.
pub fn split_ext(name: &str, default_ext: Option<&str>) -> (String, String) {
    match name.rfind('.') {
        Some(pos) if pos > 0 && pos + 1 < name.len() => {
            (name[..pos].to_string(), name[pos + 1..].to_string())
        }
        _ => {
            let stem = name.trim_end_matches('.').to_string();
            match default_ext {
                Some(ext) if !stem.is_empty() => (stem, ext.to_string()),
                _ => (name.to_string(), String::new()),
            }
        }
    }
}

/// Inverse of [`split_ext`].
pub fn file_name(stem: &str, ext: &str) -> String {
    if ext.is_empty() {
        stem.to_string()
    } else {
        format!("{}.{}", stem, ext)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn normalizer() -> PathNormalizer {
        PathNormalizer::new("", None).unwrap()
    }

    #[test]
    fn test_relative_dir_paths() {
        let n = normalizer();
        assert_eq!(n.normalize(Some("dir01"), NodeKind::Dir).unwrap(), "/dir01/");
        assert_eq!(
            n.normalize(Some("parent/dir01/"), NodeKind::Dir).unwrap(),
            "/parent/dir01/"
        );
        assert_eq!(
            n.normalize(Some("  a//b///c  "), NodeKind::Dir).unwrap(),
            "/a/b/c/"
        );
    }

    #[test]
    fn test_absolute_paths_used_as_is() {
        let n = PathNormalizer::new("documents", None).unwrap();
        assert_eq!(
            n.normalize(Some("/root/parent/dir02/"), NodeKind::Dir).unwrap(),
            "/root/parent/dir02/"
        );
        assert_eq!(
            n.normalize(Some("reports"), NodeKind::Dir).unwrap(),
            "/documents/reports/"
        );
    }

    #[test]
    fn test_empty_maps_to_default_root() {
        assert_eq!(normalizer().normalize(Some("   "), NodeKind::Dir).unwrap(), "/");
        let n = PathNormalizer::new("/Mes documents/", None).unwrap();
        assert_eq!(n.normalize(Some(""), NodeKind::Dir).unwrap(), "/Mes documents/");
    }

    #[test]
    fn test_file_paths_never_end_with_slash() {
        let n = normalizer();
        assert_eq!(n.normalize(Some("a/b.txt/"), NodeKind::File).unwrap(), "/a/b.txt");
        assert!(matches!(
            n.normalize(Some("/"), NodeKind::File),
            Err(FsError::InvalidPath(_))
        ));
    }

    #[test]
    fn test_missing_path_is_not_defined() {
        assert!(matches!(
            normalizer().normalize(None, NodeKind::File),
            Err(FsError::PathNotDefined(NodeKind::File))
        ));
    }

    #[test]
    fn test_rejects_traversal() {
        let n = normalizer();
        assert!(n.normalize(Some("/foo/../bar"), NodeKind::Dir).is_err());
        assert!(n.normalize(Some("../etc/passwd"), NodeKind::File).is_err());
        assert!(n.normalize(Some("/foo\0bar"), NodeKind::File).is_err());
    }

    #[test]
    fn test_default_extension_applied_to_files() {
        let n = PathNormalizer::new("", Some(".txt")).unwrap();
        assert_eq!(n.normalize(Some("notes/readme"), NodeKind::File).unwrap(), "/notes/readme.txt");
        assert_eq!(n.normalize(Some("notes/a.md"), NodeKind::File).unwrap(), "/notes/a.md");
    }

    #[test]
    fn test_split_ext() {
        assert_eq!(split_ext("photo.png", None), ("photo".into(), "png".into()));
        assert_eq!(split_ext("archive.tar.gz", None), ("archive.tar".into(), "gz".into()));
        assert_eq!(split_ext("README", None), ("README".into(), "".into()));
        assert_eq!(split_ext("README", Some("txt")), ("README".into(), "txt".into()));
        assert_eq!(split_ext(".profile", None), (".profile".into(), "".into()));
        assert_eq!(split_ext("notes.", Some("md")), ("notes".into(), "md".into()));
    }

    #[test]
    fn test_parent_and_basename() {
        assert_eq!(parent_of("/documents/file.txt"), "/documents/");
        assert_eq!(parent_of("/documents/"), "/");
        assert_eq!(parent_of("/file.txt"), "/");
        assert_eq!(parent_of("/"), "/");
        assert_eq!(basename("/a/b/c/"), "c");
        assert_eq!(basename("/a/b.txt"), "b.txt");
    }

    #[test]
    fn test_ancestors() {
        assert_eq!(ancestors("/a/b/c/"), vec!["/a/".to_string(), "/a/b/".to_string()]);
        assert_eq!(ancestors("/a/b.txt"), vec!["/a/".to_string()]);
        assert!(ancestors("/a/").is_empty());
        assert!(ancestors("/").is_empty());
    }

    proptest! {
        #[test]
        fn prop_dir_paths_end_with_one_slash(
            segments in proptest::collection::vec("[a-zA-Z0-9_ -]{1,8}", 0..6),
            seps in proptest::collection::vec(1usize..4, 0..6),
            trailing in 0usize..3,
        ) {
            let mut raw = String::new();
            for (i, segment) in segments.iter().enumerate() {
                raw.push_str(segment);
                let n = seps.get(i).copied().unwrap_or(1);
                raw.push_str(&"/".repeat(n));
            }
            raw.push_str(&"/".repeat(trailing));

            let normalized = normalizer().normalize(Some(&raw), NodeKind::Dir).unwrap();
            prop_assert!(normalized.ends_with('/'));
            prop_assert!(!normalized.contains("//"));
        }
    }
}
