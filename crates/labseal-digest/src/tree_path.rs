//! Relative paths inside an experiment bay.
//!
//! Manifests key file digests by path. [`TreePath`] is the validated,
//! platform-independent form of such a key: a relative path rendered
//! with forward slashes, with no `.`/`..` segments, so the same tree
//! produces the same manifest on any operating system.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// A validated relative path within a hashed directory tree.
///
/// Ordering is segment-wise lexicographic, which keeps manifest maps
/// keyed by `TreePath` in a stable, reproducible order.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath(Vec<String>);

impl TreePath {
    /// Builds a path from pre-split segments, validating each one.
    ///
    /// # Errors
    ///
    /// Returns a [`TreePathError`] if the segment list is empty or any
    /// segment is empty, `.`/`..`, or contains a separator or NUL.
    pub fn new(segments: Vec<String>) -> Result<Self, TreePathError> {
        if segments.is_empty() {
            return Err(TreePathError::Empty);
        }
        for segment in &segments {
            validate_segment(segment)?;
        }
        Ok(Self(segments))
    }

    /// Converts a path produced by walking a directory, relative to the
    /// walk root. Every component must be a normal name.
    ///
    /// # Errors
    ///
    /// Returns a [`TreePathError`] for absolute paths, `.`/`..`
    /// components, or non-UTF-8 names.
    pub fn from_relative(path: &Path) -> Result<Self, TreePathError> {
        let mut segments = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(name) => {
                    let segment = name
                        .to_str()
                        .ok_or_else(|| TreePathError::NotUtf8(path.display().to_string()))?;
                    validate_segment(segment)?;
                    segments.push(segment.to_owned());
                }
                Component::CurDir | Component::ParentDir => {
                    return Err(TreePathError::DotSegment(path.display().to_string()));
                }
                Component::RootDir | Component::Prefix(_) => {
                    return Err(TreePathError::Absolute(path.display().to_string()));
                }
            }
        }
        if segments.is_empty() {
            return Err(TreePathError::Empty);
        }
        Ok(Self(segments))
    }

    /// Borrows the path segments.
    #[inline]
    #[must_use]
    pub fn segments(&self) -> &[String] {
        &self.0
    }

    /// Final segment, the file name.
    #[must_use]
    pub fn file_name(&self) -> &str {
        // Invariant: the segment list is never empty.
        self.0.last().map(String::as_str).unwrap_or_default()
    }

    /// Resolves the path beneath a concrete base directory.
    #[must_use]
    pub fn resolve(&self, base: &Path) -> PathBuf {
        let mut out = base.to_path_buf();
        for segment in &self.0 {
            out.push(segment);
        }
        out
    }
}

fn validate_segment(segment: &str) -> Result<(), TreePathError> {
    if segment.is_empty() {
        return Err(TreePathError::EmptySegment);
    }
    if segment == "." || segment == ".." {
        return Err(TreePathError::DotSegment(segment.to_owned()));
    }
    if segment.contains(['/', '\\', '\0']) {
        return Err(TreePathError::InvalidSegment(segment.to_owned()));
    }
    Ok(())
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("/"))
    }
}

impl FromStr for TreePath {
    type Err = TreePathError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.starts_with('/') {
            return Err(TreePathError::Absolute(s.to_owned()));
        }
        let segments: Vec<String> = s.split('/').map(str::to_owned).collect();
        Self::new(segments)
    }
}

impl Serialize for TreePath {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for TreePath {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(serde::de::Error::custom)
    }
}

/// Errors from validating tree paths.
#[derive(Debug, Error)]
pub enum TreePathError {
    /// The path had no segments at all.
    #[error("tree path is empty")]
    Empty,

    /// A segment between separators was empty, as in `a//b`.
    #[error("tree path contains an empty segment")]
    EmptySegment,

    /// The path was absolute or carried a filesystem prefix.
    #[error("tree path must be relative: {0}")]
    Absolute(String),

    /// The path contained a `.` or `..` segment.
    #[error("tree path contains a dot segment: {0}")]
    DotSegment(String),

    /// A segment contained a separator or NUL byte.
    #[error("invalid tree path segment: {0:?}")]
    InvalidSegment(String),

    /// A file name was not valid UTF-8.
    #[error("tree path is not valid UTF-8: {0}")]
    NotUtf8(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_nested_path() {
        let path: TreePath = "runs/trial-3/data.csv".parse().unwrap();
        assert_eq!(path.segments(), ["runs", "trial-3", "data.csv"]);
        assert_eq!(path.to_string(), "runs/trial-3/data.csv");
        assert_eq!(path.file_name(), "data.csv");
    }

    #[test]
    fn rejects_absolute_and_dot_segments() {
        assert!(matches!(
            "/etc/passwd".parse::<TreePath>(),
            Err(TreePathError::Absolute(_))
        ));
        assert!(matches!(
            "a/../b".parse::<TreePath>(),
            Err(TreePathError::DotSegment(_))
        ));
        assert!(matches!(
            "./a".parse::<TreePath>(),
            Err(TreePathError::DotSegment(_))
        ));
    }

    #[test]
    fn rejects_empty_forms() {
        assert!(matches!("".parse::<TreePath>(), Err(TreePathError::EmptySegment)));
        assert!(matches!(
            "a//b".parse::<TreePath>(),
            Err(TreePathError::EmptySegment)
        ));
        assert!(TreePath::new(Vec::new()).is_err());
    }

    #[test]
    fn from_relative_accepts_walked_paths() {
        let path = TreePath::from_relative(Path::new("sub/dir/file.bin")).unwrap();
        assert_eq!(path.to_string(), "sub/dir/file.bin");
    }

    #[test]
    fn from_relative_rejects_parent_escape() {
        assert!(TreePath::from_relative(Path::new("../outside")).is_err());
    }

    #[test]
    fn resolve_joins_beneath_base() {
        let path: TreePath = "a/b.txt".parse().unwrap();
        let resolved = path.resolve(Path::new("/bay/input"));
        assert_eq!(resolved, PathBuf::from("/bay/input/a/b.txt"));
    }

    #[test]
    fn ordering_is_stable_by_segments() {
        let mut paths: Vec<TreePath> = ["b/a", "a/z", "a/b", "a"]
            .iter()
            .map(|s| s.parse().unwrap())
            .collect();
        paths.sort();
        let rendered: Vec<String> = paths.iter().map(ToString::to_string).collect();
        assert_eq!(rendered, ["a", "a/b", "a/z", "b/a"]);
    }

    #[test]
    fn serde_uses_display_form() {
        let path: TreePath = "a/b".parse().unwrap();
        let json = serde_json::to_string(&path).unwrap();
        assert_eq!(json, "\"a/b\"");
        let back: TreePath = serde_json::from_str(&json).unwrap();
        assert_eq!(back, path);
    }
}
