//! Deterministic hashing of directory trees.
//!
//! [`TreeHasher`] walks a directory, hashes every regular file, and
//! returns the per-file digests keyed by [`TreePath`]. The result is a
//! pure function of file contents: traversal order, platform, and
//! timestamps do not affect it. Hashing a tree twice without touching
//! the files yields identical digests, which is what lets a verifier
//! re-run the walk years later and compare byte-for-byte.

use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use rayon::prelude::*;
use rs_merkle::{algorithms::Sha256 as MerkleSha256, MerkleTree};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::digest::Digest;
use crate::tree_path::{TreePath, TreePathError};

/// How symbolic links inside a hashed tree are treated.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SymlinkPolicy {
    /// Symlinks are skipped entirely. The default: link targets live
    /// outside the tree and would make the record non-portable.
    #[default]
    Exclude,

    /// Symlinks to regular files are followed and hashed like the file
    /// they point at. Symlinks to directories are still skipped so the
    /// walk cannot cycle.
    FollowFiles,
}

/// Walks and hashes directory trees.
#[derive(Debug, Clone, Default)]
pub struct TreeHasher {
    symlink_policy: SymlinkPolicy,
}

impl TreeHasher {
    /// Hasher with the default [`SymlinkPolicy::Exclude`].
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the symlink policy.
    #[must_use]
    pub fn with_symlink_policy(mut self, policy: SymlinkPolicy) -> Self {
        self.symlink_policy = policy;
        self
    }

    /// Hashes every regular file under `root`, recursively.
    ///
    /// Entries whose name starts with `.` are skipped, as are sockets,
    /// pipes, and (subject to the symlink policy) symlinks. A `root`
    /// that does not exist yields an empty mapping: an experiment with
    /// no inputs is legitimate. File reads stream in 64 KiB chunks and
    /// run in parallel across files.
    ///
    /// This is a blocking call; async callers should wrap it in
    /// `spawn_blocking`.
    ///
    /// # Errors
    ///
    /// Returns [`TreeHashError::Io`] naming the offending path when a
    /// directory or file cannot be read, or [`TreeHashError::Path`]
    /// when an entry name cannot form a valid [`TreePath`].
    pub fn hash_tree(&self, root: &Path) -> Result<TreeDigests, TreeHashError> {
        let mut pending = Vec::new();
        match self.collect(root, &mut Vec::new(), &mut pending) {
            Ok(()) => {}
            Err(TreeHashError::Io { ref path, ref source })
                if source.kind() == io::ErrorKind::NotFound && path == root =>
            {
                return Ok(TreeDigests::default());
            }
            Err(e) => return Err(e),
        }

        let files = pending
            .into_par_iter()
            .map(|(tree_path, abs_path)| {
                let file = fs::File::open(&abs_path).map_err(|e| TreeHashError::io(&abs_path, e))?;
                let digest =
                    Digest::compute_reader(file).map_err(|e| TreeHashError::io(&abs_path, e))?;
                Ok((tree_path, digest))
            })
            .collect::<Result<BTreeMap<_, _>, TreeHashError>>()?;

        Ok(TreeDigests { files })
    }

    /// Gathers `(tree path, absolute path)` pairs for every hashable file.
    fn collect(
        &self,
        dir: &Path,
        segments: &mut Vec<String>,
        out: &mut Vec<(TreePath, PathBuf)>,
    ) -> Result<(), TreeHashError> {
        let entries = fs::read_dir(dir).map_err(|e| TreeHashError::io(dir, e))?;
        for entry in entries {
            let entry = entry.map_err(|e| TreeHashError::io(dir, e))?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                return Err(TreePathError::NotUtf8(entry.path().display().to_string()).into());
            };
            if name.starts_with('.') {
                continue;
            }
            let path = entry.path();
            let file_type = entry.file_type().map_err(|e| TreeHashError::io(&path, e))?;

            let is_file = if file_type.is_symlink() {
                match self.symlink_policy {
                    SymlinkPolicy::Exclude => continue,
                    SymlinkPolicy::FollowFiles => {
                        let target = fs::metadata(&path).map_err(|e| TreeHashError::io(&path, e))?;
                        if !target.is_file() {
                            continue;
                        }
                        true
                    }
                }
            } else if file_type.is_dir() {
                segments.push(name.to_owned());
                self.collect(&path, segments, out)?;
                segments.pop();
                continue;
            } else {
                file_type.is_file()
            };

            if is_file {
                segments.push(name.to_owned());
                let tree_path = TreePath::new(segments.clone())?;
                segments.pop();
                out.push((tree_path, path));
            }
        }
        Ok(())
    }
}

/// The per-file digests of one directory tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDigests {
    files: BTreeMap<TreePath, Digest>,
}

impl TreeDigests {
    /// Builds from an already-computed mapping.
    #[must_use]
    pub fn from_map(files: BTreeMap<TreePath, Digest>) -> Self {
        Self { files }
    }

    /// Borrows the path-to-digest mapping.
    #[inline]
    #[must_use]
    pub fn files(&self) -> &BTreeMap<TreePath, Digest> {
        &self.files
    }

    /// Consumes into the underlying mapping.
    #[inline]
    #[must_use]
    pub fn into_map(self) -> BTreeMap<TreePath, Digest> {
        self.files
    }

    /// Number of hashed files.
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.files.len()
    }

    /// Whether the tree held no hashable files.
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    /// Single digest summarizing the whole tree: the Merkle root over
    /// `SHA-256(path ‖ 0x00 ‖ digest)` leaves in path order. An empty
    /// tree aggregates to the all-zero digest.
    #[must_use]
    pub fn aggregate(&self) -> Digest {
        if self.files.is_empty() {
            return Digest::new([0u8; 32]);
        }
        let leaves: Vec<[u8; 32]> = self
            .files
            .iter()
            .map(|(path, digest)| {
                let mut leaf = path.to_string().into_bytes();
                leaf.push(0);
                leaf.extend_from_slice(digest.as_bytes());
                Digest::compute(&leaf).into_bytes()
            })
            .collect();
        let tree = MerkleTree::<MerkleSha256>::from_leaves(&leaves);
        Digest::new(tree.root().unwrap_or([0u8; 32]))
    }

    /// Compares a recorded tree (`self`) against an observed one.
    #[must_use]
    pub fn diff(&self, observed: &TreeDigests) -> TreeDiff {
        let mut diff = TreeDiff::default();
        for (path, digest) in &self.files {
            match observed.files.get(path) {
                Some(found) if found == digest => {}
                Some(_) => diff.changed.push(path.clone()),
                None => diff.missing.push(path.clone()),
            }
        }
        for path in observed.files.keys() {
            if !self.files.contains_key(path) {
                diff.unexpected.push(path.clone());
            }
        }
        diff
    }
}

/// Paths on which a recorded tree and an observed tree disagree.
///
/// All three lists come out in path order because both sides iterate
/// ordered maps.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeDiff {
    /// Present on both sides with different digests.
    pub changed: Vec<TreePath>,
    /// Recorded but no longer present.
    pub missing: Vec<TreePath>,
    /// Present but never recorded.
    pub unexpected: Vec<TreePath>,
}

impl TreeDiff {
    /// True when the trees agree exactly.
    #[must_use]
    pub fn is_clean(&self) -> bool {
        self.changed.is_empty() && self.missing.is_empty() && self.unexpected.is_empty()
    }

    /// Every affected path, in path order.
    #[must_use]
    pub fn into_paths(self) -> Vec<TreePath> {
        let mut paths = self.changed;
        paths.extend(self.missing);
        paths.extend(self.unexpected);
        paths.sort();
        paths.dedup();
        paths
    }
}

/// Errors from hashing a directory tree.
#[derive(Debug, Error)]
pub enum TreeHashError {
    /// A directory or file could not be read.
    #[error("failed to read {path}: {source}")]
    Io {
        /// The path that could not be read.
        path: PathBuf,
        /// The underlying I/O error.
        #[source]
        source: io::Error,
    },

    /// An entry name could not form a valid tree path.
    #[error("invalid path in tree: {0}")]
    Path(#[from] TreePathError),
}

impl TreeHashError {
    fn io(path: &Path, source: io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}
