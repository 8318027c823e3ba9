//! Content digests for experiment provenance.
//!
//! This crate answers one question deterministically: what exactly is
//! in this directory? [`TreeHasher`] walks a tree and produces a
//! [`Digest`] per regular file, keyed by a validated relative
//! [`TreePath`]. Identical contents always produce identical digests,
//! so a manifest recorded at finalize time can be checked against the
//! same tree arbitrarily later.

pub mod digest;
pub mod tree;
pub mod tree_path;

pub use digest::{Digest, DigestError};
pub use tree::{SymlinkPolicy, TreeDiff, TreeDigests, TreeHashError, TreeHasher};
pub use tree_path::{TreePath, TreePathError};
