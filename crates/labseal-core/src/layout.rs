//! On-disk layout of an experiment bay.
//!
//! Every experiment owns one directory with a fixed internal shape:
//! `input/` for staged inputs, `output/` for results, `snapshot/` for
//! the code snapshot, the manifest and its attestation files at the
//! root, and a `.labseal` marker dropped at scaffold time so a
//! location can be recognized as claimed even if the registry record
//! is lost.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use labseal_registry::ExperimentId;

use crate::error::LayoutError;

/// Path arithmetic and scaffolding for one experiment directory.
#[derive(Debug, Clone)]
pub struct ExperimentLayout {
    root: PathBuf,
}

impl ExperimentLayout {
    /// Directory inputs are staged into.
    pub const INPUT_DIR: &'static str = "input";
    /// Directory outputs accumulate in.
    pub const OUTPUT_DIR: &'static str = "output";
    /// Directory the code snapshot is copied into.
    pub const SNAPSHOT_DIR: &'static str = "snapshot";
    /// Canonical manifest file name.
    pub const MANIFEST_FILE: &'static str = "manifest.json";
    /// Detached signature file name.
    pub const SIGNATURE_FILE: &'static str = "manifest.sig.json";
    /// Timestamp token file name.
    pub const TIMESTAMP_FILE: &'static str = "manifest.tsr.json";
    /// Scaffold marker file name.
    pub const MARKER_FILE: &'static str = ".labseal";

    /// Layout rooted at `root`.
    #[must_use]
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The experiment root directory.
    #[inline]
    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// `input/` directory.
    #[must_use]
    pub fn input_dir(&self) -> PathBuf {
        self.root.join(Self::INPUT_DIR)
    }

    /// `output/` directory.
    #[must_use]
    pub fn output_dir(&self) -> PathBuf {
        self.root.join(Self::OUTPUT_DIR)
    }

    /// `snapshot/` directory.
    #[must_use]
    pub fn snapshot_dir(&self) -> PathBuf {
        self.root.join(Self::SNAPSHOT_DIR)
    }

    /// Canonical manifest file.
    #[must_use]
    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(Self::MANIFEST_FILE)
    }

    /// Detached signature file.
    #[must_use]
    pub fn signature_path(&self) -> PathBuf {
        self.root.join(Self::SIGNATURE_FILE)
    }

    /// Timestamp token file.
    #[must_use]
    pub fn timestamp_path(&self) -> PathBuf {
        self.root.join(Self::TIMESTAMP_FILE)
    }

    /// Scaffold marker file.
    #[must_use]
    pub fn marker_path(&self) -> PathBuf {
        self.root.join(Self::MARKER_FILE)
    }

    /// Whether the location already carries scaffolding: the marker
    /// file or either data directory. Used to refuse creation on top
    /// of a claimed location even when the registry has no record.
    pub async fn has_scaffold_evidence(&self) -> bool {
        for path in [self.marker_path(), self.input_dir(), self.output_dir()] {
            if tokio::fs::try_exists(&path).await.unwrap_or(false) {
                return true;
            }
        }
        false
    }

    /// Creates the experiment directories and drops the marker.
    ///
    /// # Errors
    ///
    /// [`LayoutError::Io`] naming the path that could not be created.
    pub async fn scaffold(&self, id: ExperimentId) -> Result<(), LayoutError> {
        for dir in [self.root.clone(), self.input_dir(), self.output_dir()] {
            tokio::fs::create_dir_all(&dir)
                .await
                .map_err(|e| LayoutError::io(&dir, e))?;
        }
        let marker = self.marker_path();
        tokio::fs::write(&marker, format!("{id}\n"))
            .await
            .map_err(|e| LayoutError::io(&marker, e))?;
        debug!(root = %self.root.display(), "experiment scaffolded");
        Ok(())
    }

    /// Copies the tree under `source` into `input/`, skipping hidden
    /// entries and symlinks so the staged set matches what the hasher
    /// will later see. Returns the number of files copied.
    ///
    /// # Errors
    ///
    /// [`LayoutError::SourceMissing`] if `source` does not exist;
    /// [`LayoutError::Io`] on copy failure.
    pub async fn stage_inputs(&self, source: &Path) -> Result<usize, LayoutError> {
        let source = source.to_path_buf();
        let dest = self.input_dir();
        let staged = tokio::task::spawn_blocking(move || copy_tree(&source, &dest))
            .await
            .map_err(|e| LayoutError::io(&self.input_dir(), io::Error::other(e)))??;
        debug!(root = %self.root.display(), staged, "inputs staged");
        Ok(staged)
    }

    /// Undoes scaffolding after a failed creation: removes the marker
    /// and both data directories. The root itself is left alone in
    /// case it existed before the attempt.
    ///
    /// # Errors
    ///
    /// [`LayoutError::Io`] if something that exists cannot be removed.
    pub async fn remove_scaffold(&self) -> Result<(), LayoutError> {
        remove_file_if_present(&self.marker_path()).await?;
        remove_dir_if_present(&self.input_dir()).await?;
        remove_dir_if_present(&self.output_dir()).await?;
        debug!(root = %self.root.display(), "scaffold removed");
        Ok(())
    }
}

async fn remove_file_if_present(path: &Path) -> Result<(), LayoutError> {
    match tokio::fs::remove_file(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LayoutError::io(path, e)),
    }
}

async fn remove_dir_if_present(path: &Path) -> Result<(), LayoutError> {
    match tokio::fs::remove_dir_all(path).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(LayoutError::io(path, e)),
    }
}

/// Blocking recursive copy of regular files.
fn copy_tree(source: &Path, dest: &Path) -> Result<usize, LayoutError> {
    if !source.is_dir() {
        return Err(LayoutError::SourceMissing(source.to_path_buf()));
    }
    let mut copied = 0usize;
    copy_tree_inner(source, dest, &mut copied)?;
    Ok(copied)
}

fn copy_tree_inner(src_dir: &Path, dst_dir: &Path, copied: &mut usize) -> Result<(), LayoutError> {
    fs::create_dir_all(dst_dir).map_err(|e| LayoutError::io(dst_dir, e))?;
    let entries = fs::read_dir(src_dir).map_err(|e| LayoutError::io(src_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| LayoutError::io(src_dir, e))?;
        let name = entry.file_name();
        if name.to_string_lossy().starts_with('.') {
            continue;
        }
        let src = entry.path();
        let file_type = entry.file_type().map_err(|e| LayoutError::io(&src, e))?;
        if file_type.is_symlink() {
            continue;
        }
        let dst = dst_dir.join(&name);
        if file_type.is_dir() {
            copy_tree_inner(&src, &dst, copied)?;
        } else if file_type.is_file() {
            fs::copy(&src, &dst).map_err(|e| LayoutError::io(&src, e))?;
            *copied += 1;
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn scaffold_creates_dirs_and_marker() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ExperimentLayout::new(dir.path().join("bay"));
        assert!(!layout.has_scaffold_evidence().await);

        layout.scaffold(ExperimentId::new()).await.unwrap();
        assert!(layout.input_dir().is_dir());
        assert!(layout.output_dir().is_dir());
        assert!(layout.marker_path().is_file());
        assert!(layout.has_scaffold_evidence().await);
    }

    #[tokio::test]
    async fn leftover_data_dir_counts_as_evidence() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ExperimentLayout::new(dir.path().join("bay"));
        tokio::fs::create_dir_all(layout.input_dir()).await.unwrap();
        assert!(layout.has_scaffold_evidence().await);
    }

    #[tokio::test]
    async fn stage_inputs_copies_nested_files() {
        let dir = tempfile::tempdir().unwrap();
        let source = dir.path().join("source");
        tokio::fs::create_dir_all(source.join("sub")).await.unwrap();
        tokio::fs::write(source.join("a.csv"), "1,2,3").await.unwrap();
        tokio::fs::write(source.join("sub/b.csv"), "4,5").await.unwrap();
        tokio::fs::write(source.join(".hidden"), "x").await.unwrap();

        let layout = ExperimentLayout::new(dir.path().join("bay"));
        layout.scaffold(ExperimentId::new()).await.unwrap();
        let staged = layout.stage_inputs(&source).await.unwrap();

        assert_eq!(staged, 2);
        assert_eq!(
            tokio::fs::read_to_string(layout.input_dir().join("a.csv")).await.unwrap(),
            "1,2,3"
        );
        assert_eq!(
            tokio::fs::read_to_string(layout.input_dir().join("sub/b.csv")).await.unwrap(),
            "4,5"
        );
        assert!(!layout.input_dir().join(".hidden").exists());
    }

    #[tokio::test]
    async fn staging_from_missing_source_fails() {
        let dir = tempfile::tempdir().unwrap();
        let layout = ExperimentLayout::new(dir.path().join("bay"));
        layout.scaffold(ExperimentId::new()).await.unwrap();

        let err = layout.stage_inputs(&dir.path().join("nowhere")).await.unwrap_err();
        assert!(matches!(err, LayoutError::SourceMissing(_)));
    }

    #[tokio::test]
    async fn remove_scaffold_clears_evidence_but_keeps_root() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("bay");
        tokio::fs::create_dir_all(&root).await.unwrap();

        let layout = ExperimentLayout::new(&root);
        layout.scaffold(ExperimentId::new()).await.unwrap();
        layout.remove_scaffold().await.unwrap();

        assert!(!layout.has_scaffold_evidence().await);
        assert!(root.is_dir());
    }
}
