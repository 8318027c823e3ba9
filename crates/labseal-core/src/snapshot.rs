//! Environment and code snapshotting.
//!
//! At finalize time the snapshotter records what the experiment ran
//! with: a textual description of the platform and any dependency
//! descriptor files found at the experiment root, plus a copy of the
//! analyst's source files into `snapshot/`. The description goes into
//! the manifest verbatim; the copied code rides along as evidence.
//! Capture is deterministic for an unchanged tree, so a retried
//! finalize reproduces the same description.

use std::fs;
use std::io;
use std::path::Path;

use tracing::debug;

use labseal_digest::Digest;

use crate::error::SnapshotError;
use crate::layout::ExperimentLayout;

/// Dependency descriptor files captured when present at the root.
const DESCRIPTOR_FILES: &[&str] = &[
    "requirements.txt",
    "environment.yml",
    "pyproject.toml",
    "Cargo.toml",
    "Cargo.lock",
    "renv.lock",
    "package.json",
];

/// Descriptors above this size are summarized by digest only.
const MAX_INLINE_DESCRIPTOR: u64 = 64 * 1024;

/// Entries at the experiment root that are never part of the code.
const RESERVED_ENTRIES: &[&str] = &[
    ExperimentLayout::INPUT_DIR,
    ExperimentLayout::OUTPUT_DIR,
    ExperimentLayout::SNAPSHOT_DIR,
    ExperimentLayout::MANIFEST_FILE,
    ExperimentLayout::SIGNATURE_FILE,
    ExperimentLayout::TIMESTAMP_FILE,
];

/// Captures environment descriptions and code snapshots.
#[derive(Debug, Clone)]
pub struct EnvironmentSnapshotter {
    extensions: Vec<String>,
}

/// Result of one capture.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSnapshot {
    /// Free-form description recorded in the manifest.
    pub description: String,
    /// Number of source files copied into `snapshot/`.
    pub code_files: usize,
}

impl EnvironmentSnapshotter {
    /// Snapshotter capturing files with the given extensions as code.
    #[must_use]
    pub fn new(extensions: Vec<String>) -> Self {
        Self { extensions }
    }

    /// Captures the environment of `layout`, replacing any snapshot a
    /// previous finalize attempt left behind.
    ///
    /// # Errors
    ///
    /// [`SnapshotError::Io`] naming the file that could not be read or
    /// copied.
    pub async fn capture(
        &self,
        layout: &ExperimentLayout,
    ) -> Result<EnvironmentSnapshot, SnapshotError> {
        let root = layout.root().to_path_buf();
        let inner = layout.clone();
        let extensions = self.extensions.clone();
        let snapshot = tokio::task::spawn_blocking(move || capture_blocking(&inner, &extensions))
            .await
            .map_err(|e| SnapshotError::io(&root, io::Error::other(e)))??;
        debug!(
            root = %root.display(),
            code_files = snapshot.code_files,
            "environment captured"
        );
        Ok(snapshot)
    }
}

fn capture_blocking(
    layout: &ExperimentLayout,
    extensions: &[String],
) -> Result<EnvironmentSnapshot, SnapshotError> {
    let mut description = format!(
        "platform: {}/{}\n",
        std::env::consts::OS,
        std::env::consts::ARCH
    );
    describe_descriptors(layout, &mut description)?;

    let snapshot_dir = layout.snapshot_dir();
    if snapshot_dir.exists() {
        fs::remove_dir_all(&snapshot_dir).map_err(|e| SnapshotError::io(&snapshot_dir, e))?;
    }
    fs::create_dir_all(&snapshot_dir).map_err(|e| SnapshotError::io(&snapshot_dir, e))?;

    let mut code_files = 0usize;
    copy_code(layout.root(), &snapshot_dir, extensions, true, &mut code_files)?;
    description.push_str(&format!("code files captured: {code_files}\n"));

    Ok(EnvironmentSnapshot {
        description,
        code_files,
    })
}

fn describe_descriptors(
    layout: &ExperimentLayout,
    description: &mut String,
) -> Result<(), SnapshotError> {
    let mut sections = Vec::new();
    for name in DESCRIPTOR_FILES {
        let path = layout.root().join(name);
        let Ok(meta) = fs::metadata(&path) else {
            continue;
        };
        if !meta.is_file() {
            continue;
        }
        if meta.len() > MAX_INLINE_DESCRIPTOR {
            let file = fs::File::open(&path).map_err(|e| SnapshotError::io(&path, e))?;
            let digest = Digest::compute_reader(file).map_err(|e| SnapshotError::io(&path, e))?;
            sections.push(format!(
                "--- {name} (sha256 {digest}, {} bytes, contents omitted) ---\n",
                meta.len()
            ));
            continue;
        }
        let bytes = fs::read(&path).map_err(|e| SnapshotError::io(&path, e))?;
        let digest = Digest::compute(&bytes);
        match String::from_utf8(bytes) {
            Ok(text) => {
                let mut section = format!("--- {name} (sha256 {digest}) ---\n{text}");
                if !section.ends_with('\n') {
                    section.push('\n');
                }
                sections.push(section);
            }
            Err(_) => {
                sections.push(format!("--- {name} (sha256 {digest}, binary) ---\n"));
            }
        }
    }

    if sections.is_empty() {
        description.push_str("descriptors: none\n");
    } else {
        description.push_str("descriptors:\n");
        for section in sections {
            description.push_str(&section);
        }
    }
    Ok(())
}

fn copy_code(
    src_dir: &Path,
    dst_dir: &Path,
    extensions: &[String],
    at_root: bool,
    copied: &mut usize,
) -> Result<(), SnapshotError> {
    let entries = fs::read_dir(src_dir).map_err(|e| SnapshotError::io(src_dir, e))?;
    for entry in entries {
        let entry = entry.map_err(|e| SnapshotError::io(src_dir, e))?;
        let name_os = entry.file_name();
        let name = name_os.to_string_lossy();
        if name.starts_with('.') {
            continue;
        }
        if at_root && RESERVED_ENTRIES.contains(&name.as_ref()) {
            continue;
        }
        let src = entry.path();
        let file_type = entry.file_type().map_err(|e| SnapshotError::io(&src, e))?;
        if file_type.is_symlink() {
            continue;
        }
        if file_type.is_dir() {
            copy_code(&src, &dst_dir.join(&name_os), extensions, false, copied)?;
        } else if file_type.is_file() && matches_extension(&src, extensions) {
            // Subdirectories materialize only when they hold code.
            fs::create_dir_all(dst_dir).map_err(|e| SnapshotError::io(dst_dir, e))?;
            fs::copy(&src, dst_dir.join(&name_os)).map_err(|e| SnapshotError::io(&src, e))?;
            *copied += 1;
        }
    }
    Ok(())
}

fn matches_extension(path: &Path, extensions: &[String]) -> bool {
    path.extension()
        .and_then(|e| e.to_str())
        .is_some_and(|ext| extensions.iter().any(|want| want.eq_ignore_ascii_case(ext)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use labseal_registry::ExperimentId;

    async fn scaffolded(dir: &Path) -> ExperimentLayout {
        let layout = ExperimentLayout::new(dir.join("bay"));
        layout.scaffold(ExperimentId::new()).await.unwrap();
        layout
    }

    fn snapshotter() -> EnvironmentSnapshotter {
        EnvironmentSnapshotter::new(vec!["py".into(), "sh".into()])
    }

    #[tokio::test]
    async fn description_names_platform_and_descriptors() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scaffolded(dir.path()).await;
        tokio::fs::write(layout.root().join("requirements.txt"), "numpy==1.26.4\n")
            .await
            .unwrap();

        let snapshot = snapshotter().capture(&layout).await.unwrap();
        assert!(snapshot.description.starts_with("platform: "));
        assert!(snapshot.description.contains("requirements.txt"));
        assert!(snapshot.description.contains("numpy==1.26.4"));
        // Digest of the descriptor contents is recorded beside it.
        let digest = Digest::compute(b"numpy==1.26.4\n").to_string();
        assert!(snapshot.description.contains(&digest));
    }

    #[tokio::test]
    async fn missing_descriptors_are_reported_as_none() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scaffolded(dir.path()).await;
        let snapshot = snapshotter().capture(&layout).await.unwrap();
        assert!(snapshot.description.contains("descriptors: none"));
    }

    #[tokio::test]
    async fn code_files_are_copied_and_data_dirs_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scaffolded(dir.path()).await;
        tokio::fs::write(layout.root().join("analysis.py"), "print('hi')\n")
            .await
            .unwrap();
        tokio::fs::create_dir_all(layout.root().join("lib")).await.unwrap();
        tokio::fs::write(layout.root().join("lib/util.py"), "x = 1\n").await.unwrap();
        tokio::fs::write(layout.root().join("notes.csv"), "not code").await.unwrap();
        tokio::fs::write(layout.input_dir().join("data.py"), "staged input").await.unwrap();

        let snapshot = snapshotter().capture(&layout).await.unwrap();
        assert_eq!(snapshot.code_files, 2);
        assert!(layout.snapshot_dir().join("analysis.py").is_file());
        assert!(layout.snapshot_dir().join("lib/util.py").is_file());
        assert!(!layout.snapshot_dir().join("notes.csv").exists());
        assert!(!layout.snapshot_dir().join("input").exists());
    }

    #[tokio::test]
    async fn recapture_replaces_a_stale_snapshot() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scaffolded(dir.path()).await;
        tokio::fs::write(layout.root().join("old.py"), "old").await.unwrap();
        snapshotter().capture(&layout).await.unwrap();

        tokio::fs::remove_file(layout.root().join("old.py")).await.unwrap();
        tokio::fs::write(layout.root().join("new.py"), "new").await.unwrap();
        let snapshot = snapshotter().capture(&layout).await.unwrap();

        assert_eq!(snapshot.code_files, 1);
        assert!(!layout.snapshot_dir().join("old.py").exists());
        assert!(layout.snapshot_dir().join("new.py").is_file());
    }

    #[tokio::test]
    async fn capture_is_deterministic_for_an_unchanged_tree() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scaffolded(dir.path()).await;
        tokio::fs::write(layout.root().join("run.sh"), "echo run\n").await.unwrap();
        tokio::fs::write(layout.root().join("pyproject.toml"), "[project]\nname = \"x\"\n")
            .await
            .unwrap();

        let first = snapshotter().capture(&layout).await.unwrap();
        let second = snapshotter().capture(&layout).await.unwrap();
        assert_eq!(first, second);
    }

    #[tokio::test]
    async fn binary_descriptor_is_digest_only() {
        let dir = tempfile::tempdir().unwrap();
        let layout = scaffolded(dir.path()).await;
        tokio::fs::write(layout.root().join("package.json"), [0xffu8, 0xfe, 0x00])
            .await
            .unwrap();

        let snapshot = snapshotter().capture(&layout).await.unwrap();
        assert!(snapshot.description.contains("package.json"));
        assert!(snapshot.description.contains("binary"));
    }
}
