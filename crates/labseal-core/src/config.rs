//! Workbench configuration.

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use serde::{Deserialize, Serialize};

use labseal_digest::SymlinkPolicy;

use crate::error::ConfigError;

/// Extensions treated as source code by the snapshotter when the
/// config does not override them.
static DEFAULT_SNAPSHOT_EXTENSIONS: Lazy<Vec<String>> = Lazy::new(|| {
    [
        "py", "ipynb", "r", "jl", "rs", "c", "cc", "cpp", "h", "hpp", "java", "sh", "sql", "m",
    ]
    .into_iter()
    .map(str::to_owned)
    .collect()
});

/// Workbench settings.
///
/// All fields have defaults, so a partial TOML file configures only
/// what it names. State files default to a `.labseal` directory under
/// the working directory.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkbenchConfig {
    /// JSON store of experiment records.
    pub registry_path: PathBuf,
    /// Signer identity key file.
    pub identity_path: PathBuf,
    /// Local timestamp authority key file.
    pub authority_key_path: PathBuf,
    /// Symlink treatment while hashing trees.
    pub symlink_policy: SymlinkPolicy,
    /// File extensions captured by the code snapshot.
    pub snapshot_extensions: Vec<String>,
}

impl Default for WorkbenchConfig {
    fn default() -> Self {
        Self {
            registry_path: PathBuf::from(".labseal/registry.json"),
            identity_path: PathBuf::from(".labseal/identity.json"),
            authority_key_path: PathBuf::from(".labseal/authority.json"),
            symlink_policy: SymlinkPolicy::default(),
            snapshot_extensions: DEFAULT_SNAPSHOT_EXTENSIONS.clone(),
        }
    }
}

impl WorkbenchConfig {
    /// Loads TOML configuration from `path`.
    ///
    /// # Errors
    ///
    /// [`ConfigError::Io`] if the file cannot be read;
    /// [`ConfigError::Parse`] if it is not valid TOML.
    pub async fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ConfigError::Io {
                path: path.to_path_buf(),
                source: e,
            })?;
        toml::from_str(&text).map_err(|e| ConfigError::Parse {
            path: path.to_path_buf(),
            source: e,
        })
    }

    /// Rebases all state files under `dir`.
    #[must_use]
    pub fn with_data_dir(mut self, dir: &Path) -> Self {
        self.registry_path = dir.join("registry.json");
        self.identity_path = dir.join("identity.json");
        self.authority_key_path = dir.join("authority.json");
        self
    }

    /// Sets the symlink policy for tree hashing.
    #[must_use]
    pub fn with_symlink_policy(mut self, policy: SymlinkPolicy) -> Self {
        self.symlink_policy = policy;
        self
    }

    /// Replaces the snapshot extension set.
    #[must_use]
    pub fn with_snapshot_extensions(mut self, extensions: Vec<String>) -> Self {
        self.snapshot_extensions = extensions;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_live_under_dot_labseal() {
        let config = WorkbenchConfig::default();
        assert_eq!(config.registry_path, PathBuf::from(".labseal/registry.json"));
        assert_eq!(config.symlink_policy, SymlinkPolicy::Exclude);
        assert!(config.snapshot_extensions.iter().any(|e| e == "py"));
    }

    #[test]
    fn with_data_dir_rebases_state_files() {
        let config = WorkbenchConfig::default().with_data_dir(Path::new("/var/lab"));
        assert_eq!(config.registry_path, PathBuf::from("/var/lab/registry.json"));
        assert_eq!(config.identity_path, PathBuf::from("/var/lab/identity.json"));
        assert_eq!(config.authority_key_path, PathBuf::from("/var/lab/authority.json"));
    }

    #[tokio::test]
    async fn partial_toml_overrides_only_named_keys() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labseal.toml");
        tokio::fs::write(
            &path,
            "registry_path = \"/srv/lab/registry.json\"\nsymlink_policy = \"follow_files\"\n",
        )
        .await
        .unwrap();

        let config = WorkbenchConfig::from_file(&path).await.unwrap();
        assert_eq!(config.registry_path, PathBuf::from("/srv/lab/registry.json"));
        assert_eq!(config.symlink_policy, SymlinkPolicy::FollowFiles);
        // Unnamed keys keep their defaults.
        assert_eq!(config.identity_path, PathBuf::from(".labseal/identity.json"));
    }

    #[tokio::test]
    async fn invalid_toml_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("labseal.toml");
        tokio::fs::write(&path, "registry_path = [broken").await.unwrap();

        let err = WorkbenchConfig::from_file(&path).await.unwrap_err();
        assert!(matches!(err, ConfigError::Parse { .. }));
    }
}
