//! Persistent experiment registry.
//!
//! The registry is the single authority on experiment records. All
//! mutations run under one write lock and are persisted to a JSON
//! store file by write-temp-then-rename before the lock is released,
//! so the file on disk is always a complete snapshot of a consistent
//! state. Readers never block writers for longer than a map lookup.

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use crate::audit::{AuditAction, AuditLog};
use crate::error::RegistryError;
use crate::record::{ExperimentId, ExperimentRecord};

/// Store file schema version this build reads and writes.
const STORE_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct StoreFile {
    version: u32,
    experiments: Vec<ExperimentRecord>,
}

#[derive(Debug, Default)]
struct State {
    records: BTreeMap<ExperimentId, ExperimentRecord>,
    by_location: BTreeMap<PathBuf, ExperimentId>,
}

/// Authoritative store of experiment records.
#[derive(Debug)]
pub struct Registry {
    store_path: PathBuf,
    state: RwLock<State>,
    finalize_guards: DashMap<ExperimentId, Arc<Mutex<()>>>,
    audit: AuditLog,
}

impl Registry {
    /// Opens the registry at `store_path`, creating parent directories
    /// as needed. A missing store file means an empty registry; a
    /// present but unreadable one is an error, never silently ignored.
    ///
    /// # Errors
    ///
    /// [`RegistryError::Corrupt`], [`RegistryError::UnsupportedVersion`]
    /// or [`RegistryError::ConflictingRecords`] when the file exists
    /// but cannot be trusted; [`RegistryError::Store`] on I/O failure.
    pub async fn load(store_path: impl Into<PathBuf>) -> Result<Self, RegistryError> {
        let store_path = store_path.into();
        if let Some(parent) = store_path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| RegistryError::store(parent, e))?;
        }

        let state = match tokio::fs::read(&store_path).await {
            Ok(bytes) => {
                let file: StoreFile = serde_json::from_slice(&bytes).map_err(|e| {
                    RegistryError::Corrupt {
                        path: store_path.clone(),
                        source: e,
                    }
                })?;
                if file.version != STORE_VERSION {
                    return Err(RegistryError::UnsupportedVersion {
                        path: store_path,
                        found: file.version,
                    });
                }
                let mut records = BTreeMap::new();
                let mut by_location = BTreeMap::new();
                for record in file.experiments {
                    let location = record.location().to_path_buf();
                    if by_location.insert(location.clone(), record.id()).is_some() {
                        return Err(RegistryError::ConflictingRecords {
                            path: store_path,
                            location,
                        });
                    }
                    records.insert(record.id(), record);
                }
                State { records, by_location }
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => State::default(),
            Err(e) => return Err(RegistryError::store(&store_path, e)),
        };

        debug!(
            path = %store_path.display(),
            experiments = state.records.len(),
            "registry loaded"
        );
        Ok(Self {
            store_path,
            state: RwLock::new(state),
            finalize_guards: DashMap::new(),
            audit: AuditLog::default(),
        })
    }

    /// Registers a new experiment at `location`.
    ///
    /// The duplicate check and the insert happen under one write lock,
    /// so two concurrent creates for the same location cannot both
    /// succeed.
    ///
    /// # Errors
    ///
    /// [`RegistryError::LocationNotAbsolute`] or
    /// [`RegistryError::DuplicateLocation`] reject the request before
    /// anything is recorded; [`RegistryError::Store`] if persistence
    /// fails, in which case the record is not kept in memory either.
    pub async fn create(
        &self,
        name: &str,
        location: &Path,
    ) -> Result<ExperimentRecord, RegistryError> {
        if !location.is_absolute() {
            return Err(RegistryError::LocationNotAbsolute(location.to_path_buf()));
        }

        let mut state = self.state.write().await;
        if state.by_location.contains_key(location) {
            return Err(RegistryError::DuplicateLocation(location.to_path_buf()));
        }

        let record = ExperimentRecord::new(name, location.to_path_buf());
        let id = record.id();
        state.by_location.insert(location.to_path_buf(), id);
        state.records.insert(id, record.clone());

        if let Err(e) = self.persist(&state).await {
            state.records.remove(&id);
            state.by_location.remove(location);
            return Err(e);
        }

        self.audit
            .record(id, AuditAction::Created, location.display().to_string());
        info!(id = %id, name, location = %location.display(), "experiment registered");
        Ok(record)
    }

    /// Fetches a record by id.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] if no such experiment exists.
    pub async fn get(&self, id: ExperimentId) -> Result<ExperimentRecord, RegistryError> {
        self.state
            .read()
            .await
            .records
            .get(&id)
            .cloned()
            .ok_or(RegistryError::NotFound(id))
    }

    /// All records, ordered by id. ULIDs order by creation time, so
    /// this is registration order except within a single millisecond.
    pub async fn list(&self) -> Vec<ExperimentRecord> {
        self.state.read().await.records.values().cloned().collect()
    }

    /// Marks an experiment open for work. Idempotent while the
    /// experiment is in progress; each call refreshes the open time.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] for unknown ids;
    /// [`RegistryError::InvalidTransition`] once completed.
    pub async fn open(&self, id: ExperimentId) -> Result<ExperimentRecord, RegistryError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        let before = record.clone();
        record.mark_opened()?;
        let after = record.clone();

        if let Err(e) = self.persist(&state).await {
            if let Some(slot) = state.records.get_mut(&id) {
                *slot = before;
            }
            return Err(e);
        }

        self.audit.record(id, AuditAction::Opened, String::new());
        debug!(id = %id, "experiment opened");
        Ok(after)
    }

    /// Moves an experiment to `Completed` and pins its manifest path.
    /// This is the last step of finalize; everything attested must
    /// already be on disk.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`], [`RegistryError::AlreadyFinalized`],
    /// or [`RegistryError::InvalidTransition`] if the record was never
    /// opened; [`RegistryError::Store`] if persistence fails, leaving
    /// the record unchanged.
    pub async fn complete(
        &self,
        id: ExperimentId,
        manifest_path: &Path,
    ) -> Result<ExperimentRecord, RegistryError> {
        let mut state = self.state.write().await;
        let record = state
            .records
            .get_mut(&id)
            .ok_or(RegistryError::NotFound(id))?;
        let before = record.clone();
        record.mark_completed(manifest_path.to_path_buf())?;
        let after = record.clone();

        if let Err(e) = self.persist(&state).await {
            if let Some(slot) = state.records.get_mut(&id) {
                *slot = before;
            }
            return Err(e);
        }

        self.audit
            .record(id, AuditAction::Finalized, manifest_path.display().to_string());
        info!(id = %id, manifest = %manifest_path.display(), "experiment completed");
        Ok(after)
    }

    /// Removes a non-terminal record, freeing its location. Used to
    /// roll back a creation whose directory scaffolding failed.
    ///
    /// # Errors
    ///
    /// [`RegistryError::NotFound`] for unknown ids;
    /// [`RegistryError::AlreadyFinalized`] for completed experiments,
    /// whose records are permanent evidence.
    pub async fn remove(&self, id: ExperimentId) -> Result<(), RegistryError> {
        let mut state = self.state.write().await;
        match state.records.get(&id) {
            None => return Err(RegistryError::NotFound(id)),
            Some(r) if r.status().is_terminal() => {
                return Err(RegistryError::AlreadyFinalized(id));
            }
            Some(_) => {}
        }
        let record = state
            .records
            .remove(&id)
            .ok_or(RegistryError::NotFound(id))?;
        let location = record.location().to_path_buf();
        state.by_location.remove(&location);

        if let Err(e) = self.persist(&state).await {
            state.by_location.insert(location, id);
            state.records.insert(id, record);
            return Err(e);
        }

        self.audit
            .record(id, AuditAction::RolledBack, location.display().to_string());
        debug!(id = %id, "experiment record removed");
        Ok(())
    }

    /// Per-experiment mutex serializing finalize pipelines. Two
    /// finalizes of the same experiment queue here instead of both
    /// observing an in-progress record.
    #[must_use]
    pub fn finalize_guard(&self, id: ExperimentId) -> Arc<Mutex<()>> {
        let guard = self.finalize_guards.entry(id).or_default();
        Arc::clone(&guard)
    }

    /// The lifecycle audit log.
    #[inline]
    #[must_use]
    pub fn audit(&self) -> &AuditLog {
        &self.audit
    }

    async fn persist(&self, state: &State) -> Result<(), RegistryError> {
        let file = StoreFile {
            version: STORE_VERSION,
            experiments: state.records.values().cloned().collect(),
        };
        let bytes = serde_json::to_vec_pretty(&file).map_err(RegistryError::Encode)?;

        let tmp = tmp_path(&self.store_path);
        tokio::fs::write(&tmp, &bytes)
            .await
            .map_err(|e| RegistryError::store(&tmp, e))?;
        tokio::fs::rename(&tmp, &self.store_path)
            .await
            .map_err(|e| RegistryError::store(&self.store_path, e))?;
        debug!(
            path = %self.store_path.display(),
            experiments = file.experiments.len(),
            "registry persisted"
        );
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut os = path.as_os_str().to_owned();
    os.push(".tmp");
    PathBuf::from(os)
}
