#![forbid(unsafe_code)]

//! Flat-file record storage: each store is one JSON object mapping record id
//! to record.
//!
//! Every save rewrites the whole file. There is no cross-process locking and
//! the write is not atomic, so a crash mid-write can leave a truncated file;
//! the next load treats that file as corrupted, backs it up and starts over
//! with an empty map.

use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::marker::PhantomData;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::{debug, warn};
use ulid::Ulid;

pub const FAILURES_FILE: &str = "failures.json";
pub const SESSIONS_FILE: &str = "debug_sessions.json";
pub const GROUPS_FILE: &str = "failure_groups.json";

pub type RecordMap<T> = BTreeMap<String, T>;

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("failed to {action} {}: {source}", .path.display())]
    Io {
        action: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to serialize records for {}: {source}", .path.display())]
    Serialize {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("store {} is corrupted and could not be backed up: {detail}", .path.display())]
    Corruption { path: PathBuf, detail: String },
}

impl StoreError {
    #[must_use]
    pub fn path(&self) -> &Path {
        match self {
            Self::Io { path, .. }
            | Self::Serialize { path, .. }
            | Self::Corruption { path, .. } => path,
        }
    }
}

pub trait RecordStore<T>: Send + Sync {
    /// Reads every record. A missing store reads as empty.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the backing medium cannot be read.
    fn load(&self) -> Result<RecordMap<T>, StoreError>;

    /// Replaces every record.
    ///
    /// # Errors
    /// Returns [`StoreError`] when the records cannot be serialized or written.
    fn save(&self, records: &RecordMap<T>) -> Result<(), StoreError>;
}

pub struct JsonFileStore<T> {
    path: PathBuf,
    _records: PhantomData<fn() -> T>,
}

impl<T> JsonFileStore<T> {
    #[must_use]
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            _records: PhantomData,
        }
    }

    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn back_up_corrupted(&self) -> Result<PathBuf, StoreError> {
        let file_name = self
            .path
            .file_name()
            .map_or_else(|| "store".to_string(), |name| name.to_string_lossy().into_owned());
        let backup = self
            .path
            .with_file_name(format!("{file_name}.corrupt-{}", Ulid::new()));
        fs::rename(&self.path, &backup).map_err(|err| StoreError::Corruption {
            path: self.path.clone(),
            detail: format!("rename to {} failed: {err}", backup.display()),
        })?;
        Ok(backup)
    }
}

impl<T> RecordStore<T> for JsonFileStore<T>
where
    T: Serialize + DeserializeOwned,
{
    fn load(&self) -> Result<RecordMap<T>, StoreError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == ErrorKind::NotFound => {
                debug!(path = %self.path.display(), "store file missing, reading as empty");
                return Ok(RecordMap::new());
            }
            Err(source) => {
                return Err(StoreError::Io {
                    action: "read",
                    path: self.path.clone(),
                    source,
                })
            }
        };

        if content.trim().is_empty() {
            return Ok(RecordMap::new());
        }

        match serde_json::from_str::<RecordMap<T>>(&content) {
            Ok(records) => {
                debug!(path = %self.path.display(), records = records.len(), "loaded store");
                Ok(records)
            }
            Err(parse_err) => {
                let backup = self.back_up_corrupted()?;
                warn!(
                    path = %self.path.display(),
                    backup = %backup.display(),
                    error = %parse_err,
                    "store content is not a valid record map; backed up and continuing empty"
                );
                Ok(RecordMap::new())
            }
        }
    }

    fn save(&self, records: &RecordMap<T>) -> Result<(), StoreError> {
        let serialized =
            serde_json::to_string_pretty(records).map_err(|source| StoreError::Serialize {
                path: self.path.clone(),
                source,
            })?;
        fs::write(&self.path, serialized).map_err(|source| StoreError::Io {
            action: "write",
            path: self.path.clone(),
            source,
        })?;
        debug!(path = %self.path.display(), records = records.len(), "saved store");
        Ok(())
    }
}

/// Process-local store, used for tests and embedding without a data directory.
pub struct MemoryStore<T> {
    records: Mutex<RecordMap<T>>,
}

impl<T> MemoryStore<T> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Mutex::new(RecordMap::new()),
        }
    }

    #[must_use]
    pub fn with_records(records: RecordMap<T>) -> Self {
        Self {
            records: Mutex::new(records),
        }
    }
}

impl<T> Default for MemoryStore<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> RecordStore<T> for MemoryStore<T>
where
    T: Clone + Send,
{
    fn load(&self) -> Result<RecordMap<T>, StoreError> {
        let guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(guard.clone())
    }

    fn save(&self, records: &RecordMap<T>) -> Result<(), StoreError> {
        let mut guard = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        guard.clone_from(records);
        Ok(())
    }
}

/// Locations of the three store files inside one data directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DataPaths {
    pub failures: PathBuf,
    pub sessions: PathBuf,
    pub groups: PathBuf,
}

impl DataPaths {
    #[must_use]
    pub fn in_dir(dir: &Path) -> Self {
        Self {
            failures: dir.join(FAILURES_FILE),
            sessions: dir.join(SESSIONS_FILE),
            groups: dir.join(GROUPS_FILE),
        }
    }

    /// Creates missing directories and seeds missing store files with `{}`.
    /// Existing files are left untouched.
    ///
    /// # Errors
    /// Returns [`StoreError::Io`] when a directory or file cannot be created.
    pub fn ensure(&self) -> Result<(), StoreError> {
        for path in [&self.failures, &self.sessions, &self.groups] {
            if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
                fs::create_dir_all(parent).map_err(|source| StoreError::Io {
                    action: "create directory",
                    path: parent.to_path_buf(),
                    source,
                })?;
            }
            if !path.exists() {
                fs::write(path, "{}").map_err(|source| StoreError::Io {
                    action: "create",
                    path: path.clone(),
                    source,
                })?;
            }
        }
        Ok(())
    }
}
