//! Local note cache.
//!
//! Holds the note set, the change ledger and the last version marker between
//! sessions, so the notebook opens instantly and unpushed edits survive a
//! restart. Loaded while the coordinator is `initializing`.

use crate::current_timestamp;
use crate::models::{NoteSet, VersionToken};
use crate::sync::ChangeLedger;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};

/// Everything the coordinator persists locally.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CachedSession {
    /// Local note set.
    pub notes: NoteSet,
    /// Changes not yet confirmed by the remote.
    #[serde(default)]
    pub ledger: ChangeLedger,
    /// Marker of the last successful push.
    #[serde(default)]
    pub last_version: Option<VersionToken>,
    /// When the cache was written (Unix epoch seconds).
    #[serde(default)]
    pub saved_at: u64,
}

/// Storage for [`CachedSession`].
pub trait NoteCache: Send + Sync {
    /// Loads the cached session, `None` if nothing was cached yet.
    fn load(&self) -> Result<Option<CachedSession>>;

    /// Replaces the cached session.
    fn store(&self, session: &CachedSession) -> Result<()>;
}

/// JSON file cache, replaced atomically on every write.
#[derive(Debug, Clone)]
pub struct JsonFileCache {
    path: PathBuf,
}

impl JsonFileCache {
    /// Creates a cache at `path`.
    #[must_use]
    pub fn new(path: impl AsRef<Path>) -> Self {
        Self {
            path: path.as_ref().to_path_buf(),
        }
    }

    /// Returns the cache file path.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl NoteCache for JsonFileCache {
    fn load(&self) -> Result<Option<CachedSession>> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::OperationFailed {
                    operation: "read_cache".to_string(),
                    cause: format!("{}: {e}", self.path.display()),
                });
            },
        };
        serde_json::from_str(&contents)
            .map(Some)
            .map_err(|e| Error::OperationFailed {
                operation: "parse_cache".to_string(),
                cause: format!("{}: {e}", self.path.display()),
            })
    }

    fn store(&self, session: &CachedSession) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent).map_err(|e| Error::OperationFailed {
                operation: "create_cache_dir".to_string(),
                cause: e.to_string(),
            })?;
        }
        let mut session = session.clone();
        session.saved_at = current_timestamp();
        let json = serde_json::to_string(&session).map_err(|e| Error::OperationFailed {
            operation: "serialize_cache".to_string(),
            cause: e.to_string(),
        })?;

        let temp = self.temp_path();
        fs::write(&temp, json).map_err(|e| Error::OperationFailed {
            operation: "write_cache".to_string(),
            cause: format!("{}: {e}", temp.display()),
        })?;
        fs::rename(&temp, &self.path).map_err(|e| Error::OperationFailed {
            operation: "replace_cache".to_string(),
            cause: format!("{}: {e}", self.path.display()),
        })
    }
}

/// Process-local cache, shared between coordinator instances via clones.
#[derive(Debug, Clone, Default)]
pub struct MemoryCache {
    session: Arc<Mutex<Option<CachedSession>>>,
}

impl MemoryCache {
    /// Creates an empty cache.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the stored session.
    #[must_use]
    pub fn session(&self) -> Option<CachedSession> {
        self.session
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl NoteCache for MemoryCache {
    fn load(&self) -> Result<Option<CachedSession>> {
        Ok(self.session())
    }

    fn store(&self, session: &CachedSession) -> Result<()> {
        *self.session.lock().unwrap_or_else(PoisonError::into_inner) = Some(session.clone());
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Note, NoteId};

    fn session() -> CachedSession {
        let mut ledger = ChangeLedger::new();
        ledger.record_upsert(NoteId::new("a"));
        ledger.record_delete(NoteId::new("b"));
        CachedSession {
            notes: [Note::new(NoteId::new("a"), "draft")].into_iter().collect(),
            ledger,
            last_version: Some(VersionToken::new("abc123")),
            saved_at: 0,
        }
    }

    #[test]
    fn test_missing_file_loads_none() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path().join("cache.json"));
        assert_eq!(cache.load().unwrap(), None);
    }

    #[test]
    fn test_store_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let cache = JsonFileCache::new(dir.path().join("nested").join("cache.json"));
        cache.store(&session()).unwrap();

        let loaded = cache.load().unwrap().unwrap();
        assert_eq!(loaded.notes, session().notes);
        assert_eq!(loaded.ledger, session().ledger);
        assert_eq!(loaded.last_version, session().last_version);
        assert!(loaded.saved_at > 0);
        assert!(!cache.temp_path().exists());
    }

    #[test]
    fn test_corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("cache.json");
        fs::write(&path, "{not json").unwrap();
        assert!(JsonFileCache::new(path).load().is_err());
    }

    #[test]
    fn test_memory_cache_shares_state() {
        let cache = MemoryCache::new();
        let clone = cache.clone();
        cache.store(&session()).unwrap();
        assert_eq!(clone.load().unwrap(), Some(session()));
    }
}
