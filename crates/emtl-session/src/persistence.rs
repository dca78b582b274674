//! Persistence backends for session records.
//!
//! The [`SessionStore`] trait keeps the manager decoupled from where records
//! live. A store is the single source of truth: the manager holds no copy
//! of its own, and a missing record is a cache miss rather than an error.

use std::collections::{BTreeSet, HashMap};
use std::fmt::Debug;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use parking_lot::RwLock;
use tempfile::NamedTempFile;
use tracing::{debug, trace};

use crate::config::resolve_storage_dir;
use crate::error::{Error, Result};
use crate::record::SessionRecord;

/// File extension of persisted records.
const RECORD_EXT: &str = "json";

/// Trait for persistence backends.
///
/// Any I/O or encode/decode failure is an [`Error::Serializer`]. A record
/// that exists but cannot be decoded must be reported as an error, never
/// as `Ok(None)`.
pub trait SessionStore: Send + Sync + Debug {
    /// Persist a record under `identity`, replacing any previous one.
    fn save(&self, identity: &str, record: &SessionRecord) -> Result<()>;

    /// Load the record for `identity`, or `Ok(None)` if there is none.
    fn load(&self, identity: &str) -> Result<Option<SessionRecord>>;

    /// Delete the record for `identity`. Returns whether one existed.
    fn delete(&self, identity: &str) -> Result<bool>;

    /// Identities that currently have a persisted record.
    fn list_identities(&self) -> Result<BTreeSet<String>>;
}

/// Shared session store for use across components.
pub type SharedSessionStore = Arc<dyn SessionStore>;

/// Reject identities that cannot safely be used as a storage key.
fn check_identity(identity: &str) -> Result<()> {
    let invalid = identity.is_empty()
        || identity.starts_with('.')
        || identity.contains(['/', '\\', '\0']);
    if invalid {
        return Err(Error::Serializer(format!(
            "invalid identity for storage: {identity:?}"
        )));
    }
    Ok(())
}

fn check_record_identity(identity: &str, record: &SessionRecord) -> Result<()> {
    if record.identity != identity {
        return Err(Error::Serializer(format!(
            "record stored for '{identity}' belongs to '{}'",
            record.identity
        )));
    }
    Ok(())
}

// ============================================================================
// FileStore
// ============================================================================

/// File-based store keeping one JSON document per identity.
#[derive(Debug, Clone)]
pub struct FileStore {
    dir: PathBuf,
}

impl FileStore {
    /// Open a store in the default location (`EMTL_STORAGE_DIR` or `~/.emtl`).
    pub fn open_default() -> Result<Self> {
        Self::open(None::<PathBuf>)
    }

    /// Open a store, creating its directory if needed.
    ///
    /// Resolution order:
    /// 1. `EMTL_STORAGE_DIR` environment variable
    /// 2. `dir`, if given
    /// 3. Default: `~/.emtl`
    pub fn open(dir: Option<impl AsRef<Path>>) -> Result<Self> {
        let dir = resolve_storage_dir(dir.as_ref().map(|d| d.as_ref()));
        Self::at(dir)
    }

    /// Open a store at exactly `dir`, ignoring the environment override.
    pub fn at(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir).map_err(|e| {
            Error::Serializer(format!(
                "failed to create storage directory '{}': {e}",
                dir.display()
            ))
        })?;
        debug!(dir = %dir.display(), "Session store opened");
        Ok(Self { dir })
    }

    /// The directory records are stored in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    fn record_path(&self, identity: &str) -> PathBuf {
        self.dir.join(format!("{identity}.{RECORD_EXT}"))
    }
}

impl SessionStore for FileStore {
    fn save(&self, identity: &str, record: &SessionRecord) -> Result<()> {
        check_identity(identity)?;
        check_record_identity(identity, record)?;

        let bytes = record.to_bytes()?;
        let path = self.record_path(identity);

        // Each save gets its own temp file beside the target, then renames it
        // into place: readers never see a torn file and concurrent writers
        // never share a temp path.
        let mut tmp = NamedTempFile::new_in(&self.dir).map_err(|e| {
            Error::Serializer(format!(
                "failed to create temp file in '{}': {e}",
                self.dir.display()
            ))
        })?;
        tmp.write_all(&bytes).map_err(|e| {
            Error::Serializer(format!("failed to write '{}': {e}", tmp.path().display()))
        })?;
        tmp.persist(&path).map_err(|e| {
            Error::Serializer(format!("failed to replace '{}': {}", path.display(), e.error))
        })?;

        trace!(identity = %identity, path = %path.display(), "Session record saved");
        Ok(())
    }

    fn load(&self, identity: &str) -> Result<Option<SessionRecord>> {
        check_identity(identity)?;
        let path = self.record_path(identity);

        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(Error::Serializer(format!(
                    "failed to read '{}': {e}",
                    path.display()
                )));
            }
        };

        let record = SessionRecord::from_bytes(&bytes)?;
        check_record_identity(identity, &record)?;
        trace!(identity = %identity, "Session record loaded");
        Ok(Some(record))
    }

    fn delete(&self, identity: &str) -> Result<bool> {
        check_identity(identity)?;
        let path = self.record_path(identity);

        match std::fs::remove_file(&path) {
            Ok(()) => {
                debug!(identity = %identity, "Session record deleted");
                Ok(true)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(false),
            Err(e) => Err(Error::Serializer(format!(
                "failed to delete '{}': {e}",
                path.display()
            ))),
        }
    }

    fn list_identities(&self) -> Result<BTreeSet<String>> {
        let entries = std::fs::read_dir(&self.dir).map_err(|e| {
            Error::Serializer(format!(
                "failed to list '{}': {e}",
                self.dir.display()
            ))
        })?;

        let mut identities = BTreeSet::new();
        for entry in entries {
            let entry = entry.map_err(|e| Error::Serializer(e.to_string()))?;
            let path = entry.path();
            if path.extension().and_then(|e| e.to_str()) != Some(RECORD_EXT) {
                continue;
            }
            let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                continue;
            };
            if check_identity(stem).is_ok() {
                identities.insert(stem.to_string());
            }
        }
        Ok(identities)
    }
}

// ============================================================================
// MemoryStore
// ============================================================================

/// In-memory store.
///
/// Records are kept in their encoded form so decode failures behave the
/// same as with [`FileStore`].
#[derive(Debug, Default)]
pub struct MemoryStore {
    records: RwLock<HashMap<String, Vec<u8>>>,
    save_count: AtomicUsize,
}

impl MemoryStore {
    /// Create an empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful saves so far.
    pub fn save_count(&self) -> usize {
        self.save_count.load(Ordering::SeqCst)
    }

    /// Overwrite the raw bytes stored for `identity`.
    pub fn put_raw(&self, identity: &str, bytes: Vec<u8>) {
        self.records.write().insert(identity.to_string(), bytes);
    }
}

impl SessionStore for MemoryStore {
    fn save(&self, identity: &str, record: &SessionRecord) -> Result<()> {
        check_identity(identity)?;
        check_record_identity(identity, record)?;
        let bytes = record.to_bytes()?;
        self.records.write().insert(identity.to_string(), bytes);
        self.save_count.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self, identity: &str) -> Result<Option<SessionRecord>> {
        check_identity(identity)?;
        let records = self.records.read();
        match records.get(identity) {
            Some(bytes) => {
                let record = SessionRecord::from_bytes(bytes)?;
                check_record_identity(identity, &record)?;
                Ok(Some(record))
            }
            None => Ok(None),
        }
    }

    fn delete(&self, identity: &str) -> Result<bool> {
        check_identity(identity)?;
        Ok(self.records.write().remove(identity).is_some())
    }

    fn list_identities(&self) -> Result<BTreeSet<String>> {
        Ok(self.records.read().keys().cloned().collect())
    }
}
