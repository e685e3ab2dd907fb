//! # File catalog
//!
//! JSON-file implementation of the store's metadata collaborator: an
//! id → relative-path mapping for callers that have no database at hand.
//!
//! ## Features
//! - File-based locking via `flock`
//! - Atomic JSON writes (write-rename pattern)
//! - Idempotent inserts: a path already mapped returns its existing id

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use casket_store::{MetadataStore, Result, StoreError};

/// Catalog format version
const CATALOG_VERSION: u32 = 1;

/// Default lock timeout
const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// One stored-file row.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CatalogEntry {
    /// Relative path inside the blob store
    pub rel: String,
    /// When this id was first handed out
    pub registered_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct CatalogFile {
    version: u32,
    next_id: u64,
    entries: BTreeMap<u64, CatalogEntry>,
}

impl Default for CatalogFile {
    fn default() -> Self {
        Self {
            version: CATALOG_VERSION,
            next_id: 0,
            entries: BTreeMap::new(),
        }
    }
}

impl CatalogFile {
    fn id_for(&self, rel: &str) -> Option<u64> {
        self.entries
            .iter()
            .find(|(_, e)| e.rel == rel)
            .map(|(&id, _)| id)
    }
}

/// File-backed id → path catalog.
#[derive(Debug, Clone)]
pub struct FileCatalog {
    path: PathBuf,
    lock_timeout: Duration,
}

impl FileCatalog {
    pub fn open(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }

    fn lock_path(&self) -> PathBuf {
        let mut os = self.path.as_os_str().to_os_string();
        os.push(".lock");
        PathBuf::from(os)
    }

    /// Acquire an exclusive lock on the catalog.
    ///
    /// The lock is held until the returned `File` is dropped.
    fn acquire_lock(&self) -> Result<File> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let lock_path = self.lock_path();
        let lock_file = File::create(&lock_path)?;

        let start = Instant::now();
        loop {
            match lock_file.try_lock_exclusive() {
                Ok(()) => return Ok(lock_file),
                Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                    if start.elapsed() >= self.lock_timeout {
                        return Err(StoreError::LockTimeout {
                            path: lock_path,
                            waited: self.lock_timeout,
                        });
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Load the catalog from disk, or start empty if not present.
    fn load(&self) -> Result<CatalogFile> {
        let file = match File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(CatalogFile::default()),
            Err(e) => return Err(e.into()),
        };
        let reader = BufReader::new(file);
        serde_json::from_reader(reader)
            .map_err(|e| StoreError::Metadata(format!("unreadable catalog {:?}: {e}", self.path)))
    }

    /// Save using the atomic write-rename pattern.
    fn save(&self, catalog: &CatalogFile) -> Result<()> {
        let tmp = self.path.with_extension("json.tmp");

        let file = File::create(&tmp)?;
        let writer = BufWriter::new(&file);
        serde_json::to_writer_pretty(writer, catalog)
            .map_err(|e| StoreError::Metadata(format!("serialize catalog: {e}")))?;
        file.sync_all()?;

        fs::rename(&tmp, &self.path)?;
        Ok(())
    }

    /// All known rows, for listing.
    pub fn entries(&self) -> Result<Vec<(u64, CatalogEntry)>> {
        let _lock = self.acquire_lock()?;
        Ok(self.load()?.entries.into_iter().collect())
    }
}

impl MetadataStore for FileCatalog {
    fn insert_if_absent(&self, rel: &str) -> Result<u64> {
        let _lock = self.acquire_lock()?;
        let mut catalog = self.load()?;

        if let Some(id) = catalog.id_for(rel) {
            return Ok(id);
        }

        catalog.next_id += 1;
        let id = catalog.next_id;
        catalog.entries.insert(
            id,
            CatalogEntry {
                rel: rel.to_string(),
                registered_at: Utc::now(),
            },
        );
        self.save(&catalog)?;
        Ok(id)
    }

    fn lookup(&self, id: u64) -> Result<Option<String>> {
        let _lock = self.acquire_lock()?;
        Ok(self.load()?.entries.get(&id).map(|e| e.rel.clone()))
    }
}
