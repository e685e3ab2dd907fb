//! Per-blob reference ledger.
//!
//! Each blob carries a JSON sidecar `<blob>.ref` recording how many logical
//! owners currently reference it, plus the invoker tokens already applied in
//! either direction so a retried operation never double-counts. All record
//! mutations are serialized through an advisory `flock` on `<blob>.ref.lock`
//! and persisted with the write-to-temp-then-rename pattern, so a crash mid
//! update never leaves a torn record behind.

use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use fs2::FileExt;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{Result, StoreError};

/// Record format version for compatibility.
const RECORD_VERSION: u32 = 1;

/// Pause between lock attempts.
const LOCK_RETRY_INTERVAL: Duration = Duration::from_millis(25);

/// Default bound on lock waits.
pub const DEFAULT_LOCK_TIMEOUT: Duration = Duration::from_secs(5);

/// Persisted reference state for one blob.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RefRecord {
    /// Format version for compatibility.
    pub version: u32,
    /// Current number of logical owners. Never negative; zero only at the
    /// moment the blob is erased.
    pub count: u64,
    /// Invoker tokens that have already counted as +1.
    pub attached: BTreeSet<String>,
    /// Invoker tokens that have already counted as -1.
    pub detached: BTreeSet<String>,
    /// When the blob was first published.
    pub created_at: DateTime<Utc>,
    /// Last mutation timestamp.
    pub updated_at: DateTime<Utc>,
}

impl RefRecord {
    /// Record for a freshly published blob with one owner.
    pub fn fresh(token: &str) -> Self {
        let now = Utc::now();
        let mut attached = BTreeSet::new();
        attached.insert(token.to_string());
        Self {
            version: RECORD_VERSION,
            count: 1,
            attached,
            detached: BTreeSet::new(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// Outcome of an attach cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Attach {
    /// Token counted; new owner count.
    Counted(u64),
    /// Token was already in the attach set; count unchanged.
    Duplicate(u64),
}

impl Attach {
    pub fn count(&self) -> u64 {
        match *self {
            Attach::Counted(n) | Attach::Duplicate(n) => n,
        }
    }
}

/// Outcome of a detach cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Detach {
    /// Token was already in the detach set; nothing changed.
    Duplicate,
    /// Token counted; owners remain.
    Remaining(u64),
    /// Last owner released; blob, sidecar and record are gone.
    Drained,
    /// No record exists for this blob. Never interpreted as count zero.
    Untracked,
}

/// Ledger of per-blob reference records.
///
/// Stateless apart from the lock-wait bound; all state lives in the sidecar
/// files next to the blobs themselves.
#[derive(Debug, Clone)]
pub struct RefLedger {
    lock_timeout: Duration,
}

impl RefLedger {
    pub fn new(lock_timeout: Duration) -> Self {
        Self { lock_timeout }
    }

    /// Sidecar record path: `<blob>.ref`.
    pub fn sidecar_path(blob: &Path) -> PathBuf {
        let mut os = blob.as_os_str().to_os_string();
        os.push(".ref");
        PathBuf::from(os)
    }

    /// Advisory lock path: `<blob>.ref.lock`.
    pub fn lock_path(blob: &Path) -> PathBuf {
        let mut os = blob.as_os_str().to_os_string();
        os.push(".ref.lock");
        PathBuf::from(os)
    }

    /// Acquire the per-blob exclusive lock, bounded by the configured
    /// timeout. The lock is held until the returned `File` is dropped.
    pub fn acquire(&self, blob: &Path) -> Result<File> {
        let lock_path = Self::lock_path(blob);
        if let Some(parent) = lock_path.parent() {
            fs::create_dir_all(parent)?;
        }
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
                    std::thread::sleep(LOCK_RETRY_INTERVAL);
                }
                Err(e) => return Err(e.into()),
            }
        }
    }

    /// Read the record for a blob. Caller holds the lock.
    ///
    /// An absent sidecar is `None`. An unparsable sidecar is surfaced as
    /// [`StoreError::CorruptLedger`] — misreading it as count zero could
    /// erase a still-referenced blob.
    pub fn load(&self, blob: &Path) -> Result<Option<RefRecord>> {
        let path = Self::sidecar_path(blob);
        let data = match fs::read(&path) {
            Ok(d) => d,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        serde_json::from_slice(&data)
            .map(Some)
            .map_err(|source| StoreError::CorruptLedger { path, source })
    }

    /// Persist a record atomically (temp file + sync + rename). Caller holds
    /// the lock.
    pub fn save(&self, blob: &Path, record: &RefRecord) -> Result<()> {
        let path = Self::sidecar_path(blob);
        let tmp = {
            let mut os = blob.as_os_str().to_os_string();
            os.push(&format!(".ref.{}.tmp", std::process::id()));
            PathBuf::from(os)
        };

        let file = File::create(&tmp)?;
        serde_json::to_writer_pretty(&file, record)
            .map_err(|e| StoreError::Io(io::Error::other(e)))?;
        file.sync_all()?;
        fs::rename(&tmp, &path)?;
        Ok(())
    }

    /// Count one owner for a blob, creating the record if absent.
    pub fn attach(&self, blob: &Path, token: &str) -> Result<Attach> {
        let _lock = self.acquire(blob)?;
        self.attach_locked(blob, token)
    }

    /// Attach cycle for callers already inside the blob's critical section.
    pub(crate) fn attach_locked(&self, blob: &Path, token: &str) -> Result<Attach> {
        match self.load(blob)? {
            None => {
                // Blob placed but record never written (crash window, or
                // content that predates the ledger): whoever reaches the
                // lock next creates the record.
                self.save(blob, &RefRecord::fresh(token))?;
                Ok(Attach::Counted(1))
            }
            Some(mut record) => {
                if record.attached.contains(token) {
                    debug!(token, blob = %blob.display(), "attach token already counted");
                    return Ok(Attach::Duplicate(record.count));
                }
                record.attached.insert(token.to_string());
                record.count += 1;
                record.updated_at = Utc::now();
                self.save(blob, &record)?;
                Ok(Attach::Counted(record.count))
            }
        }
    }

    /// Release one owner. At count zero the blob and its sidecar are erased
    /// inside the same critical section.
    ///
    /// The lock file itself stays behind: unlinking it would let a caller
    /// already waiting on the old inode and a newcomer creating a fresh file
    /// hold "exclusive" locks simultaneously.
    pub fn detach(&self, blob: &Path, token: &str) -> Result<Detach> {
        let _lock = self.acquire(blob)?;
        let mut record = match self.load(blob)? {
            Some(r) => r,
            None => return Ok(Detach::Untracked),
        };

        if record.detached.contains(token) {
            debug!(token, blob = %blob.display(), "detach token already counted");
            return Ok(Detach::Duplicate);
        }

        record.detached.insert(token.to_string());
        record.count = record.count.saturating_sub(1);
        record.updated_at = Utc::now();

        if record.count == 0 {
            match fs::remove_file(blob) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            match fs::remove_file(Self::sidecar_path(blob)) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
            return Ok(Detach::Drained);
        }

        self.save(blob, &record)?;
        Ok(Detach::Remaining(record.count))
    }

    /// Create a count-1 record for a blob that predates the ledger, making
    /// it reclaimable through the normal release path. Returns `false` when
    /// a record already exists.
    pub fn adopt(&self, blob: &Path, token: &str) -> Result<bool> {
        let _lock = self.acquire(blob)?;
        if self.load(blob)?.is_some() {
            return Ok(false);
        }
        self.save(blob, &RefRecord::fresh(token))?;
        Ok(true)
    }

    /// Read-only snapshot of a blob's record; still takes the lock so a
    /// concurrent writer's half-finished cycle is never observed.
    pub fn peek(&self, blob: &Path) -> Result<Option<RefRecord>> {
        let _lock = self.acquire(blob)?;
        self.load(blob)
    }
}

impl Default for RefLedger {
    fn default() -> Self {
        Self::new(DEFAULT_LOCK_TIMEOUT)
    }
}
