//! # casket-store
//!
//! Content-addressed, reference-counted blob storage.
//!
//! Callers hand the store an arbitrary source file; identical content is
//! stored exactly once under a stable, shard-friendly path, a per-blob
//! ledger tracks how many logical owners reference the content, and the
//! bytes are erased only when the last owner releases them.
//!
//! ## Directory layout
//!
//! ```text
//! <primary>/
//! └── ab/
//!     └── cd/
//!         ├── <rest-of-hash>.png          # canonical blob (BLAKE3-addressed)
//!         ├── <rest-of-hash>.png.ref      # reference record sidecar
//!         └── <rest-of-hash>.png.ref.lock # advisory lock guarding the sidecar
//! ```
//!
//! A second, read-only fallback root serves content that predates a storage
//! migration; see [`TierLayout`].

pub mod addressing;
mod ingest;
pub mod ledger;
pub mod metadata;
mod reclaim;
pub mod tiering;

pub use ingest::StagedUpload;
pub use ledger::{Attach, Detach, RefLedger, RefRecord, DEFAULT_LOCK_TIMEOUT};
pub use metadata::{MemoryCatalog, MetadataStore};
pub use tiering::TierLayout;

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

/// Errors that can occur during store operations.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("blob not found: {rel}")]
    NotFound { rel: String },

    #[error("ledger lock still busy after {waited:?}: {path}")]
    LockTimeout { path: PathBuf, waited: Duration },

    #[error("unreadable reference record at {path}: {source}")]
    CorruptLedger {
        path: PathBuf,
        source: serde_json::Error,
    },

    #[error("alias path already taken: {path}")]
    AliasCollision { path: PathBuf },

    #[error("metadata catalog: {0}")]
    Metadata(String),
}

pub type Result<T> = std::result::Result<T, StoreError>;

/// Everything the store needs, injected explicitly — no ambient globals.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    /// Primary tier root (reads preferred, all writes).
    pub primary: PathBuf,
    /// Fallback tier root (read-only legacy content).
    pub fallback: PathBuf,
    /// Display-extension allow-list; immutable after startup.
    pub allowed_extensions: Vec<String>,
    /// Substitute for missing or unlisted extensions.
    pub default_extension: String,
    /// Public URL prefix for display URLs, when one exists.
    pub url_prefix: Option<String>,
    /// Bound on sidecar lock waits.
    pub lock_timeout: Duration,
}

impl StoreOptions {
    /// Options with the stock allow-list and default lock bound.
    pub fn new(primary: impl Into<PathBuf>, fallback: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            fallback: fallback.into(),
            allowed_extensions: addressing::default_allow_list(),
            default_extension: addressing::SAFE_EXTENSION.to_string(),
            url_prefix: None,
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
        }
    }
}

/// Aggregate numbers over the primary tier.
#[derive(Debug, Clone, Default)]
pub struct StoreStats {
    /// Unique blobs stored (sidecars and lock files excluded).
    pub blob_count: u64,
    /// Total deduplicated bytes.
    pub total_bytes: u64,
}

/// Content-addressed blob store facade.
#[derive(Debug)]
pub struct BlobStore {
    layout: TierLayout,
    ledger: RefLedger,
    allowed: Vec<String>,
    default_ext: String,
    url_prefix: Option<String>,
}

impl BlobStore {
    /// Open a store, creating the primary root if needed. The fallback root
    /// is never created: absent means no legacy tier.
    pub fn new(options: StoreOptions) -> Result<Self> {
        fs::create_dir_all(&options.primary)?;
        Ok(Self {
            layout: TierLayout::new(options.primary, options.fallback),
            ledger: RefLedger::new(options.lock_timeout),
            allowed: options.allowed_extensions,
            default_ext: options.default_extension,
            url_prefix: options.url_prefix,
        })
    }

    /// Stage a source file: hash it and derive its addressing without
    /// touching the store. `display_name` is only consulted for the
    /// extension; it defaults to the source's file name.
    pub fn stage(
        &self,
        source: impl AsRef<Path>,
        display_name: Option<&str>,
        with_alias: bool,
    ) -> Result<StagedUpload> {
        let source = source.as_ref();
        let name = display_name
            .map(str::to_string)
            .or_else(|| source.file_name().map(|n| n.to_string_lossy().into_owned()))
            .unwrap_or_default();

        let ext = addressing::parse_extension(&name, &self.allowed, &self.default_ext);
        let hash = addressing::hash_file(source)?;
        let canonical = addressing::canonical_rel(&hash, &ext);
        let alias = with_alias.then(|| addressing::alias_rel(&hash, &ext));
        Ok(StagedUpload::new(source.to_path_buf(), ext, canonical, alias))
    }

    /// Publish a staged upload under the given invoker token.
    pub fn publish(&self, upload: &mut StagedUpload, token: &str) -> Result<String> {
        upload
            .publish(&self.layout, &self.ledger, token)
            .map(str::to_string)
    }

    /// Stage and publish in one call; returns the stored relative path.
    pub fn store(&self, source: impl AsRef<Path>, token: &str) -> Result<String> {
        self.store_named(source, None, token)
    }

    /// Like [`store`](Self::store), with a caller-asserted display name used
    /// only to pick the extension.
    pub fn store_named(
        &self,
        source: impl AsRef<Path>,
        name: Option<&str>,
        token: &str,
    ) -> Result<String> {
        let mut staged = self.stage(source, name, false)?;
        self.publish(&mut staged, token)
    }

    /// Store and hand back a unique-looking alias path hard-linked to the
    /// deduplicated blob, for callers that need a distinct logical name per
    /// upload.
    pub fn store_with_alias(
        &self,
        source: impl AsRef<Path>,
        name: Option<&str>,
        token: &str,
    ) -> Result<String> {
        let mut staged = self.stage(source, name, true)?;
        self.publish(&mut staged, token)
    }

    /// Read a stored blob's bytes.
    pub fn fetch(&self, rel: &str) -> Result<Vec<u8>> {
        let path = self.layout.resolve_read(rel);
        if !path.is_file() {
            return Err(StoreError::NotFound {
                rel: rel.to_string(),
            });
        }
        Ok(fs::read(path)?)
    }

    /// Whether `rel` resolves to stored content in either tier.
    pub fn exists(&self, rel: &str) -> bool {
        self.layout.resolve_read(rel).is_file()
    }

    /// Size in bytes of a stored blob.
    pub fn size(&self, rel: &str) -> Result<u64> {
        let path = self.layout.resolve_read(rel);
        match fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(meta.len()),
            Ok(_) | Err(_) => Err(StoreError::NotFound {
                rel: rel.to_string(),
            }),
        }
    }

    /// Release the claim `token` holds on `rel`; `true` when this call
    /// erased the blob.
    pub fn release(&self, rel: &str, token: &str) -> Result<bool> {
        reclaim::release(&self.layout, &self.ledger, rel, token)
    }

    /// Create a ledger record for a blob that predates the ledger. Errors
    /// when `rel` resolves to nothing; `Ok(false)` when a record already
    /// exists. A dotted legacy name that is not hard-linked to a canonical
    /// sibling is adopted at its own path.
    pub fn adopt(&self, rel: &str, token: &str) -> Result<bool> {
        let (blob, _alias) = reclaim::ledger_anchor(&self.layout, rel);
        if !blob.is_file() {
            return Err(StoreError::NotFound {
                rel: rel.to_string(),
            });
        }
        self.ledger.adopt(&blob, token)
    }

    /// Current owner count for `rel`'s blob, if a record exists.
    pub fn ref_count(&self, rel: &str) -> Result<Option<u64>> {
        let (blob, _alias) = reclaim::ledger_anchor(&self.layout, rel);
        Ok(self.ledger.peek(&blob)?.map(|r| r.count))
    }

    /// Display URL for a stored path, when a prefix is configured.
    pub fn url(&self, rel: &str) -> Option<String> {
        self.url_prefix.as_deref().map(|p| build_url(p, rel))
    }

    /// Walk the primary tier's two-level shard structure and count blobs.
    /// Alias hard links share their blob's inode and are not counted again.
    pub fn stats(&self) -> Result<StoreStats> {
        let mut stats = StoreStats::default();
        let root = self.layout.primary();
        if !root.is_dir() {
            return Ok(stats);
        }

        #[cfg(unix)]
        let mut seen = std::collections::HashSet::new();

        for l1 in fs::read_dir(root)? {
            let l1 = l1?;
            if !l1.file_type()?.is_dir() {
                continue;
            }
            for l2 in fs::read_dir(l1.path())? {
                let l2 = l2?;
                if !l2.file_type()?.is_dir() {
                    continue;
                }
                for entry in fs::read_dir(l2.path())? {
                    let entry = entry?;
                    if !entry.file_type()?.is_file() {
                        continue;
                    }
                    let name = entry.file_name();
                    let name = name.to_string_lossy();
                    if name.ends_with(".ref") || name.ends_with(".lock") || name.ends_with(".tmp")
                    {
                        continue;
                    }
                    let meta = entry.metadata()?;
                    #[cfg(unix)]
                    {
                        use std::os::unix::fs::MetadataExt;
                        if !seen.insert((meta.dev(), meta.ino())) {
                            continue;
                        }
                    }
                    stats.blob_count += 1;
                    stats.total_bytes += meta.len();
                }
            }
        }
        Ok(stats)
    }

    pub fn layout(&self) -> &TierLayout {
        &self.layout
    }
}

/// Join a public URL prefix and a stored relative path.
pub fn build_url(prefix: &str, rel: &str) -> String {
    format!("{}/{}", prefix.trim_end_matches('/'), rel)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_joins_cleanly() {
        assert_eq!(
            build_url("https://files.example.com/", "ab/cd/x.png"),
            "https://files.example.com/ab/cd/x.png"
        );
        assert_eq!(
            build_url("https://files.example.com", "ab/cd/x.png"),
            "https://files.example.com/ab/cd/x.png"
        );
    }
}
