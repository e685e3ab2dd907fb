//! Ingestion: publish a staged source file into its content-addressed slot.

use std::fs::{self, File};
use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::ledger::{RefLedger, RefRecord};
use crate::tiering::TierLayout;
use crate::{Result, StoreError};

/// One upload attempt (the store's logical handle).
///
/// Holds the staged source and its resolved addressing. `publish` is
/// one-shot per handle; repeated calls on a published handle are no-ops, and
/// a failed call leaves the handle unpublished and safe to retry.
#[derive(Debug)]
pub struct StagedUpload {
    source: PathBuf,
    extension: String,
    canonical: String,
    alias: Option<String>,
    published: bool,
}

impl StagedUpload {
    pub(crate) fn new(
        source: PathBuf,
        extension: String,
        canonical: String,
        alias: Option<String>,
    ) -> Self {
        Self {
            source,
            extension,
            canonical,
            alias,
            published: false,
        }
    }

    /// Canonical (content-only) relative path; the dedup key.
    pub fn canonical_rel(&self) -> &str {
        &self.canonical
    }

    /// The relative path this upload is known by: the alias when one was
    /// requested, the canonical path otherwise.
    pub fn rel(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.canonical)
    }

    /// Validated display extension.
    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn is_published(&self) -> bool {
        self.published
    }

    /// Publish the staged source under the given invoker token, returning
    /// the relative path the caller should record.
    ///
    /// Exactly one concurrent caller becomes the first writer for a given
    /// content; everyone else lands on the increment path. Placement and
    /// record initialization happen inside one critical section, so no
    /// caller can observe a blob without a record once the lock is free.
    pub fn publish(
        &mut self,
        layout: &TierLayout,
        ledger: &RefLedger,
        token: &str,
    ) -> Result<&str> {
        if self.published {
            return Ok(self.rel());
        }
        if !self.source.is_file() {
            return Err(StoreError::Io(io::Error::new(
                io::ErrorKind::NotFound,
                format!("upload source missing: {}", self.source.display()),
            )));
        }

        let target = layout.resolve_write(&self.canonical);
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        let _lock = ledger.acquire(&target)?;
        if target.is_file() {
            // Content already present: count the owner first, and discard
            // the redundant source only once the record mutation has landed.
            // A failed attach leaves the source intact for the retry.
            debug!(rel = %self.canonical, "content already stored, counting owner");
            ledger.attach_locked(&target, token)?;
            fs::remove_file(&self.source)?;
        } else {
            move_into_place(&self.source, &target)?;
            ledger.save(&target, &RefRecord::fresh(token))?;
            debug!(rel = %self.canonical, "published new blob");
        }

        if let Some(alias) = self.alias.as_deref() {
            let alias_abs = layout.resolve_write(alias);
            link_alias(&target, &alias_abs)?;
        }

        self.published = true;
        Ok(self.rel())
    }
}

/// Move the source into the store, staying atomic at the destination.
///
/// `rename` when source and destination share a filesystem. A cross-device
/// source is copied to a temp file inside the destination shard directory,
/// synced, renamed over, and then removed.
fn move_into_place(source: &Path, target: &Path) -> Result<()> {
    let rename_err = match fs::rename(source, target) {
        Ok(()) => return Ok(()),
        Err(e) => e,
    };
    if !source.is_file() {
        return Err(rename_err.into());
    }

    let tmp = {
        let mut os = target.as_os_str().to_os_string();
        os.push(&format!(".{}.tmp", std::process::id()));
        PathBuf::from(os)
    };

    let mut reader = File::open(source)?;
    let out = File::create(&tmp)?;
    let mut writer = io::BufWriter::new(&out);
    io::copy(&mut reader, &mut writer)?;
    drop(writer);
    out.sync_all()?;

    if let Err(e) = fs::rename(&tmp, target) {
        let _ = fs::remove_file(&tmp);
        return Err(e.into());
    }
    fs::remove_file(source)?;
    Ok(())
}

/// Hard-link the canonical blob to its per-upload alias name. The alias
/// shares the blob's bytes without duplicating storage; counting stays
/// anchored to the canonical record.
fn link_alias(canonical: &Path, alias: &Path) -> Result<()> {
    match fs::hard_link(canonical, alias) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::AlreadyExists => Err(StoreError::AliasCollision {
            path: alias.to_path_buf(),
        }),
        Err(e) => Err(e.into()),
    }
}
