//! Two-tier path resolution.

use std::path::{Path, PathBuf};

/// Directory roots consulted in read-preference order.
///
/// Reads prefer the primary tier and fall back to the archival tier for
/// content that predates a storage migration; writes always target the
/// primary tier. A path present in neither tier resolves speculatively to
/// its primary location so the caller may create it there.
#[derive(Debug, Clone)]
pub struct TierLayout {
    primary: PathBuf,
    fallback: PathBuf,
}

impl TierLayout {
    pub fn new(primary: impl Into<PathBuf>, fallback: impl Into<PathBuf>) -> Self {
        Self {
            primary: primary.into(),
            fallback: fallback.into(),
        }
    }

    /// Primary tier root.
    pub fn primary(&self) -> &Path {
        &self.primary
    }

    /// Fallback tier root.
    pub fn fallback(&self) -> &Path {
        &self.fallback
    }

    /// Locate existing content: primary tier first, then fallback, then the
    /// primary path speculatively.
    pub fn resolve_read(&self, rel: &str) -> PathBuf {
        let primary = self.primary.join(rel);
        if primary.is_file() {
            return primary;
        }
        let fallback = self.fallback.join(rel);
        if fallback.is_file() {
            return fallback;
        }
        primary
    }

    /// Target for new content; always the primary tier.
    pub fn resolve_write(&self, rel: &str) -> PathBuf {
        self.primary.join(rel)
    }
}
