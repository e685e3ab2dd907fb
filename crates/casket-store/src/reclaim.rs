//! Reclamation: release an owner's claim and erase drained blobs.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::addressing;
use crate::ledger::{Detach, RefLedger};
use crate::tiering::TierLayout;
use crate::Result;

/// Where the ledger record for `rel` lives, plus the alias link to drop
/// once the ledger has confirmed the release.
///
/// A dotted filename is treated as an alias only when it actually shares
/// its inode with the canonical sibling. Anything else is legacy content
/// under an older naming convention: it owns its bytes directly and is
/// anchored at its own path. Name shape alone never decides anything.
pub(crate) fn ledger_anchor(layout: &TierLayout, rel: &str) -> (PathBuf, Option<PathBuf>) {
    let canonical = addressing::canonical_of(rel);
    if canonical == rel {
        return (layout.resolve_read(rel), None);
    }

    let candidate = layout.resolve_read(rel);
    let canon_blob = layout.resolve_read(&canonical);
    if candidate.is_file() && !same_inode(&candidate, &canon_blob) {
        return (candidate, None);
    }
    (canon_blob, Some(candidate))
}

#[cfg(unix)]
fn same_inode(a: &Path, b: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (fs::metadata(a), fs::metadata(b)) {
        (Ok(ma), Ok(mb)) => ma.dev() == mb.dev() && ma.ino() == mb.ino(),
        _ => false,
    }
}

#[cfg(not(unix))]
fn same_inode(_a: &Path, b: &Path) -> bool {
    b.is_file()
}

/// Release the claim `token` holds on `rel`. Returns `true` only when this
/// call erased the blob (last owner released).
///
/// Idempotent per token: a token already in the detach set is a `false`
/// no-op, as is releasing a path whose record has already been drained.
/// The owner's alias link, when one exists, is unlinked only after the
/// ledger has accepted the detach.
pub(crate) fn release(
    layout: &TierLayout,
    ledger: &RefLedger,
    rel: &str,
    token: &str,
) -> Result<bool> {
    let (blob, alias) = ledger_anchor(layout, rel);

    match ledger.detach(&blob, token)? {
        Detach::Drained => {
            drop_alias(alias)?;
            debug!(rel, "last owner released, blob erased");
            Ok(true)
        }
        Detach::Remaining(count) => {
            drop_alias(alias)?;
            debug!(rel, count, "owner released, blob retained");
            Ok(false)
        }
        Detach::Duplicate => {
            // The earlier release already removed any alias link.
            drop_alias(alias)?;
            Ok(false)
        }
        Detach::Untracked => {
            if blob.is_file() {
                // Content that predates the ledger. Deletion eligibility is
                // only ever explicit via the record; run adopt to migrate.
                warn!(rel, "no reference record, refusing to delete");
            }
            Ok(false)
        }
    }
}

fn drop_alias(alias: Option<PathBuf>) -> Result<()> {
    let Some(path) = alias else {
        return Ok(());
    };
    match fs::remove_file(&path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed alias link");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, TierLayout, RefLedger) {
        let primary = TempDir::new().unwrap();
        let fallback = primary.path().join("archive");
        let layout = TierLayout::new(primary.path(), fallback);
        (primary, layout, RefLedger::default())
    }

    fn place_blob(layout: &TierLayout, rel: &str, bytes: &[u8]) -> PathBuf {
        let abs = layout.resolve_write(rel);
        fs::create_dir_all(abs.parent().unwrap()).unwrap();
        fs::write(&abs, bytes).unwrap();
        abs
    }

    #[test]
    fn test_release_without_record_refuses_deletion() {
        let (_primary, layout, ledger) = setup();
        let blob = place_blob(&layout, "ab/cd/legacy.bin", b"legacy");

        assert!(!release(&layout, &ledger, "ab/cd/legacy.bin", "t").unwrap());
        assert!(blob.exists());
    }

    #[test]
    fn test_release_of_missing_path_is_false_not_error() {
        let (_primary, layout, ledger) = setup();
        assert!(!release(&layout, &ledger, "ab/cd/gone.bin", "t").unwrap());
    }

    #[test]
    fn test_dotted_legacy_name_survives_release() {
        let (_primary, layout, ledger) = setup();
        let blob = place_blob(&layout, "ab/cd/report.2019.pdf", b"only copy");

        assert!(!release(&layout, &ledger, "ab/cd/report.2019.pdf", "tok").unwrap());
        assert!(
            blob.exists(),
            "record-less file must never be unlinked by name shape"
        );
    }

    #[test]
    fn test_dotted_legacy_is_not_mistaken_for_sibling_alias() {
        let (_primary, layout, ledger) = setup();
        let canon = place_blob(&layout, "ab/cd/report.pdf", b"tracked");
        ledger.attach(&canon, "req-1").unwrap();
        let legacy = place_blob(&layout, "ab/cd/report.2019.pdf", b"unrelated bytes");

        // Separate inode: the dotted name anchors at its own (absent) record.
        assert!(!release(&layout, &ledger, "ab/cd/report.2019.pdf", "req-2").unwrap());
        assert!(legacy.exists());

        // The sibling's record is untouched.
        let record = ledger.peek(&canon).unwrap().unwrap();
        assert_eq!(record.count, 1);
        assert!(record.detached.is_empty());
    }

    #[test]
    fn test_alias_kept_when_canonical_record_is_missing() {
        let (_primary, layout, ledger) = setup();
        let blob = place_blob(&layout, "ab/cd/stem.bin", b"bytes");
        let alias_abs = layout.resolve_write("ab/cd/stem.tag123.bin");
        fs::hard_link(&blob, &alias_abs).unwrap();

        // Genuine hard-linked alias, but no record: refuse everything.
        assert!(!release(&layout, &ledger, "ab/cd/stem.tag123.bin", "t").unwrap());
        assert!(alias_abs.exists());
        assert!(blob.exists());
    }

    #[test]
    fn test_release_counts_down_then_erases() {
        let (_primary, layout, ledger) = setup();
        let blob = place_blob(&layout, "ab/cd/shared.bin", b"shared");
        ledger.attach(&blob, "req-1").unwrap();
        ledger.attach(&blob, "req-2").unwrap();

        assert!(!release(&layout, &ledger, "ab/cd/shared.bin", "req-1").unwrap());
        assert!(blob.exists());

        assert!(release(&layout, &ledger, "ab/cd/shared.bin", "req-2").unwrap());
        assert!(!blob.exists());
        assert!(!RefLedger::sidecar_path(&blob).exists());
    }

    #[test]
    fn test_release_via_alias_unlinks_alias_after_detach() {
        let (_primary, layout, ledger) = setup();
        let blob = place_blob(&layout, "ab/cd/stem.bin", b"bytes");
        let alias_rel = "ab/cd/stem.tag123.bin";
        let alias_abs = layout.resolve_write(alias_rel);
        fs::hard_link(&blob, &alias_abs).unwrap();

        ledger.attach(&blob, "req-1").unwrap();
        ledger.attach(&blob, "req-2").unwrap();

        // Alias owner goes first: link removed, blob retained.
        assert!(!release(&layout, &ledger, alias_rel, "req-2").unwrap());
        assert!(!alias_abs.exists());
        assert!(blob.exists());

        assert!(release(&layout, &ledger, "ab/cd/stem.bin", "req-1").unwrap());
        assert!(!blob.exists());
    }
}
