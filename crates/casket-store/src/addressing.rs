//! Content addressing: hashing, shard paths, extension validation.
//!
//! A blob's canonical relative path is derived from the BLAKE3 hash of its
//! full byte stream: `ab/cd/<rest>.<ext>`, where `ab` and `cd` are the first
//! two hex-character pairs of the digest. Identical content with an identical
//! extension always yields the identical canonical path; that path is the
//! dedup key for the whole store.

use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

/// BLAKE3 content hash (32 bytes).
pub type ContentHash = [u8; 32];

/// Extensions accepted for display purposes; anything else routes to the
/// safe default. The list is fixed at startup and never mutated.
pub const DEFAULT_ALLOWED_EXTENSIONS: &[&str] = &[
    "gif", "png", "jpg", "jpeg", // images
    "doc", "docx", "xls", "xlsx", "ppt", "pptx", "rtf", "pdf", // documents
    "mp3", "csv", "txt", "zip",
];

/// Fallback extension for missing or unlisted suffixes.
pub const SAFE_EXTENSION: &str = "bin";

/// Stock allow-list as owned strings, for configuration defaults.
pub fn default_allow_list() -> Vec<String> {
    DEFAULT_ALLOWED_EXTENSIONS
        .iter()
        .map(|e| e.to_string())
        .collect()
}

/// Hash a file's full byte stream.
pub fn hash_file(path: &Path) -> io::Result<ContentHash> {
    let mut file = File::open(path)?;
    let mut hasher = blake3::Hasher::new();
    let mut buf = [0u8; 64 * 1024];
    loop {
        let n = file.read(&mut buf)?;
        if n == 0 {
            break;
        }
        hasher.update(&buf[..n]);
    }
    Ok(*hasher.finalize().as_bytes())
}

/// Convert a hash to its hex string representation.
#[inline]
pub fn hash_to_hex(hash: &ContentHash) -> String {
    hex::encode(hash)
}

/// Pick the display extension for a caller-supplied name.
///
/// Lowercased final dot-suffix if it is on the allow-list; otherwise the
/// default. Caller-supplied names are never trusted beyond this — an
/// unsupported suffix is a silent fallback, not an error.
pub fn parse_extension(name: &str, allowed: &[String], default: &str) -> String {
    let base = Path::new(name)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();

    match base.rsplit_once('.') {
        Some((stem, suffix)) if !stem.is_empty() && !suffix.is_empty() => {
            let ext = suffix.to_ascii_lowercase();
            if allowed.iter().any(|a| a == &ext) {
                ext
            } else {
                default.to_string()
            }
        }
        _ => default.to_string(),
    }
}

/// Build the canonical relative path for a hash and extension.
///
/// Layout: `ab/cd/<remaining 60 hex chars>.<ext>`.
pub fn canonical_rel(hash: &ContentHash, ext: &str) -> String {
    let hex = hash_to_hex(hash);
    format!("{}/{}/{}.{}", &hex[..2], &hex[2..4], &hex[4..], ext)
}

/// Build a per-upload alias path sharing the canonical blob's shard dirs.
///
/// The middle component keeps the name unique per upload while the stem
/// still identifies the underlying blob.
pub fn alias_rel(hash: &ContentHash, ext: &str) -> String {
    let hex = hash_to_hex(hash);
    let tag = uuid::Uuid::new_v4().simple().to_string();
    format!("{}/{}/{}.{}.{}", &hex[..2], &hex[2..4], &hex[4..], tag, ext)
}

/// Map a relative path back to its canonical sibling.
///
/// Canonical filenames carry one dot (`stem.ext`), alias filenames two
/// (`stem.tag.ext`). This routes ledger operations to the canonical record
/// only; deletion eligibility is always decided by the record itself, never
/// by the shape of the name.
pub fn canonical_of(rel: &str) -> String {
    let (dir, name) = match rel.rsplit_once('/') {
        Some((d, n)) => (Some(d), n),
        None => (None, rel),
    };

    let parts: Vec<&str> = name.split('.').collect();
    let canon_name = if parts.len() >= 3 {
        format!("{}.{}", parts[0], parts[parts.len() - 1])
    } else {
        name.to_string()
    };

    match dir {
        Some(d) => format!("{}/{}", d, canon_name),
        None => canon_name,
    }
}

/// True when `rel` is a per-upload alias rather than a canonical path.
pub fn is_alias(rel: &str) -> bool {
    canonical_of(rel) != rel
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_extension_allowed() {
        let allowed = default_allow_list();
        assert_eq!(parse_extension("photo.JPG", &allowed, "bin"), "jpg");
        assert_eq!(parse_extension("report.pdf", &allowed, "bin"), "pdf");
    }

    #[test]
    fn test_parse_extension_falls_back() {
        let allowed = default_allow_list();
        assert_eq!(parse_extension("malware.exe", &allowed, "bin"), "bin");
        assert_eq!(parse_extension("nodotname", &allowed, "bin"), "bin");
        assert_eq!(parse_extension("", &allowed, "bin"), "bin");
        assert_eq!(parse_extension(".gitignore", &allowed, "bin"), "bin");
    }

    #[test]
    fn test_parse_extension_uses_basename() {
        let allowed = default_allow_list();
        assert_eq!(parse_extension("some.dir/archive.zip", &allowed, "bin"), "zip");
    }

    #[test]
    fn test_canonical_rel_is_deterministic() {
        let hash = *blake3::hash(b"same bytes").as_bytes();
        let a = canonical_rel(&hash, "png");
        let b = canonical_rel(&hash, "png");
        assert_eq!(a, b);

        let hex = hash_to_hex(&hash);
        assert_eq!(a, format!("{}/{}/{}.png", &hex[..2], &hex[2..4], &hex[4..]));
    }

    #[test]
    fn test_alias_rel_unique_same_shard() {
        let hash = *blake3::hash(b"aliased").as_bytes();
        let a = alias_rel(&hash, "txt");
        let b = alias_rel(&hash, "txt");
        assert_ne!(a, b);

        // Both live next to the canonical blob.
        let canon = canonical_rel(&hash, "txt");
        assert_eq!(canonical_of(&a), canon);
        assert_eq!(canonical_of(&b), canon);
    }

    #[test]
    fn test_canonical_of_passthrough() {
        let hash = *blake3::hash(b"plain").as_bytes();
        let canon = canonical_rel(&hash, "csv");
        assert_eq!(canonical_of(&canon), canon);
        assert!(!is_alias(&canon));
        assert!(is_alias(&alias_rel(&hash, "csv")));
    }

    #[test]
    fn test_hash_file_matches_in_memory_hash() {
        let dir = tempfile::TempDir::new().unwrap();
        let path = dir.path().join("sample.bin");
        std::fs::write(&path, b"hash me from disk").unwrap();

        let from_disk = hash_file(&path).unwrap();
        assert_eq!(from_disk, *blake3::hash(b"hash me from disk").as_bytes());
    }
}
