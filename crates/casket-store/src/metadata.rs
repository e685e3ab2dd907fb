//! Seam for the external metadata collaborator.

use std::collections::BTreeMap;
use std::sync::Mutex;

use crate::Result;

/// Minimal id → relative-path mapping persisted by the store's callers.
///
/// The store never assumes a particular storage technology behind this;
/// it only requires an idempotent insert and a point lookup. Many ids may
/// map to the same path (one per logical owner of deduplicated content).
pub trait MetadataStore {
    /// Map `rel` to an id, returning the existing id when the path is
    /// already known rather than erroring.
    fn insert_if_absent(&self, rel: &str) -> Result<u64>;

    /// Look up the relative path stored under `id`.
    fn lookup(&self, id: u64) -> Result<Option<String>>;
}

/// In-memory catalog for tests and embedding callers.
#[derive(Debug, Default)]
pub struct MemoryCatalog {
    inner: Mutex<Inner>,
}

#[derive(Debug, Default)]
struct Inner {
    next_id: u64,
    by_id: BTreeMap<u64, String>,
    by_rel: BTreeMap<String, u64>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }
}

impl MetadataStore for MemoryCatalog {
    fn insert_if_absent(&self, rel: &str) -> Result<u64> {
        let mut inner = self.inner.lock().unwrap();
        if let Some(&id) = inner.by_rel.get(rel) {
            return Ok(id);
        }
        inner.next_id += 1;
        let id = inner.next_id;
        inner.by_id.insert(id, rel.to_string());
        inner.by_rel.insert(rel.to_string(), id);
        Ok(id)
    }

    fn lookup(&self, id: u64) -> Result<Option<String>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner.by_id.get(&id).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_insert_is_idempotent() {
        let catalog = MemoryCatalog::new();
        let a = catalog.insert_if_absent("ab/cd/x.png").unwrap();
        let b = catalog.insert_if_absent("ab/cd/x.png").unwrap();
        assert_eq!(a, b);

        let c = catalog.insert_if_absent("ab/cd/y.png").unwrap();
        assert_ne!(a, c);
    }

    #[test]
    fn test_lookup() {
        let catalog = MemoryCatalog::new();
        let id = catalog.insert_if_absent("ab/cd/x.png").unwrap();
        assert_eq!(catalog.lookup(id).unwrap().as_deref(), Some("ab/cd/x.png"));
        assert_eq!(catalog.lookup(id + 100).unwrap(), None);
    }
}
