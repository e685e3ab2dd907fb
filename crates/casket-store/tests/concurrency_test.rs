//! Concurrent publishes and releases of identical content.

use std::fs;
use std::sync::Arc;
use std::thread;

use casket_store::{BlobStore, StoreOptions};
use tempfile::TempDir;

const WRITERS: usize = 8;

#[test]
fn test_concurrent_stores_of_identical_content() {
    let root = TempDir::new().unwrap();
    let scratch = root.path().join("scratch");
    fs::create_dir_all(&scratch).unwrap();

    let store = Arc::new(
        BlobStore::new(StoreOptions::new(
            root.path().join("primary"),
            root.path().join("archive"),
        ))
        .unwrap(),
    );

    // Each writer gets its own copy of the same bytes (publish consumes the
    // source) and its own invoker token.
    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let source = scratch.join(format!("upload-{i}.txt"));
        fs::write(&source, b"contended content").unwrap();
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            store.store(&source, &format!("req-{i}")).unwrap()
        }));
    }

    let rels: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    // Everyone resolved to the same canonical path.
    for rel in &rels {
        assert_eq!(rel, &rels[0]);
    }

    // Exactly one physical blob, counted once per distinct token.
    let stats = store.stats().unwrap();
    assert_eq!(stats.blob_count, 1);
    assert_eq!(store.ref_count(&rels[0]).unwrap(), Some(WRITERS as u64));

    // Drain it from as many threads.
    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let store = Arc::clone(&store);
        let rel = rels[0].clone();
        handles.push(thread::spawn(move || {
            store.release(&rel, &format!("req-{i}")).unwrap()
        }));
    }
    let deletions: Vec<bool> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(
        deletions.iter().filter(|d| **d).count(),
        1,
        "exactly one release observes the drain"
    );
    assert!(!store.exists(&rels[0]));
    assert_eq!(store.stats().unwrap().blob_count, 0);
}

#[test]
fn test_concurrent_retries_of_one_token_count_once() {
    let root = TempDir::new().unwrap();
    let scratch = root.path().join("scratch");
    fs::create_dir_all(&scratch).unwrap();

    let store = Arc::new(
        BlobStore::new(StoreOptions::new(
            root.path().join("primary"),
            root.path().join("archive"),
        ))
        .unwrap(),
    );

    // Simulated retry storm: same logical operation, same token.
    let mut handles = Vec::new();
    for i in 0..WRITERS {
        let source = scratch.join(format!("retry-{i}.txt"));
        fs::write(&source, b"retried once").unwrap();
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            store.store(&source, "req-retried").unwrap()
        }));
    }
    let rels: Vec<String> = handles.into_iter().map(|h| h.join().unwrap()).collect();

    assert_eq!(store.ref_count(&rels[0]).unwrap(), Some(1));
    assert!(store.release(&rels[0], "req-retried").unwrap());
}
