// tests/capsule_store.rs
//! Archive store behavior seen from outside the crate

mod common;

use common::{build_capsule, cas_capsule, kjv_capsule};
use scriptorium::capsule::id::capsule_id;
use scriptorium::pool::{WorkerPool, run_bounded};
use scriptorium::{ArchiveStore, Error, HashAlgorithm};
use std::fs;
use tempfile::TempDir;

#[test]
fn test_ids_strip_suffixes_and_lookup_ignores_case() {
    assert_eq!(capsule_id("kjv.tar.gz"), "kjv");
    assert_eq!(capsule_id("KJV.TAR.XZ"), "KJV");
    assert_eq!(capsule_id("web.tar"), "web");

    let dir = TempDir::new().unwrap();
    kjv_capsule(dir.path());
    let store = ArchiveStore::new(dir.path());
    assert_eq!(store.resolve("KJV").unwrap().file_name, "kjv.tar.gz");
    assert!(matches!(store.resolve("web"), Err(Error::CapsuleNotFound(_))));
}

#[test]
fn test_scan_is_one_pass_and_idempotent() {
    let dir = TempDir::new().unwrap();
    let path = cas_capsule(dir.path());
    let store = ArchiveStore::new(dir.path());

    let before = store.stats().archive_opens;
    let first = store.scan_metadata(&path).unwrap();
    assert_eq!(store.stats().archive_opens, before + 1);
    let second = store.scan_metadata(&path).unwrap();
    assert_eq!(first, second);
    assert!(first.is_cas);
}

#[test]
fn test_scan_reports_cas_and_ir_together() {
    let dir = TempDir::new().unwrap();
    let content = b"In the beginning";
    let hash = scriptorium::hash::sha256(content);
    let blob = format!("blobs/sha256/{}/{}", &hash[..2], hash);
    let path = build_capsule(
        dir.path(),
        "web.tar.gz",
        "web",
        &[(blob.as_str(), content), ("web.ir.json", b"{}")],
    );
    let store = ArchiveStore::new(dir.path());

    let before = store.stats().archive_opens;
    let flags = store.scan_metadata(&path).unwrap();
    assert_eq!(store.stats().archive_opens, before + 1);
    assert!(flags.is_cas);
    assert!(flags.has_ir);
    assert_eq!(store.read_blob(&path, HashAlgorithm::Sha256, &hash).unwrap(), content);
}

#[test]
fn test_read_blob_malformed_hash_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = cas_capsule(dir.path());
    let store = ArchiveStore::new(dir.path());
    assert!(matches!(
        store.read_blob(&path, HashAlgorithm::Sha256, "€abc"),
        Err(Error::InvalidPath(_))
    ));
}

#[test]
fn test_read_manifest_absent() {
    let dir = TempDir::new().unwrap();
    let path = kjv_capsule(dir.path());
    let store = ArchiveStore::new(dir.path());
    assert!(store.read_manifest(&path).unwrap().is_none());
}

#[test]
fn test_cas_blob_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = cas_capsule(dir.path());
    let store = ArchiveStore::new(dir.path());
    let hash = scriptorium::hash::sha256(b"In the beginning");

    assert_eq!(store.read_blob(&path, HashAlgorithm::Sha256, &hash).unwrap(), b"In the beginning");
    let missing = scriptorium::hash::sha256(b"other");
    assert!(store.read_blob(&path, HashAlgorithm::Sha256, &missing).is_err());
}

#[test]
fn test_failed_replace_restores_original_bytes() {
    let dir = TempDir::new().unwrap();
    let path = build_capsule(dir.path(), "kjv.tar.xz", "kjv", &[("a.txt", b"original")]);
    let before = fs::read(&path).unwrap();
    let store = ArchiveStore::new(dir.path());

    let err = store.atomic_replace(&path, &dir.path().join("missing-staging")).unwrap_err();
    assert!(matches!(err, Error::CommitFailed { .. }));
    assert_eq!(fs::read(&path).unwrap(), before);
    assert_eq!(store.read_member(&path, "a.txt").unwrap(), b"original");
}

#[test]
fn test_worker_pool_returns_exactly_n_results() {
    let mut results = run_bounded((0..50).collect::<Vec<u32>>(), 4, |n| n * 2);
    results.sort_unstable();
    assert_eq!(results.len(), 50);
    assert_eq!(results[49], 98);

    let pool = WorkerPool::new(3, 10, |n: u32| n + 1);
    for n in 0..10 {
        pool.submit(n).unwrap();
    }
    let received: Vec<u32> = pool.close().iter().collect();
    assert_eq!(received.len(), 10);
}
