// src/capsule/cas.rs

//! Content-addressed blob trees inside capsules
//!
//! A CAS capsule stores file content under `blobs/<algorithm>/<xx>/<hash>`,
//! where `xx` is the first two hex characters of the digest. Identical
//! content is stored once. A [`BlobStore`] writes such a tree into a staging
//! directory before the capsule is packed; reading a blob back out of a
//! packed capsule goes through
//! [`ArchiveStore::read_blob`](super::ArchiveStore::read_blob).

use crate::error::{Error, Result};
use crate::filesystem::write_atomic;
use crate::hash::{self, HashAlgorithm};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::debug;

/// Top-level directory holding blob trees
pub const BLOBS_DIR: &str = "blobs";

/// Capsule-relative member path of a blob
pub fn blob_member(algorithm: HashAlgorithm, hash: &str) -> PathBuf {
    let mut path = PathBuf::from(BLOBS_DIR).join(algorithm.name());
    if let Some(prefix) = hash.get(..2) {
        path.push(prefix);
    }
    path.push(hash);
    path
}

/// Parse a capsule-relative member path back into `(algorithm, hash)`
pub fn parse_blob_member(member: &Path) -> Option<(HashAlgorithm, String)> {
    let parts: Vec<_> = member
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    match parts.as_slice() {
        [blobs, algorithm, prefix, hash] if blobs == BLOBS_DIR => {
            let algorithm: HashAlgorithm = algorithm.parse().ok()?;
            let hash = hash::validate_hex(algorithm, hash).ok()?;
            hash.starts_with(prefix.as_str()).then_some((algorithm, hash))
        }
        _ => None,
    }
}

/// Writer for a blob tree rooted in a staging directory
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
    algorithm: HashAlgorithm,
}

impl BlobStore {
    /// Blob store under `root/blobs`, SHA-256 addressed
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::with_algorithm(root, HashAlgorithm::Sha256)
    }

    pub fn with_algorithm(root: impl AsRef<Path>, algorithm: HashAlgorithm) -> Self {
        Self {
            root: root.as_ref().to_path_buf(),
            algorithm,
        }
    }

    #[inline]
    pub fn algorithm(&self) -> HashAlgorithm {
        self.algorithm
    }

    /// Absolute path of a blob in this store
    pub fn path_for(&self, hash: &str) -> PathBuf {
        self.root.join(blob_member(self.algorithm, hash))
    }

    /// Store content and return its hash; existing blobs are left alone
    pub fn store(&self, content: &[u8]) -> Result<String> {
        let hash = hash::hash_bytes(self.algorithm, content);
        let path = self.path_for(&hash);

        if path.exists() {
            debug!("Blob already present: {}", hash);
            return Ok(hash);
        }

        write_atomic(&path, content)?;
        debug!("Stored blob {} ({} bytes)", hash, content.len());
        Ok(hash)
    }

    /// Read a blob and verify its digest
    pub fn retrieve(&self, hash: &str) -> Result<Vec<u8>> {
        let path = self.path_for(hash);
        let content = fs::read(&path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                Error::NotFound(format!("blob {}", hash))
            } else {
                Error::Io(e)
            }
        })?;
        verify(self.algorithm, hash, &content)?;
        Ok(content)
    }

    pub fn exists(&self, hash: &str) -> bool {
        self.path_for(hash).exists()
    }
}

/// Check that `content` hashes to `expected`
pub fn verify(algorithm: HashAlgorithm, expected: &str, content: &[u8]) -> Result<()> {
    let actual = hash::hash_bytes(algorithm, content);
    if actual != expected.to_ascii_lowercase() {
        return Err(Error::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            format!("blob hash mismatch: expected {}, got {}", expected, actual),
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_store_and_retrieve() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path());

        let hash = store.store(b"In the beginning").unwrap();
        assert_eq!(hash.len(), 64);
        assert_eq!(store.retrieve(&hash).unwrap(), b"In the beginning");

        let on_disk = dir.path().join("blobs/sha256").join(&hash[..2]).join(&hash);
        assert!(on_disk.exists());
    }

    #[test]
    fn test_deduplication() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::with_algorithm(dir.path(), HashAlgorithm::Blake3);
        let a = store.store(b"same").unwrap();
        let b = store.store(b"same").unwrap();
        assert_eq!(a, b);
        assert!(store.exists(&a));
    }

    #[test]
    fn test_retrieve_detects_corruption() {
        let dir = TempDir::new().unwrap();
        let store = BlobStore::new(dir.path());
        let hash = store.store(b"original").unwrap();
        fs::write(store.path_for(&hash), b"tampered").unwrap();
        assert!(store.retrieve(&hash).is_err());
    }

    #[test]
    fn test_retrieve_missing() {
        let dir = TempDir::new().unwrap();
        let err = BlobStore::new(dir.path()).retrieve(&"0".repeat(64)).unwrap_err();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_parse_blob_member() {
        let hash = hash::sha256(b"x");
        let member = blob_member(HashAlgorithm::Sha256, &hash);
        assert_eq!(
            parse_blob_member(&member),
            Some((HashAlgorithm::Sha256, hash.clone()))
        );

        assert_eq!(parse_blob_member(Path::new("blobs/sha256/zz/nothex")), None);
        assert_eq!(parse_blob_member(Path::new("blobs/md5/ab/abcd")), None);
        assert_eq!(parse_blob_member(Path::new("mods.d/kjv.conf")), None);

        let wrong_prefix = PathBuf::from("blobs/sha256/ff").join(&hash);
        if !hash.starts_with("ff") {
            assert_eq!(parse_blob_member(&wrong_prefix), None);
        }
    }
}
