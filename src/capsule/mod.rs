// src/capsule/mod.rs

//! Capsule archives
//!
//! A capsule is one `.tar`, `.tar.gz` or `.tar.xz` file in the capsule
//! directory holding a scripture module, an optional `manifest.json`, and
//! optionally an intermediate representation (`<id>.ir.json`) or a
//! content-addressed `blobs/` tree.
//!
//! - [`id`]: capsule IDs and `-old` backup names
//! - [`manifest`]: manifest schema
//! - [`archive`]: single-pass tar stream access, extraction and packing
//! - [`cas`]: blob tree layout and verification
//! - [`ArchiveStore`]: the capsule directory service

pub mod archive;
pub mod cas;
pub mod id;
pub mod manifest;
mod store;
mod throttle;

pub use manifest::Manifest;
pub use store::ArchiveStore;
pub use throttle::{DEFAULT_ARCHIVE_CONCURRENCY, ReadPermit, ReadThrottle};

use crate::error::Result;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// A capsule file in the capsule directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CapsuleInfo {
    pub id: String,
    pub file_name: String,
    pub path: PathBuf,
    pub size: u64,
    pub modified: Option<DateTime<Utc>>,
}

impl CapsuleInfo {
    pub fn from_path(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        Ok(Self {
            id: id::capsule_id(&file_name).to_string(),
            file_name,
            path: path.to_path_buf(),
            size: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
        })
    }

    /// The `-old` copy kept by a previous rewrite
    pub fn is_backup(&self) -> bool {
        id::is_backup_name(&self.file_name)
    }
}

/// Non-manifest member of a capsule
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Artifact {
    /// Capsule-relative path
    pub id: String,
    pub size: u64,
    pub sha256: String,
}

/// Flags computed by one scan of a capsule
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MetadataFlags {
    pub is_cas: bool,
    pub has_ir: bool,
}

/// Archive read counters
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StoreStats {
    /// Archives opened for reading since the store was created
    pub archive_opens: u64,
    pub read_limit: usize,
    pub reads_available: usize,
}
