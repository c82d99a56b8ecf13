// src/cache/metadata.rs
//! Per-capsule metadata flags with an optional on-disk snapshot
//!
//! Scanning a capsule for CAS blobs and IR means decompressing the whole
//! archive, so the flags are remembered per path together with the file's
//! size and modification time. An entry is only trusted while both still
//! match the file on disk. The snapshot survives restarts.

use crate::capsule::{ArchiveStore, MetadataFlags};
use crate::error::Result;
use crate::filesystem::write_atomic;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::UNIX_EPOCH;
use tracing::{debug, info, warn};

/// Snapshot file format version
const SNAPSHOT_VERSION: u32 = 1;

/// File identity used to decide whether cached flags are still valid
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileStamp {
    pub size: u64,
    pub mtime_secs: u64,
    pub mtime_nanos: u32,
}

impl FileStamp {
    pub fn of(path: &Path) -> Result<Self> {
        let metadata = fs::metadata(path)?;
        let mtime = metadata
            .modified()?
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default();
        Ok(Self {
            size: metadata.len(),
            mtime_secs: mtime.as_secs(),
            mtime_nanos: mtime.subsec_nanos(),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
struct Stamped {
    stamp: FileStamp,
    flags: MetadataFlags,
}

#[derive(Debug, Serialize, Deserialize)]
struct Snapshot {
    version: u32,
    entries: BTreeMap<PathBuf, Stamped>,
}

/// Metadata flags keyed by capsule path
pub struct MetadataCache {
    entries: RwLock<HashMap<PathBuf, Stamped>>,
    snapshot: Option<PathBuf>,
    // Writers share one temp file name
    persist_lock: Mutex<()>,
    scans: AtomicU64,
}

impl MetadataCache {
    /// In-memory only
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
            snapshot: None,
            persist_lock: Mutex::new(()),
            scans: AtomicU64::new(0),
        }
    }

    /// Backed by a snapshot file, loading it if present
    ///
    /// An unreadable or foreign snapshot is ignored; it will be rewritten
    /// after the next scan.
    pub fn with_snapshot(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let mut entries = HashMap::new();
        match fs::read(&path) {
            Ok(bytes) => match serde_json::from_slice::<Snapshot>(&bytes) {
                Ok(snapshot) if snapshot.version == SNAPSHOT_VERSION => {
                    info!(
                        "Loaded {} metadata entries from {}",
                        snapshot.entries.len(),
                        path.display()
                    );
                    entries.extend(snapshot.entries);
                }
                Ok(snapshot) => {
                    warn!(
                        "Ignoring metadata snapshot {} with version {}",
                        path.display(),
                        snapshot.version
                    );
                }
                Err(e) => warn!("Ignoring unreadable metadata snapshot {}: {}", path.display(), e),
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!("Cannot read metadata snapshot {}: {}", path.display(), e),
        }
        Self {
            entries: RwLock::new(entries),
            snapshot: Some(path),
            persist_lock: Mutex::new(()),
            scans: AtomicU64::new(0),
        }
    }

    /// Cached flags for `path` if its stamp still matches
    pub fn lookup(&self, path: &Path) -> Option<MetadataFlags> {
        let stamp = FileStamp::of(path).ok()?;
        self.entries
            .read()
            .get(path)
            .filter(|cached| cached.stamp == stamp)
            .map(|cached| cached.flags)
    }

    /// Flags for one capsule, scanning if the cached entry is stale
    pub fn get(&self, store: &ArchiveStore, path: &Path) -> Result<MetadataFlags> {
        if let Some(flags) = self.lookup(path) {
            return Ok(flags);
        }
        let stamp = FileStamp::of(path)?;
        let flags = store.scan_metadata(path)?;
        self.scans.fetch_add(1, Ordering::Relaxed);
        self.entries
            .write()
            .insert(path.to_path_buf(), Stamped { stamp, flags });
        self.persist();
        Ok(flags)
    }

    /// Flags for many capsules; stale entries are scanned on a bounded pool
    ///
    /// Capsules that fail to scan are logged and left out.
    pub fn get_many(
        &self,
        store: &ArchiveStore,
        paths: &[PathBuf],
        max_workers: usize,
    ) -> BTreeMap<PathBuf, MetadataFlags> {
        let mut found = BTreeMap::new();
        let mut stale = Vec::new();
        for path in paths {
            match self.lookup(path) {
                Some(flags) => {
                    found.insert(path.clone(), flags);
                }
                None => stale.push(path.clone()),
            }
        }
        if stale.is_empty() {
            return found;
        }

        debug!("Scanning {} capsules for metadata", stale.len());
        let mut scanned = 0usize;
        for (path, result) in store.scan_metadata_batch(stale, max_workers) {
            let stamped = result.and_then(|flags| Ok(Stamped { stamp: FileStamp::of(&path)?, flags }));
            match stamped {
                Ok(stamped) => {
                    found.insert(path.clone(), stamped.flags);
                    self.entries.write().insert(path, stamped);
                    scanned += 1;
                }
                Err(e) => warn!("Failed to scan {}: {}", path.display(), e),
            }
        }
        self.scans.fetch_add(scanned as u64, Ordering::Relaxed);
        if scanned > 0 {
            self.persist();
        }
        found
    }

    pub fn invalidate(&self, path: &Path) {
        if self.entries.write().remove(path).is_some() {
            self.persist();
        }
    }

    pub fn invalidate_all(&self) {
        self.entries.write().clear();
        self.persist();
    }

    /// Archive scans performed, as opposed to cache hits
    pub fn scans(&self) -> u64 {
        self.scans.load(Ordering::Relaxed)
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Write the snapshot; failures are logged, the in-memory cache stays valid
    fn persist(&self) {
        let Some(path) = &self.snapshot else {
            return;
        };
        let snapshot = Snapshot {
            version: SNAPSHOT_VERSION,
            entries: self
                .entries
                .read()
                .iter()
                .map(|(k, v)| (k.clone(), *v))
                .collect(),
        };
        let _guard = self.persist_lock.lock();
        let written = serde_json::to_vec_pretty(&snapshot)
            .map_err(crate::Error::from)
            .and_then(|bytes| write_atomic(path, &bytes));
        if let Err(e) = written {
            warn!("Failed to write metadata snapshot {}: {}", path.display(), e);
        }
    }
}

impl Default for MetadataCache {
    fn default() -> Self {
        Self::new()
    }
}
