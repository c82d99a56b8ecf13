// src/capsule/store.rs

//! Capsule directory service
//!
//! [`ArchiveStore`] owns the capsule directory and the archive read throttle.
//! Clones share both, so a store handed to a cache builder and one held by
//! the conversion pipeline never exceed the combined ceiling.

use super::archive::{self, common_root, relative_to_root};
use super::cas;
use super::id::{backup_path, capsule_id_for_path, has_listed_extension, ids_match};
use super::manifest::Manifest;
use super::throttle::{DEFAULT_ARCHIVE_CONCURRENCY, ReadThrottle};
use super::{Artifact, CapsuleInfo, MetadataFlags, StoreStats};
use crate::compression::CompressionFormat;
use crate::error::{Error, Result};
use crate::filesystem::path::{capsule_file_name, clean_member_path};
use crate::hash::{self, HashAlgorithm};
use crate::pool::run_bounded;
use std::fs;
use std::io::Read;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tracing::{debug, error, info, warn};

/// Capsule archive store
#[derive(Clone)]
pub struct ArchiveStore {
    inner: Arc<StoreInner>,
}

struct StoreInner {
    capsules_dir: PathBuf,
    throttle: ReadThrottle,
    archive_opens: AtomicU64,
}

impl ArchiveStore {
    pub fn new(capsules_dir: impl Into<PathBuf>) -> Self {
        Self::with_concurrency(capsules_dir, DEFAULT_ARCHIVE_CONCURRENCY)
    }

    /// Store with a custom ceiling on concurrently open archives
    pub fn with_concurrency(capsules_dir: impl Into<PathBuf>, max_open: usize) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                capsules_dir: capsules_dir.into(),
                throttle: ReadThrottle::new(max_open),
                archive_opens: AtomicU64::new(0),
            }),
        }
    }

    pub fn capsules_dir(&self) -> &Path {
        &self.inner.capsules_dir
    }

    pub fn stats(&self) -> StoreStats {
        StoreStats {
            archive_opens: self.inner.archive_opens.load(Ordering::Relaxed),
            read_limit: self.inner.throttle.limit(),
            reads_available: self.inner.throttle.available(),
        }
    }

    /// Capsules in the directory, sorted by file name
    ///
    /// A missing directory is an empty listing. Subdirectories are ignored.
    pub fn list_capsules(&self) -> Result<Vec<CapsuleInfo>> {
        let dir = self.capsules_dir();
        let entries = match fs::read_dir(dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("Capsule directory {} does not exist", dir.display());
                return Ok(Vec::new());
            }
            Err(e) => return Err(e.into()),
        };

        let mut capsules = Vec::new();
        for entry in entries {
            let entry = entry?;
            let file_name = entry.file_name().to_string_lossy().into_owned();
            if !entry.file_type()?.is_file() || !has_listed_extension(&file_name) {
                continue;
            }
            capsules.push(CapsuleInfo::from_path(&entry.path())?);
        }

        capsules.sort_by(|a, b| a.file_name.cmp(&b.file_name));
        Ok(capsules)
    }

    /// Find a capsule by ID, ignoring case
    pub fn resolve(&self, id: &str) -> Result<CapsuleInfo> {
        self.list_capsules()?
            .into_iter()
            .find(|capsule| ids_match(&capsule.id, id))
            .ok_or_else(|| Error::CapsuleNotFound(id.to_string()))
    }

    /// Detect CAS layout and IR presence in one pass over the archive
    ///
    /// A top-level `blobs/` settles CAS immediately. `<root>/blobs/` only
    /// counts when `<root>` turns out to be the common root of every member,
    /// so the pass runs to the end in that case.
    pub fn scan_metadata(&self, path: &Path) -> Result<MetadataFlags> {
        let mut flags = MetadataFlags::default();
        let mut members: Vec<(PathBuf, bool)> = Vec::new();
        let mut nested_blobs: Option<String> = None;

        self.walk(path, |member, entry| {
            members.push((member.to_path_buf(), entry.header().entry_type().is_dir()));
            if !flags.is_cas {
                if archive::is_blobs_member(member, None) {
                    flags.is_cas = true;
                } else if nested_blobs.is_none()
                    && let Some(first) = archive::first_component(member)
                    && archive::is_blobs_member(member, Some(first.as_str()))
                {
                    nested_blobs = Some(first);
                }
            }
            if !flags.has_ir && archive::is_ir_member(member) {
                flags.has_ir = true;
            }
            Ok(if flags.is_cas && flags.has_ir {
                ControlFlow::Break(())
            } else {
                ControlFlow::Continue(())
            })
        })?;

        if !flags.is_cas && let Some(first) = nested_blobs {
            flags.is_cas = common_root(&members).as_deref() == Some(first.as_str());
        }
        Ok(flags)
    }

    /// Scan many capsules on a bounded pool; results come back sorted by path
    pub fn scan_metadata_batch(
        &self,
        paths: Vec<PathBuf>,
        max_workers: usize,
    ) -> Vec<(PathBuf, Result<MetadataFlags>)> {
        let mut results = run_bounded(paths, max_workers, |path| {
            let flags = self.scan_metadata(&path);
            (path, flags)
        });
        results.sort_by(|a, b| a.0.cmp(&b.0));
        results
    }

    /// Read `manifest.json`, or `None` if it is missing or unparseable
    pub fn read_manifest(&self, path: &Path) -> Result<Option<Manifest>> {
        let mut bytes = None;
        self.walk(path, |member, entry| {
            if entry.header().entry_type().is_file() && archive::is_manifest_member(member) {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                bytes = Some(buf);
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        })?;

        let Some(bytes) = bytes else {
            debug!("No manifest in {}", path.display());
            return Ok(None);
        };
        match Manifest::from_slice(&bytes) {
            Ok(manifest) => Ok(Some(manifest)),
            Err(e) => {
                warn!("Ignoring manifest in {}: {}", path.display(), e);
                Ok(None)
            }
        }
    }

    /// Every regular member except the manifest, with size and SHA-256
    pub fn list_artifacts(&self, path: &Path) -> Result<Vec<Artifact>> {
        let mut members: Vec<(PathBuf, bool)> = Vec::new();
        let mut files: Vec<(PathBuf, u64, String)> = Vec::new();

        self.walk(path, |member, entry| {
            let kind = entry.header().entry_type();
            if kind.is_dir() {
                members.push((member.to_path_buf(), true));
            } else if kind.is_file() {
                members.push((member.to_path_buf(), false));
                let (digest, size) = hash::hash_reader(HashAlgorithm::Sha256, entry)?;
                files.push((member.to_path_buf(), size, digest));
            }
            Ok(ControlFlow::Continue(()))
        })?;

        let root = common_root(&members);
        let mut artifacts: Vec<Artifact> = files
            .into_iter()
            .filter_map(|(member, size, sha256)| {
                let relative = relative_to_root(&member, root.as_deref())?;
                if relative == Path::new(super::manifest::MANIFEST_NAME) {
                    return None;
                }
                Some(Artifact {
                    id: relative.to_string_lossy().into_owned(),
                    size,
                    sha256,
                })
            })
            .collect();
        artifacts.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(artifacts)
    }

    /// Capsule-relative paths of every member, directories included
    pub fn list_members(&self, path: &Path) -> Result<Vec<String>> {
        let mut members: Vec<(PathBuf, bool)> = Vec::new();
        self.walk(path, |member, entry| {
            members.push((member.to_path_buf(), entry.header().entry_type().is_dir()));
            Ok(ControlFlow::Continue(()))
        })?;

        let root = common_root(&members);
        let mut names: Vec<String> = members
            .iter()
            .filter_map(|(member, _)| relative_to_root(member, root.as_deref()))
            .map(|p| p.to_string_lossy().into_owned())
            .collect();
        names.sort();
        names.dedup();
        Ok(names)
    }

    /// Read one member by capsule-relative path
    ///
    /// Accepts the path with or without the capsule's root directory.
    pub fn read_member(&self, path: &Path, member: &str) -> Result<Vec<u8>> {
        let wanted = clean_member_path(member)?;
        let mut found = None;

        self.walk(path, |candidate, entry| {
            if !entry.header().entry_type().is_file() {
                return Ok(ControlFlow::Continue(()));
            }
            let matches = candidate == wanted.as_path()
                || archive::strip_first(candidate).is_some_and(|rest| rest == wanted);
            if matches {
                let mut buf = Vec::new();
                entry.read_to_end(&mut buf)?;
                found = Some(buf);
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        })?;

        found.ok_or_else(|| Error::ArtifactNotFound {
            capsule: capsule_id_for_path(path),
            artifact: member.to_string(),
        })
    }

    /// Read a CAS blob from a capsule and verify its digest
    pub fn read_blob(&self, path: &Path, algorithm: HashAlgorithm, hash: &str) -> Result<Vec<u8>> {
        let hash = hash::validate_hex(algorithm, hash)
            .map_err(|e| Error::InvalidPath(format!("blob address: {}", e)))?;
        let member = cas::blob_member(algorithm, &hash);
        let content = self.read_member(path, &member.to_string_lossy())?;
        cas::verify(algorithm, &hash, &content)?;
        Ok(content)
    }

    /// Extract into `dest`, removing the capsule's root directory
    pub fn extract(&self, path: &Path, dest: &Path) -> Result<usize> {
        let _permit = self.inner.throttle.acquire();
        self.inner.archive_opens.fetch_add(1, Ordering::Relaxed);
        archive::extract(path, dest)
    }

    /// Pack `staging` into a new capsule at `dest` under `root_name/`
    pub fn create_archive(&self, staging: &Path, dest: &Path, root_name: &str) -> Result<()> {
        archive::create(staging, dest, root_name)
    }

    /// Swap `original` for a capsule built from `staging`
    ///
    /// The original is renamed to its `-old` name first and a previous
    /// backup is overwritten. If the new archive cannot be written the
    /// partial file is removed and the rename reversed before returning
    /// [`Error::CommitFailed`]. Returns the backup path on success.
    pub fn atomic_replace(&self, original: &Path, staging: &Path) -> Result<PathBuf> {
        if !original.is_file() {
            return Err(Error::CapsuleNotFound(original.display().to_string()));
        }
        CompressionFormat::from_path(original)?;

        let backup = backup_path(original);
        if backup.exists() {
            debug!("Overwriting previous backup {}", backup.display());
            fs::remove_file(&backup)?;
        }
        fs::rename(original, &backup)?;

        let root = capsule_id_for_path(original);
        match archive::create(staging, original, &root) {
            Ok(()) => {
                info!("Replaced {} (previous version at {})", original.display(), backup.display());
                Ok(backup)
            }
            Err(create_err) => {
                if original.exists()
                    && let Err(e) = fs::remove_file(original)
                {
                    warn!("Could not remove partial archive {}: {}", original.display(), e);
                }
                if let Err(restore_err) = fs::rename(&backup, original) {
                    error!(
                        "Restore of {} from {} failed: {}",
                        original.display(),
                        backup.display(),
                        restore_err
                    );
                    return Err(Error::CommitFailed {
                        path: original.to_path_buf(),
                        message: format!("{}; restore also failed: {}", create_err, restore_err),
                    });
                }
                warn!("Rolled back {} after failed commit: {}", original.display(), create_err);
                Err(Error::CommitFailed {
                    path: original.to_path_buf(),
                    message: create_err.to_string(),
                })
            }
        }
    }

    /// Copy an archive into the capsule directory
    pub fn install(&self, source: &Path) -> Result<CapsuleInfo> {
        if !source.is_file() {
            return Err(Error::NotFound(source.display().to_string()));
        }
        CompressionFormat::from_path(source)?;
        let file_name = source
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| Error::InvalidPath(source.display().to_string()))?;
        let file_name = capsule_file_name(&file_name)?;

        fs::create_dir_all(self.capsules_dir())?;
        let target = self.capsules_dir().join(&file_name);
        if target.exists() {
            info!("Overwriting installed capsule {}", file_name);
        }
        fs::copy(source, &target)?;
        info!("Installed capsule {}", file_name);
        CapsuleInfo::from_path(&target)
    }

    /// Remove a capsule by ID; returns the removed path
    pub fn delete(&self, id: &str) -> Result<PathBuf> {
        let capsule = self.resolve(id)?;
        fs::remove_file(&capsule.path)?;
        info!("Deleted capsule {}", capsule.file_name);
        Ok(capsule.path)
    }

    /// One throttled, counted pass over an archive
    fn walk<F>(&self, path: &Path, visit: F) -> Result<()>
    where
        F: FnMut(&Path, &mut tar::Entry<'_, archive::ArchiveReader>) -> Result<ControlFlow<()>>,
    {
        let _permit = self.inner.throttle.acquire();
        self.inner.archive_opens.fetch_add(1, Ordering::Relaxed);
        archive::for_each_entry(path, visit)
    }
}

impl std::fmt::Debug for ArchiveStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveStore")
            .field("capsules_dir", &self.inner.capsules_dir)
            .field("read_limit", &self.inner.throttle.limit())
            .finish()
    }
}
