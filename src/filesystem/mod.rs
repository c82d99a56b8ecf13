// src/filesystem/mod.rs

//! Filesystem helpers shared by the archive store and the conversion pipeline
//!
//! - [`path`]: sanitization of untrusted member names and plugin paths
//! - [`copy_tree`]: mirror a directory tree into a staging area
//! - [`write_atomic`]: temp-file-then-rename writes for snapshots and manifests

pub mod path;

use crate::error::Result;
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Copy every regular file under `src` into `dest`, preserving relative paths
///
/// Returns the number of files copied. Symlinks are skipped.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<usize> {
    let mut copied = 0usize;
    fs::create_dir_all(dest)?;

    for entry in WalkDir::new(src).follow_links(false) {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        let relative = match entry.path().strip_prefix(src) {
            Ok(rel) if !rel.as_os_str().is_empty() => rel,
            _ => continue,
        };
        let target = dest.join(relative);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target)?;
        } else if entry.file_type().is_file() {
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            fs::copy(entry.path(), &target)?;
            copied += 1;
        }
    }

    debug!("Copied {} files from {} to {}", copied, src.display(), dest.display());
    Ok(copied)
}

/// Write `content` to `path` via a sibling temp file and rename
pub fn write_atomic(path: &Path, content: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let temp_path = path.with_extension("tmp");
    let mut file = fs::File::create(&temp_path)?;
    file.write_all(content)?;
    file.sync_all()?;
    fs::rename(&temp_path, path)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_copy_tree_preserves_layout() {
        let src = TempDir::new().unwrap();
        let dest = TempDir::new().unwrap();
        fs::create_dir_all(src.path().join("mods.d")).unwrap();
        fs::write(src.path().join("mods.d/kjv.conf"), "[KJV]\n").unwrap();
        fs::write(src.path().join("readme.txt"), "hello").unwrap();

        let copied = copy_tree(src.path(), &dest.path().join("out")).unwrap();
        assert_eq!(copied, 2);
        assert_eq!(
            fs::read_to_string(dest.path().join("out/mods.d/kjv.conf")).unwrap(),
            "[KJV]\n"
        );
    }

    #[test]
    fn test_write_atomic_replaces() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("snapshot.json");
        write_atomic(&path, b"one").unwrap();
        write_atomic(&path, b"two").unwrap();
        assert_eq!(fs::read(&path).unwrap(), b"two");
        assert!(!dir.path().join("snapshot.tmp").exists());
    }
}
