// src/capsule/archive.rs

//! Tar stream access for capsule archives
//!
//! Every function here makes exactly one pass over the archive. Member paths
//! are sanitized before use; entries that try to escape via `..` are skipped
//! with a warning rather than failing the whole read.
//!
//! Capsules are normally laid out under a single root directory
//! (`kjv/manifest.json`, `kjv/mods.d/kjv.conf`). The capsule-relative path of
//! a member is its path with that shared root removed. Flat archives with no
//! common root keep their paths unchanged.

use crate::compression::{CompressionFormat, Encoder, create_decoder};
use crate::error::{Error, Result};
use crate::filesystem::path::{clean_member_path, join_member};
use std::collections::BTreeSet;
use std::fs::{self, File};
use std::io::{BufReader, BufWriter, Read};
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use walkdir::WalkDir;

/// Reader type of an open capsule stream
pub type ArchiveReader = Box<dyn Read>;

/// Open a capsule as a tar stream, choosing the decoder from its suffix
pub fn open(path: &Path) -> Result<tar::Archive<ArchiveReader>> {
    let format = CompressionFormat::from_path(path)?;
    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            Error::CapsuleNotFound(path.display().to_string())
        } else {
            Error::Io(e)
        }
    })?;
    Ok(tar::Archive::new(create_decoder(BufReader::new(file), format)))
}

/// Visit every entry once, in archive order
///
/// The callback receives the sanitized archive path. Returning
/// `ControlFlow::Break` stops the pass early.
pub fn for_each_entry<F>(path: &Path, mut visit: F) -> Result<()>
where
    F: FnMut(&Path, &mut tar::Entry<'_, ArchiveReader>) -> Result<ControlFlow<()>>,
{
    let mut archive = open(path)?;
    for entry in archive.entries()? {
        let mut entry = entry?;
        let raw = entry.path()?.into_owned();
        let member = match clean_member_path(&raw) {
            Ok(member) => member,
            Err(e) => {
                warn!("Skipping unsafe member {:?} in {}: {}", raw, path.display(), e);
                continue;
            }
        };
        if visit(&member, &mut entry)?.is_break() {
            break;
        }
    }
    Ok(())
}

/// Path with its first component removed, if anything remains
pub fn strip_first(member: &Path) -> Option<PathBuf> {
    let mut components = member.components();
    components.next()?;
    let rest = components.as_path();
    if rest.as_os_str().is_empty() {
        None
    } else {
        Some(rest.to_path_buf())
    }
}

/// First component of a member path as a string
pub fn first_component(member: &Path) -> Option<String> {
    member
        .components()
        .next()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
}

/// The single root directory shared by all members, if there is one
///
/// `members` are `(path, is_dir)` pairs. A root exists when every member
/// lives under the same first component and no regular file sits at the top
/// level.
pub fn common_root(members: &[(PathBuf, bool)]) -> Option<String> {
    let mut roots = BTreeSet::new();
    for (member, is_dir) in members {
        if member.components().count() == 1 && !is_dir {
            return None;
        }
        roots.insert(first_component(member)?);
    }
    if roots.len() == 1 {
        roots.into_iter().next()
    } else {
        None
    }
}

/// Capsule-relative form of a member, given the archive's common root
pub fn relative_to_root(member: &Path, root: Option<&str>) -> Option<PathBuf> {
    match root {
        Some(root) if first_component(member).as_deref() == Some(root) => strip_first(member),
        _ => Some(member.to_path_buf()),
    }
}

/// Member looks like a capsule manifest (top level or under the root)
pub fn is_manifest_member(member: &Path) -> bool {
    let depth = member.components().count();
    depth <= 2 && member.file_name().is_some_and(|n| n == super::manifest::MANIFEST_NAME)
}

/// Member is an intermediate-representation document
pub fn is_ir_member(member: &Path) -> bool {
    member
        .file_name()
        .is_some_and(|n| n.to_string_lossy().to_ascii_lowercase().ends_with(".ir.json"))
}

/// Member lives in a `blobs/` tree at the top level or directly under `root`
///
/// Pass the archive's common root once it is known; with `None` only a
/// top-level `blobs/` counts.
pub fn is_blobs_member(member: &Path, root: Option<&str>) -> bool {
    let mut components = member.components().map(|c| c.as_os_str().to_string_lossy());
    match (components.next(), components.next()) {
        (Some(first), _) if first == super::cas::BLOBS_DIR => true,
        (Some(first), Some(second)) => {
            second == super::cas::BLOBS_DIR && root.is_some_and(|root| first == root)
        }
        _ => false,
    }
}

/// Extract every regular file into `dest`, removing the common root directory
///
/// Returns the number of files written. The archive is read once into a
/// scratch directory inside `dest`, then moved into place.
pub fn extract(path: &Path, dest: &Path) -> Result<usize> {
    CompressionFormat::from_path(path)?;
    fs::create_dir_all(dest)?;
    let scratch = tempfile::Builder::new()
        .prefix(".extract-")
        .tempdir_in(dest)?;

    let mut members: Vec<(PathBuf, bool)> = Vec::new();
    let mut written = 0usize;

    for_each_entry(path, |member, entry| {
        let kind = entry.header().entry_type();
        if kind.is_dir() {
            members.push((member.to_path_buf(), true));
            fs::create_dir_all(join_member(scratch.path(), member)?)?;
        } else if kind.is_file() {
            members.push((member.to_path_buf(), false));
            let target = join_member(scratch.path(), member)?;
            if let Some(parent) = target.parent() {
                fs::create_dir_all(parent)?;
            }
            entry.unpack(&target)?;
            written += 1;
        } else {
            debug!("Skipping non-regular member {} ({:?})", member.display(), kind);
        }
        Ok(ControlFlow::Continue(()))
    })?;

    let source = match common_root(&members) {
        Some(root) => scratch.path().join(root),
        None => scratch.path().to_path_buf(),
    };
    if source.is_dir() {
        for child in fs::read_dir(&source)? {
            let child = child?;
            let target = dest.join(child.file_name());
            if target.is_dir() {
                fs::remove_dir_all(&target)?;
            } else if target.exists() {
                fs::remove_file(&target)?;
            }
            fs::rename(child.path(), target)?;
        }
    }

    debug!("Extracted {} files from {} into {}", written, path.display(), dest.display());
    Ok(written)
}

/// Write `staging` as a capsule at `dest`, every member under `root_name/`
///
/// Compression follows the suffix of `dest`. Members are added in sorted
/// order so identical staging trees produce identical member listings.
pub fn create(staging: &Path, dest: &Path, root_name: &str) -> Result<()> {
    let format = CompressionFormat::from_path(dest)?;
    if !staging.is_dir() {
        return Err(Error::NotFound(format!("staging directory {}", staging.display())));
    }

    let file = File::create(dest)?;
    let mut builder = tar::Builder::new(Encoder::new(BufWriter::new(file), format));
    builder.mode(tar::HeaderMode::Deterministic);
    builder.append_dir(root_name, staging)?;

    for entry in WalkDir::new(staging).sort_by_file_name().min_depth(1) {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        let relative = entry
            .path()
            .strip_prefix(staging)
            .map_err(|_| Error::InvalidPath(entry.path().display().to_string()))?;
        let name = Path::new(root_name).join(relative);

        if entry.file_type().is_dir() {
            builder.append_dir(&name, entry.path())?;
        } else if entry.file_type().is_file() {
            builder.append_path_with_name(entry.path(), &name)?;
        }
    }

    let encoder = builder.into_inner()?;
    let mut writer = encoder.finish()?;
    std::io::Write::flush(&mut writer)?;
    writer
        .into_inner()
        .map_err(|e| Error::Io(e.into_error()))?
        .sync_all()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn stage(dir: &Path, files: &[(&str, &str)]) {
        for (name, content) in files {
            let path = dir.join(name);
            fs::create_dir_all(path.parent().unwrap()).unwrap();
            fs::write(path, content).unwrap();
        }
    }

    #[test]
    fn test_member_classifiers() {
        assert!(is_manifest_member(Path::new("manifest.json")));
        assert!(is_manifest_member(Path::new("kjv/manifest.json")));
        assert!(!is_manifest_member(Path::new("kjv/docs/manifest.json")));

        assert!(is_ir_member(Path::new("kjv/kjv.ir.json")));
        assert!(is_ir_member(Path::new("KJV.IR.JSON")));
        assert!(!is_ir_member(Path::new("kjv/kjv.json")));

        assert!(is_blobs_member(Path::new("blobs/sha256/ab/abcd"), None));
        assert!(is_blobs_member(Path::new("kjv/blobs"), Some("kjv")));
        assert!(!is_blobs_member(Path::new("kjv/blobs"), None));
        assert!(!is_blobs_member(Path::new("docs/blobs/x"), Some("kjv")));
        assert!(!is_blobs_member(Path::new("kjv/data/blobs/x"), Some("kjv")));
    }

    #[test]
    fn test_common_root() {
        let nested = vec![
            (PathBuf::from("kjv"), true),
            (PathBuf::from("kjv/manifest.json"), false),
            (PathBuf::from("kjv/mods.d/kjv.conf"), false),
        ];
        assert_eq!(common_root(&nested).as_deref(), Some("kjv"));

        let flat = vec![
            (PathBuf::from("manifest.json"), false),
            (PathBuf::from("mods.d/kjv.conf"), false),
        ];
        assert_eq!(common_root(&flat), None);

        let two_roots = vec![
            (PathBuf::from("a/x"), false),
            (PathBuf::from("b/y"), false),
        ];
        assert_eq!(common_root(&two_roots), None);
    }

    #[test]
    fn test_create_then_extract_strips_root() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("staging");
        stage(&staging, &[("manifest.json", "{}"), ("mods.d/kjv.conf", "[KJV]")]);

        for name in ["kjv.tar", "kjv.tar.gz", "kjv.tar.xz"] {
            let capsule = dir.path().join(name);
            create(&staging, &capsule, "kjv").unwrap();

            let out = dir.path().join(format!("out-{}", name));
            let written = extract(&capsule, &out).unwrap();
            assert_eq!(written, 2);
            assert_eq!(fs::read_to_string(out.join("mods.d/kjv.conf")).unwrap(), "[KJV]");
            assert!(out.join("manifest.json").exists());
            assert!(!out.join("kjv").exists());
        }
    }

    #[test]
    fn test_create_rejects_missing_staging() {
        let dir = TempDir::new().unwrap();
        let err = create(&dir.path().join("nope"), &dir.path().join("x.tar.gz"), "x").unwrap_err();
        assert!(matches!(err, Error::NotFound(_)));
    }

    #[test]
    fn test_extract_rejects_unsupported_extension() {
        let dir = TempDir::new().unwrap();
        let zip = dir.path().join("kjv.zip");
        fs::write(&zip, b"PK").unwrap();
        assert!(matches!(
            extract(&zip, &dir.path().join("out")),
            Err(Error::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_for_each_entry_early_break() {
        let dir = TempDir::new().unwrap();
        let staging = dir.path().join("s");
        stage(&staging, &[("a.txt", "a"), ("b.txt", "b"), ("c.txt", "c")]);
        let capsule = dir.path().join("abc.tar");
        create(&staging, &capsule, "abc").unwrap();

        let mut seen = 0;
        for_each_entry(&capsule, |member, _| {
            seen += 1;
            if member.ends_with("a.txt") {
                return Ok(ControlFlow::Break(()));
            }
            Ok(ControlFlow::Continue(()))
        })
        .unwrap();
        // root dir entry, then a.txt
        assert_eq!(seen, 2);
    }
}
