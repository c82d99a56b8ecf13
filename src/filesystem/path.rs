// src/filesystem/path.rs

//! Capsule member paths and other names that come from outside the process
//!
//! Archive members, SWORD `DataPath` values and plugin entrypoints are all
//! written by someone else. None of them may resolve outside the capsule,
//! staging tree or plugin directory they belong to.

use crate::error::{Error, Result};
use std::path::{Component, Path, PathBuf};

/// Normalize an archive member name into a capsule-relative path
///
/// Root markers and `.` are dropped, so `/kjv/./mods.d/kjv.conf` becomes
/// `kjv/mods.d/kjv.conf`. A `..` anywhere fails with
/// [`Error::PathTraversal`]; a name with nothing left fails with
/// [`Error::InvalidPath`].
///
/// # Examples
///
/// ```
/// use scriptorium::filesystem::path::clean_member_path;
/// use std::path::PathBuf;
///
/// assert_eq!(clean_member_path("./kjv/mods.d/kjv.conf").unwrap(), PathBuf::from("kjv/mods.d/kjv.conf"));
/// assert_eq!(clean_member_path("/kjv/manifest.json").unwrap(), PathBuf::from("kjv/manifest.json"));
/// assert!(clean_member_path("kjv/../../etc/passwd").is_err());
/// ```
pub fn clean_member_path(member: impl AsRef<Path>) -> Result<PathBuf> {
    let member = member.as_ref();
    let mut cleaned = PathBuf::new();
    for component in member.components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::ParentDir => {
                return Err(Error::PathTraversal(format!(
                    "member {} climbs out of the capsule",
                    member.display()
                )));
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }

    if cleaned.as_os_str().is_empty() {
        return Err(Error::InvalidPath(format!("member {:?} names no file", member)));
    }
    Ok(cleaned)
}

/// Where a capsule member lands when unpacked under `dest`
///
/// The member is cleaned first. If the target's parent already exists it
/// must still resolve inside `dest`, which catches a symlinked directory
/// planted by an earlier member.
pub fn join_member(dest: impl AsRef<Path>, member: impl AsRef<Path>) -> Result<PathBuf> {
    let dest = dest.as_ref();
    let target = dest.join(clean_member_path(member)?);

    if let Some(parent) = target.parent()
        && let (Ok(real_dest), Ok(real_parent)) = (dest.canonicalize(), parent.canonicalize())
        && !real_parent.starts_with(&real_dest)
    {
        return Err(Error::PathTraversal(format!(
            "{} resolves outside {}",
            target.display(),
            dest.display()
        )));
    }
    Ok(target)
}

/// Resolve `candidate` to an absolute path and require it to sit under `root`
///
/// Both sides are canonicalized so symlinks and `..` segments cannot be used
/// to step outside. A candidate that does not exist fails as well.
pub fn ensure_within(root: &Path, candidate: &Path) -> Result<PathBuf> {
    let canonical_root = root.canonicalize().map_err(|e| {
        Error::PluginValidation(format!("cannot resolve directory {}: {}", root.display(), e))
    })?;
    let canonical = candidate.canonicalize().map_err(|e| {
        Error::PluginValidation(format!("cannot resolve {}: {}", candidate.display(), e))
    })?;

    if !canonical.starts_with(&canonical_root) {
        return Err(Error::PluginValidation(format!(
            "{} resolves outside {}",
            candidate.display(),
            canonical_root.display()
        )));
    }

    Ok(canonical)
}

/// File name an installed capsule may take in the capsule directory
pub fn capsule_file_name(name: &str) -> Result<String> {
    if name.is_empty() {
        return Err(Error::InvalidPath("capsule file name is empty".to_string()));
    }
    if name.contains(['/', '\\']) || name == "." || name == ".." {
        return Err(Error::PathTraversal(format!(
            "{:?} is not a plain capsule file name",
            name
        )));
    }
    Ok(name.to_string())
}
