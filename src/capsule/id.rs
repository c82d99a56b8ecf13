// src/capsule/id.rs

//! Capsule identifiers and backup names
//!
//! A capsule's ID is its file name with the archive suffix removed. Suffixes
//! are tried most specific first so that `kjv.capsule.tar.xz` becomes `kjv`
//! rather than `kjv.capsule`.

use std::path::{Path, PathBuf};

/// Suffixes stripped from file names, most specific first
pub const CAPSULE_SUFFIXES: &[&str] = &[
    ".capsule.tar.xz",
    ".capsule.tar.gz",
    ".tar.xz",
    ".tar.gz",
    ".tar",
];

/// Suffixes that are kept intact when naming the `-old` backup
const BACKUP_SUFFIXES: &[&str] = &[".capsule.tar.gz", ".capsule.tar.xz", ".tar.gz", ".tar.xz"];

/// Marker inserted before the suffix of a backup name
const BACKUP_MARKER: &str = "-old";

/// Extensions recognised when listing the capsule directory
pub const LISTED_EXTENSIONS: &[&str] = &["xz", "gz", "tar"];

/// Split a file name into `(id, suffix)` using the longest matching suffix
///
/// Matching ignores ASCII case; the returned ID keeps the original casing.
pub fn split_suffix(file_name: &str) -> (&str, &str) {
    let lower = file_name.to_ascii_lowercase();
    for suffix in CAPSULE_SUFFIXES {
        if lower.ends_with(suffix) && lower.len() > suffix.len() {
            let cut = file_name.len() - suffix.len();
            return (&file_name[..cut], &file_name[cut..]);
        }
    }
    (file_name, "")
}

/// Normalized capsule ID for a file name
///
/// # Examples
/// ```
/// use scriptorium::capsule::id::capsule_id;
///
/// assert_eq!(capsule_id("kjv.capsule.tar.xz"), "kjv");
/// assert_eq!(capsule_id("kjv.tar.gz"), "kjv");
/// assert_eq!(capsule_id("KJV.TAR"), "KJV");
/// ```
pub fn capsule_id(file_name: &str) -> &str {
    split_suffix(file_name).0
}

/// Normalized capsule ID for a path
pub fn capsule_id_for_path(path: &Path) -> String {
    path.file_name()
        .map(|n| capsule_id(&n.to_string_lossy()).to_string())
        .unwrap_or_default()
}

/// Case-insensitive ID comparison used for lookups
pub fn ids_match(a: &str, b: &str) -> bool {
    a.eq_ignore_ascii_case(b)
}

/// True if the file name carries one of the listed archive extensions
pub fn has_listed_extension(file_name: &str) -> bool {
    Path::new(file_name)
        .extension()
        .map(|ext| {
            let ext = ext.to_string_lossy().to_ascii_lowercase();
            LISTED_EXTENSIONS.contains(&ext.as_str())
        })
        .unwrap_or(false)
}

/// Name the original capsule is moved to before it is replaced
///
/// `kjv.tar.gz` becomes `kjv-old.tar.gz`; unrecognised names get `-old`
/// appended (`kjv.tar` becomes `kjv.tar-old`).
pub fn backup_path(original: &Path) -> PathBuf {
    let file_name = original
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let lower = file_name.to_ascii_lowercase();

    let backup_name = BACKUP_SUFFIXES
        .iter()
        .find(|suffix| lower.ends_with(*suffix) && lower.len() > suffix.len())
        .map(|suffix| {
            let cut = file_name.len() - suffix.len();
            format!("{}{}{}", &file_name[..cut], BACKUP_MARKER, &file_name[cut..])
        })
        .unwrap_or_else(|| format!("{}{}", file_name, BACKUP_MARKER));

    original.with_file_name(backup_name)
}

/// True if the file name is one [`backup_path`] produces
///
/// Backups stay listed and readable but are never picked for batch
/// rewrites or reported as Bibles.
pub fn is_backup_name(file_name: &str) -> bool {
    let lower = file_name.to_ascii_lowercase();
    BACKUP_SUFFIXES.iter().any(|suffix| {
        lower
            .strip_suffix(suffix)
            .is_some_and(|stem| stem.len() > BACKUP_MARKER.len() && stem.ends_with(BACKUP_MARKER))
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capsule_id_longest_suffix_wins() {
        assert_eq!(capsule_id("kjv.capsule.tar.xz"), "kjv");
        assert_eq!(capsule_id("kjv.capsule.tar.gz"), "kjv");
        assert_eq!(capsule_id("kjv.tar.xz"), "kjv");
        assert_eq!(capsule_id("kjv.tar.gz"), "kjv");
        assert_eq!(capsule_id("kjv.tar"), "kjv");
    }

    #[test]
    fn test_capsule_id_case_insensitive_suffix() {
        assert_eq!(capsule_id("Vulgate.Capsule.TAR.XZ"), "Vulgate");
        assert_eq!(capsule_id("ESV.TAR.GZ"), "ESV");
    }

    #[test]
    fn test_capsule_id_only_one_suffix_stripped() {
        assert_eq!(capsule_id("odd.tar.tar"), "odd.tar");
        assert_eq!(capsule_id("plain.zip"), "plain.zip");
        assert_eq!(capsule_id(".tar.gz"), ".tar.gz");
    }

    #[test]
    fn test_split_suffix_returns_original_casing() {
        assert_eq!(split_suffix("KJV.Tar.Gz"), ("KJV", ".Tar.Gz"));
    }

    #[test]
    fn test_ids_match_ignores_case() {
        assert!(ids_match("kjv", "KJV"));
        assert!(!ids_match("kjv", "kjva"));
    }

    #[test]
    fn test_listed_extensions() {
        assert!(has_listed_extension("kjv.tar.xz"));
        assert!(has_listed_extension("kjv.tar.GZ"));
        assert!(has_listed_extension("kjv.tar"));
        assert!(!has_listed_extension("kjv.zip"));
        assert!(!has_listed_extension("README"));
    }

    #[test]
    fn test_backup_path() {
        let cases = [
            ("/c/kjv.tar.gz", "/c/kjv-old.tar.gz"),
            ("/c/kjv.tar.xz", "/c/kjv-old.tar.xz"),
            ("/c/kjv.capsule.tar.gz", "/c/kjv-old.capsule.tar.gz"),
            ("/c/kjv.capsule.tar.xz", "/c/kjv-old.capsule.tar.xz"),
            ("/c/kjv.tar", "/c/kjv.tar-old"),
        ];
        for (input, expected) in cases {
            assert_eq!(backup_path(Path::new(input)), PathBuf::from(expected));
        }
    }

    #[test]
    fn test_is_backup_name() {
        assert!(is_backup_name("kjv-old.tar.gz"));
        assert!(is_backup_name("KJV-OLD.TAR.XZ"));
        assert!(is_backup_name("kjv-old.capsule.tar.xz"));
        assert!(!is_backup_name("kjv.tar.gz"));
        assert!(!is_backup_name("-old.tar.gz"));
        assert!(!is_backup_name("bold.tar.gz"));

        let backup = backup_path(Path::new("/c/web.capsule.tar.gz"));
        assert!(is_backup_name(&backup.file_name().unwrap().to_string_lossy()));
    }
}
