// src/sword.rs

//! SWORD module configuration (`mods.d/*.conf`)
//!
//! A conf file is an INI-like document: a `[ModuleName]` header followed by
//! `Key=Value` lines. Keys may repeat (`GlobalOptionFilter`), and a trailing
//! backslash continues a value onto the next line. Only what the rest of the
//! crate needs is interpreted; every pair is kept.

use crate::error::Result;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Directory holding module configuration files
pub const MODS_DIR: &str = "mods.d";

/// One parsed module configuration
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SwordConf {
    /// Module name from the section header, or the file stem
    pub name: String,
    /// All values per key, in file order
    pub entries: BTreeMap<String, Vec<String>>,
}

impl SwordConf {
    /// Parse conf text; `fallback_name` is used when there is no header
    pub fn parse(content: &str, fallback_name: &str) -> Self {
        let mut conf = SwordConf {
            name: fallback_name.to_string(),
            ..Default::default()
        };
        let mut pending: Option<(String, String)> = None;

        for raw in content.lines() {
            if let Some((key, mut value)) = pending.take() {
                let line = raw.trim_end();
                match line.strip_suffix('\\') {
                    Some(more) => {
                        value.push_str(more);
                        value.push('\n');
                        pending = Some((key, value));
                    }
                    None => {
                        value.push_str(line);
                        conf.push(key, value);
                    }
                }
                continue;
            }

            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            if let Some(section) = line.strip_prefix('[').and_then(|l| l.strip_suffix(']')) {
                if !section.trim().is_empty() {
                    conf.name = section.trim().to_string();
                }
                continue;
            }
            if let Some((key, value)) = line.split_once('=') {
                let key = key.trim().to_string();
                let value = value.trim();
                match value.strip_suffix('\\') {
                    Some(start) => pending = Some((key, format!("{}\n", start))),
                    None => conf.push(key, value.to_string()),
                }
            }
        }

        if let Some((key, value)) = pending {
            conf.push(key, value.trim_end().to_string());
        }
        conf
    }

    fn push(&mut self, key: String, value: String) {
        self.entries.entry(key).or_default().push(value);
    }

    /// First value for a key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).and_then(|v| v.first()).map(String::as_str)
    }

    pub fn description(&self) -> &str {
        self.get("Description").unwrap_or_default()
    }

    pub fn language(&self) -> &str {
        self.get("Lang").unwrap_or_default()
    }

    /// `DataPath` with any leading `./` removed
    pub fn data_path(&self) -> Option<&str> {
        self.get("DataPath").map(|p| p.trim_start_matches("./"))
    }

    /// Driver name (`zText`, `RawText`, `RawGenBook`, ...)
    pub fn driver(&self) -> &str {
        self.get("ModDrv").unwrap_or_default()
    }

    /// True for Bible text drivers
    pub fn is_bible(&self) -> bool {
        let driver = self.driver().to_ascii_lowercase();
        driver.contains("text") && !driver.contains("gen")
    }
}

/// Conf files directly under `<root>/mods.d`, sorted by file name
pub fn conf_files(root: &Path) -> Result<Vec<PathBuf>> {
    let dir = root.join(MODS_DIR);
    if !dir.is_dir() {
        return Ok(Vec::new());
    }
    let mut files = Vec::new();
    for entry in fs::read_dir(&dir)? {
        let path = entry?.path();
        let is_conf = path
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("conf"));
        if is_conf && path.is_file() {
            files.push(path);
        }
    }
    files.sort();
    Ok(files)
}

/// Parse every conf under `<root>/mods.d`; unreadable files are skipped
pub fn read_confs(root: &Path) -> Result<Vec<(PathBuf, SwordConf)>> {
    let mut confs = Vec::new();
    for path in conf_files(root)? {
        let stem = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        match fs::read(&path) {
            Ok(bytes) => {
                let conf = SwordConf::parse(&String::from_utf8_lossy(&bytes), &stem);
                confs.push((path, conf));
            }
            Err(e) => warn!("Skipping unreadable module config {}: {}", path.display(), e),
        }
    }
    Ok(confs)
}

/// True if `root` looks like a SWORD module tree
pub fn is_module_tree(root: &Path) -> bool {
    conf_files(root).is_ok_and(|files| !files.is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const KJV_CONF: &str = "\
[KJV]
DataPath=./modules/texts/ztext/kjv/
ModDrv=zText
Lang=en
Description=King James Version (1769)
GlobalOptionFilter=OSISStrongs
GlobalOptionFilter=OSISMorph
About=This is the King James Version \\
of the Holy Bible.
";

    #[test]
    fn test_parse_conf() {
        let conf = SwordConf::parse(KJV_CONF, "kjv");
        assert_eq!(conf.name, "KJV");
        assert_eq!(conf.description(), "King James Version (1769)");
        assert_eq!(conf.language(), "en");
        assert_eq!(conf.data_path(), Some("modules/texts/ztext/kjv/"));
        assert!(conf.is_bible());
        assert_eq!(conf.entries["GlobalOptionFilter"].len(), 2);
        assert_eq!(
            conf.get("About"),
            Some("This is the King James Version \nof the Holy Bible.")
        );
    }

    #[test]
    fn test_parse_without_header_uses_fallback() {
        let conf = SwordConf::parse("Description=Commentary\nModDrv=zCom\n", "mhc");
        assert_eq!(conf.name, "mhc");
        assert!(!conf.is_bible());
    }

    #[test]
    fn test_read_confs_sorted() {
        let dir = TempDir::new().unwrap();
        let mods = dir.path().join(MODS_DIR);
        fs::create_dir_all(&mods).unwrap();
        fs::write(mods.join("web.conf"), "[WEB]\nModDrv=zText\n").unwrap();
        fs::write(mods.join("asv.conf"), "[ASV]\nModDrv=RawText\n").unwrap();
        fs::write(mods.join("readme.txt"), "ignored").unwrap();

        let names: Vec<_> = read_confs(dir.path())
            .unwrap()
            .into_iter()
            .map(|(_, c)| c.name)
            .collect();
        assert_eq!(names, vec!["ASV", "WEB"]);
        assert!(is_module_tree(dir.path()));
    }

    #[test]
    fn test_missing_mods_dir() {
        let dir = TempDir::new().unwrap();
        assert!(read_confs(dir.path()).unwrap().is_empty());
        assert!(!is_module_tree(dir.path()));
    }
}
