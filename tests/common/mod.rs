// tests/common/mod.rs

//! Shared test utilities and helpers for integration tests.

#![allow(dead_code)]

use scriptorium::capsule::archive;
use scriptorium::{ArchiveStore, CacheSettings, Library, PluginRegistry, Posture};
use std::fs;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

/// KJV module configuration with a plain-text data path
pub const KJV_CONF: &str = "\
[KJV]
DataPath=./modules/texts/rawtext/kjv/
ModDrv=RawText
Lang=en
Description=King James Version (1769)
";

/// Pack `files` into `<dir>/<file_name>` under a `<root>/` directory.
pub fn build_capsule(dir: &Path, file_name: &str, root: &str, files: &[(&str, &[u8])]) -> PathBuf {
    let staging = TempDir::new().unwrap();
    for (member, content) in files {
        let path = staging.path().join(member);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, content).unwrap();
    }
    fs::create_dir_all(dir).unwrap();
    let dest = dir.join(file_name);
    archive::create(staging.path(), &dest, root).unwrap();
    dest
}

/// SWORD capsule `kjv.tar.gz` with one text book and no manifest.
pub fn kjv_capsule(dir: &Path) -> PathBuf {
    kjv_capsule_as(dir, "kjv.tar.gz")
}

/// The KJV capsule packed under another file name.
pub fn kjv_capsule_as(dir: &Path, file_name: &str) -> PathBuf {
    build_capsule(
        dir,
        file_name,
        "kjv",
        &[
            ("mods.d/kjv.conf", KJV_CONF.as_bytes()),
            (
                "modules/texts/rawtext/kjv/gen.txt",
                b"In the beginning God created the heaven and the earth.",
            ),
        ],
    )
}

/// Capsule holding a content-addressed `blobs/` tree.
pub fn cas_capsule(dir: &Path) -> PathBuf {
    let content = b"In the beginning";
    let hash = scriptorium::hash::sha256(content);
    let member = format!("blobs/sha256/{}/{}", &hash[..2], hash);
    build_capsule(dir, "web-cas.tar.xz", "web-cas", &[(member.as_str(), content)])
}

/// Library over `dir` with builtin plugins and default caches.
pub fn library(dir: &Path) -> Library {
    Library::new(
        ArchiveStore::new(dir),
        PluginRegistry::with_builtins(Posture::Permissive),
        CacheSettings::default(),
    )
}

/// Write an external plugin whose entrypoint is a shell script.
#[cfg(unix)]
pub fn write_shell_plugin(
    plugins_dir: &Path,
    name: &str,
    inputs: &[&str],
    outputs: &[&str],
    script: &str,
) -> PathBuf {
    use std::os::unix::fs::PermissionsExt;

    let dir = plugins_dir.join(name);
    fs::create_dir_all(&dir).unwrap();
    let descriptor = serde_json::json!({
        "plugin_id": name,
        "kind": "format",
        "version": "0.1.0",
        "entrypoint": "run.sh",
        "capabilities": { "inputs": inputs, "outputs": outputs },
    });
    fs::write(dir.join("plugin.json"), descriptor.to_string()).unwrap();

    let entrypoint = dir.join("run.sh");
    fs::write(&entrypoint, script).unwrap();
    fs::set_permissions(&entrypoint, fs::Permissions::from_mode(0o755)).unwrap();
    entrypoint
}
