// src/convert/detect.rs
//! Source format detection
//!
//! Signals are tried in a fixed order and the first hit wins:
//!
//! 1. `source_format` in the capsule manifest
//! 2. a format name inside the capsule's file name
//! 3. content of the extracted members (OSIS, then USX, then USFM), file by
//!    file in sorted order, then a SWORD `mods.d/*.conf` layout
//! 4. the `detect` operation of each IR extractor plugin
//!
//! Steps 1 to 3 live here; the pipeline runs step 4.

use crate::capsule::Manifest;
use crate::error::Result;
use crate::sword;
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;
use walkdir::WalkDir;

/// Formats recognised from file names, in match order
pub const FILENAME_MARKERS: &[&str] = &["sword", "osis", "usfm", "usx"];

/// Bytes read from each candidate file when sniffing content
const SNIFF_BYTES: usize = 4096;

/// How a format was determined
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum DetectionSource {
    Manifest,
    FileName,
    Content,
    ModuleLayout,
    Plugin,
}

/// A detected source format
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct Detection {
    pub format: String,
    pub source: DetectionSource,
    pub reason: String,
}

impl Detection {
    pub fn new(format: impl Into<String>, source: DetectionSource, reason: impl Into<String>) -> Self {
        Self {
            format: format.into(),
            source,
            reason: reason.into(),
        }
    }
}

/// Format named by the manifest, if any
pub fn from_manifest(manifest: Option<&Manifest>) -> Option<Detection> {
    let format = manifest?.source_format.trim().to_ascii_lowercase();
    (!format.is_empty()).then(|| {
        Detection::new(format, DetectionSource::Manifest, "manifest source_format")
    })
}

/// Format named in the capsule file name (substring match)
pub fn from_file_name(file_name: &str) -> Option<Detection> {
    let lower = file_name.to_ascii_lowercase();
    FILENAME_MARKERS
        .iter()
        .find(|marker| lower.contains(*marker))
        .map(|marker| {
            Detection::new(*marker, DetectionSource::FileName, format!("file name {}", file_name))
        })
}

/// Inspect extracted members, stopping at the first convertible file
pub fn from_content(root: &Path) -> Result<Option<Detection>> {
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        if !entry.file_type().is_file() || !is_candidate(entry.path()) {
            continue;
        }
        if let Some(format) = sniff(entry.path())? {
            let relative = entry.path().strip_prefix(root).unwrap_or(entry.path());
            debug!("Detected {} from {}", format, relative.display());
            return Ok(Some(Detection::new(
                format,
                DetectionSource::Content,
                format!("content of {}", relative.display()),
            )));
        }
    }

    if sword::is_module_tree(root) {
        return Ok(Some(Detection::new(
            "sword",
            DetectionSource::ModuleLayout,
            format!("{}/*.conf present", sword::MODS_DIR),
        )));
    }
    Ok(None)
}

/// Run the built-in signals in order
pub fn detect_builtin(
    manifest: Option<&Manifest>,
    file_name: &str,
    extracted: &Path,
) -> Result<Option<Detection>> {
    if let Some(found) = from_manifest(manifest).or_else(|| from_file_name(file_name)) {
        return Ok(Some(found));
    }
    from_content(extracted)
}

fn is_candidate(path: &Path) -> bool {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    name != crate::capsule::manifest::MANIFEST_NAME && !name.ends_with(".ir.json")
}

/// Format of a single file, checked OSIS, USX, USFM
fn sniff(path: &Path) -> Result<Option<&'static str>> {
    let ext = path
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();

    let mut head = Vec::with_capacity(SNIFF_BYTES);
    File::open(path)?
        .take(SNIFF_BYTES as u64)
        .read_to_end(&mut head)?;
    let text = String::from_utf8_lossy(&head);

    if ext == "osis" || text.contains("<osis") {
        return Ok(Some("osis"));
    }
    if ext == "usx" || text.contains("<usx") {
        return Ok(Some("usx"));
    }
    if ext == "usfm" || ext == "sfm" || text.trim_start().starts_with("\\id ") {
        return Ok(Some("usfm"));
    }
    Ok(None)
}
