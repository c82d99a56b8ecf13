// src/convert/pipeline.rs
//! Capsule conversion: detect, extract IR, emit, commit
//!
//! Every invocation works in a private temporary directory:
//!
//! ```text
//! <tmp>/source   capsule extracted here
//! <tmp>/ir       extractor output
//! <tmp>/out      emitter output
//! <tmp>/staging  members of the replacement capsule
//! ```
//!
//! Nothing touches the capsule directory until the staging tree is complete,
//! and the final swap goes through [`ArchiveStore::atomic_replace`], so a
//! failure at any step leaves the original capsule readable where it was.

use super::detect::{self, Detection, DetectionSource};
use super::loss::LossClass;
use crate::capsule::id::capsule_id_for_path;
use crate::capsule::manifest::MANIFEST_NAME;
use crate::capsule::{ArchiveStore, Manifest};
use crate::error::{Error, Result};
use crate::filesystem::copy_tree;
use crate::filesystem::path::ensure_within;
use crate::plugin::{IrOutput, PluginRegistry};
use crate::pool::WorkerPool;
use serde::Serialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

/// Outcome of one IR generation or conversion
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ConversionResult {
    pub capsule_id: String,
    pub success: bool,
    /// Path of the rewritten capsule
    pub output_path: PathBuf,
    /// Where the previous version was kept
    pub original_path: Option<PathBuf>,
    pub loss_class: LossClass,
    pub message: String,
    pub source_format: String,
}

impl ConversionResult {
    /// Result describing a failed attempt
    pub fn failed(capsule: &Path, error: &Error) -> Self {
        Self {
            capsule_id: capsule_id_for_path(capsule),
            success: false,
            output_path: capsule.to_path_buf(),
            original_path: None,
            loss_class: LossClass::L0,
            message: error.to_string(),
            source_format: String::new(),
        }
    }
}

struct Workspace {
    _root: TempDir,
    source: PathBuf,
    ir: PathBuf,
    out: PathBuf,
    staging: PathBuf,
}

impl Workspace {
    fn new() -> Result<Self> {
        let root = tempfile::Builder::new().prefix("scriptorium-").tempdir()?;
        let ws = Self {
            source: root.path().join("source"),
            ir: root.path().join("ir"),
            out: root.path().join("out"),
            staging: root.path().join("staging"),
            _root: root,
        };
        for dir in [&ws.source, &ws.ir, &ws.out, &ws.staging] {
            fs::create_dir_all(dir)?;
        }
        Ok(ws)
    }
}

/// Drives plugins over capsules held in an [`ArchiveStore`]
#[derive(Clone)]
pub struct ConversionPipeline {
    store: ArchiveStore,
    plugins: Arc<PluginRegistry>,
}

impl ConversionPipeline {
    pub fn new(store: ArchiveStore, plugins: Arc<PluginRegistry>) -> Self {
        Self { store, plugins }
    }

    pub fn plugins(&self) -> &PluginRegistry {
        &self.plugins
    }

    /// Detect the source format of a capsule without converting it
    pub fn detect_format(&self, capsule: &Path) -> Result<Detection> {
        let manifest = self.store.read_manifest(capsule)?;
        let work = Workspace::new()?;
        self.store.extract(capsule, &work.source)?;
        self.detect(capsule, &work.source, manifest.as_ref())
    }

    /// Add `<id>.ir.json` to a capsule
    ///
    /// Refuses capsules that already contain IR. The replacement carries
    /// every original member, the IR, and a manifest marked `has_ir`.
    pub fn generate_ir(&self, capsule: &Path) -> Result<ConversionResult> {
        let capsule_id = capsule_id_for_path(capsule);
        if self.store.scan_metadata(capsule)?.has_ir {
            return Err(Error::AlreadyHasIr(capsule_id));
        }

        let manifest = self.store.read_manifest(capsule)?;
        let work = Workspace::new()?;
        self.store.extract(capsule, &work.source)?;

        let detection = self.detect(capsule, &work.source, manifest.as_ref())?;
        let (plugin_id, ir) = self.extract_ir(&detection.format, &work.source, &work.ir)?;

        copy_tree(&work.source, &work.staging)?;
        fs::copy(&ir.ir_path, work.staging.join(format!("{}.ir.json", capsule_id)))?;

        let mut manifest = manifest.unwrap_or_else(|| Manifest::new(&capsule_id));
        manifest.has_ir = true;
        manifest.ir_generated = Some(chrono::Utc::now().to_rfc3339());
        manifest.ir_loss_class = Some(ir.loss_class.to_string());
        manifest.source_format = detection.format.clone();
        write_manifest(&work.staging, &manifest)?;

        let backup = self.store.atomic_replace(capsule, &work.staging)?;
        info!(
            "Generated IR for {} with {} (loss {})",
            capsule_id, plugin_id, ir.loss_class
        );

        Ok(ConversionResult {
            capsule_id,
            success: true,
            output_path: capsule.to_path_buf(),
            original_path: Some(backup),
            loss_class: ir.loss_class,
            message: format!("IR generated by {}", plugin_id),
            source_format: detection.format,
        })
    }

    /// Generate IR for many capsules on a bounded pool
    ///
    /// Failures are reported in the results, one per capsule.
    pub fn generate_ir_batch(&self, capsules: Vec<PathBuf>, max_workers: usize) -> Vec<ConversionResult> {
        if capsules.is_empty() {
            return Vec::new();
        }

        let pipeline = self.clone();
        let pool = WorkerPool::new(max_workers, capsules.len(), move |path: PathBuf| {
            pipeline.generate_ir(&path).unwrap_or_else(|e| {
                warn!("IR generation failed for {}: {}", path.display(), e);
                ConversionResult::failed(&path, &e)
            })
        });

        let mut results = Vec::new();
        for path in capsules {
            if let Err(path) = pool.submit(path) {
                let err = Error::ConversionFailed("no worker available".to_string());
                results.push(ConversionResult::failed(&path, &err));
            }
        }
        results.extend(pool.close().drain());
        results.sort_by(|a, b| a.output_path.cmp(&b.output_path));
        results
    }

    /// Rewrite a capsule in `target` format
    ///
    /// IR already present in the capsule is reused; otherwise it is
    /// extracted first. The reported loss is the worse of the two steps.
    pub fn convert(&self, capsule: &Path, target: &str) -> Result<ConversionResult> {
        let capsule_id = capsule_id_for_path(capsule);
        let target = target.trim().to_ascii_lowercase();
        if target.is_empty() {
            return Err(Error::ConversionFailed("no target format given".to_string()));
        }
        let emitter = self
            .plugins
            .find_emitter(&target)
            .ok_or_else(|| Error::PluginNotFound(format!("emitting {}", target)))?;
        let emitter_id = emitter.id();

        let manifest = self.store.read_manifest(capsule)?;
        let work = Workspace::new()?;
        self.store.extract(capsule, &work.source)?;

        let (source_format, ir) = match find_ir(&work.source)? {
            Some(ir_path) => {
                let source_format = manifest
                    .as_ref()
                    .map(|m| m.source_format.trim().to_ascii_lowercase())
                    .filter(|f| !f.is_empty())
                    .unwrap_or_else(|| "ir".to_string());
                let loss_class = manifest
                    .as_ref()
                    .and_then(|m| m.ir_loss_class.as_deref())
                    .and_then(|l| l.parse().ok())
                    .unwrap_or_default();
                debug!("Reusing IR {} from {}", ir_path.display(), capsule_id);
                (source_format, IrOutput { ir_path, loss_class })
            }
            None => {
                let detection = self.detect(capsule, &work.source, manifest.as_ref())?;
                let (_, ir) = self.extract_ir(&detection.format, &work.source, &work.ir)?;
                (detection.format, ir)
            }
        };
        if source_format == target {
            return Err(Error::ConversionFailed(format!(
                "{} is already in {} format",
                capsule_id, target
            )));
        }

        let emitted = self.plugins.emit_native(&emitter_id, &ir.ir_path, &work.out)?;
        let output = ensure_within(&work.out, &emitted.output_path).map_err(|_| Error::ProtocolError {
            plugin: emitter_id.clone(),
            message: "output path is outside the output directory".to_string(),
        })?;

        if output.is_dir() {
            copy_tree(&output, &work.staging)?;
        } else {
            let name = output
                .file_name()
                .ok_or_else(|| Error::ConversionFailed("emitter returned no file name".to_string()))?;
            fs::copy(&output, work.staging.join(name))?;
        }

        let total = ir.loss_class.combine(emitted.loss_class);
        let mut manifest = manifest.unwrap_or_else(|| Manifest::new(&capsule_id));
        manifest.converted_from = Some(source_format.clone());
        manifest.source_format = target.clone();
        manifest.conversion_date = Some(chrono::Utc::now().to_rfc3339());
        manifest.extraction_loss = Some(ir.loss_class.to_string());
        manifest.emission_loss = Some(emitted.loss_class.to_string());
        manifest.ir_loss_class = Some(total.to_string());
        manifest.has_ir = false;
        manifest.ir_generated = None;
        write_manifest(&work.staging, &manifest)?;

        let backup = self.store.atomic_replace(capsule, &work.staging)?;
        info!(
            "Converted {} from {} to {} with {} (loss {})",
            capsule_id, source_format, target, emitter_id, total
        );

        Ok(ConversionResult {
            capsule_id,
            success: true,
            output_path: capsule.to_path_buf(),
            original_path: Some(backup),
            loss_class: total,
            message: format!("converted {} to {}", source_format, target),
            source_format,
        })
    }

    fn detect(&self, capsule: &Path, extracted: &Path, manifest: Option<&Manifest>) -> Result<Detection> {
        let file_name = capsule
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        if let Some(found) = detect::detect_builtin(manifest, &file_name, extracted)? {
            debug!("{}: detected {} ({})", file_name, found.format, found.reason);
            return Ok(found);
        }

        for plugin in self.plugins.extractors() {
            let id = plugin.id();
            match self.plugins.detect(&id, extracted) {
                Ok(result) if result.detected => {
                    let format = if result.format.trim().is_empty() {
                        plugin.capabilities.inputs.first().cloned().unwrap_or_default()
                    } else {
                        result.format.trim().to_ascii_lowercase()
                    };
                    if format.is_empty() {
                        continue;
                    }
                    return Ok(Detection::new(format, DetectionSource::Plugin, format!("{}: {}", id, result.reason)));
                }
                Ok(_) => {}
                Err(e) => debug!("Detect probe {} failed: {}", id, e),
            }
        }

        Err(Error::ConversionFailed(format!(
            "could not detect the source format of {}",
            file_name
        )))
    }

    fn extract_ir(&self, format: &str, source: &Path, ir_dir: &Path) -> Result<(String, IrOutput)> {
        let plugin = self
            .plugins
            .find_extractor(format)
            .ok_or_else(|| Error::PluginNotFound(format!("extracting IR from {}", format)))?;
        let id = plugin.id();

        let output = self.plugins.extract_ir(&id, source, ir_dir)?;
        let ir_path = ensure_within(ir_dir, &output.ir_path).map_err(|_| Error::ProtocolError {
            plugin: id.clone(),
            message: "IR path is outside the output directory".to_string(),
        })?;
        if !ir_path.is_file() {
            return Err(Error::PluginFailed {
                plugin: id,
                message: "reported IR file does not exist".to_string(),
            });
        }
        Ok((
            id,
            IrOutput {
                ir_path,
                loss_class: output.loss_class,
            },
        ))
    }
}

fn write_manifest(staging: &Path, manifest: &Manifest) -> Result<()> {
    fs::write(staging.join(MANIFEST_NAME), manifest.to_json()?)?;
    Ok(())
}

/// First `*.ir.json` in an extracted tree
fn find_ir(root: &Path) -> Result<Option<PathBuf>> {
    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| std::io::Error::other(e.to_string()))?;
        if entry.file_type().is_file() && crate::capsule::archive::is_ir_member(entry.path()) {
            return Ok(Some(entry.into_path()));
        }
    }
    Ok(None)
}
