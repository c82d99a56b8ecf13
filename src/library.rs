// src/library.rs
//! The library service
//!
//! [`Library`] wires the archive store, plugin registry, conversion pipeline
//! and cache service together. Reads go through the caches; every operation
//! that changes the capsule directory invalidates what it touched before
//! returning.

use crate::cache::{
    BibleEntity, CacheService, CacheSettings, CacheStats, Corpus, ExternalModule, ModuleListing,
    RefreshHandle,
};
use crate::capsule::id::{ids_match, is_backup_name};
use crate::capsule::{Artifact, ArchiveStore, CapsuleInfo, Manifest, MetadataFlags, StoreStats};
use crate::config::ScriptoriumConfig;
use crate::convert::{ConversionPipeline, ConversionResult, Detection};
use crate::error::Result;
use crate::plugin::{PluginDescriptor, PluginRegistry};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info};

pub struct Library {
    store: ArchiveStore,
    plugins: Arc<PluginRegistry>,
    pipeline: ConversionPipeline,
    cache: Arc<CacheService>,
    max_workers: usize,
    background_refresh: bool,
}

impl Library {
    /// Build every service from a configuration
    pub fn open(config: &ScriptoriumConfig) -> Result<Self> {
        let store = ArchiveStore::with_concurrency(
            &config.storage.capsules_dir,
            config.scan.archive_concurrency,
        );
        let plugins = PluginRegistry::load(
            config.plugins.posture,
            config.plugins.external_dir.as_deref(),
            config.plugin_timeout()?,
        )?;
        let mut library = Self::new(store, plugins, config.cache_settings()?);
        library.background_refresh = config.cache.background_refresh;
        info!(
            "Opened library at {} ({} posture)",
            config.storage.capsules_dir.display(),
            config.plugins.posture
        );
        Ok(library)
    }

    pub fn new(store: ArchiveStore, plugins: PluginRegistry, settings: CacheSettings) -> Self {
        let plugins = Arc::new(plugins);
        let max_workers = settings.max_workers;
        Self {
            pipeline: ConversionPipeline::new(store.clone(), plugins.clone()),
            cache: Arc::new(CacheService::new(store.clone(), settings)),
            store,
            plugins,
            max_workers,
            background_refresh: false,
        }
    }

    pub fn store(&self) -> &ArchiveStore {
        &self.store
    }

    pub fn cache(&self) -> &Arc<CacheService> {
        &self.cache
    }

    pub fn pipeline(&self) -> &ConversionPipeline {
        &self.pipeline
    }

    // Reads

    pub fn list(&self) -> Result<Arc<Vec<CapsuleInfo>>> {
        self.cache.capsules()
    }

    /// Capsule by ID, case-insensitive
    pub fn resolve(&self, id: &str) -> Result<CapsuleInfo> {
        if let Some(capsule) = self.cache.capsules()?.iter().find(|c| ids_match(&c.id, id))
            && capsule.path.is_file()
        {
            return Ok(capsule.clone());
        }
        // Listing may predate a change made outside this process
        self.store.resolve(id)
    }

    pub fn metadata(&self, id: &str) -> Result<MetadataFlags> {
        let capsule = self.resolve(id)?;
        self.cache.metadata(&capsule.path)
    }

    /// Metadata flags of every capsule, scanned on the worker pool
    pub fn scan_all(&self) -> Result<BTreeMap<PathBuf, MetadataFlags>> {
        self.cache.metadata_all()
    }

    pub fn manifest(&self, id: &str) -> Result<Option<Manifest>> {
        let capsule = self.resolve(id)?;
        self.store.read_manifest(&capsule.path)
    }

    pub fn artifacts(&self, id: &str) -> Result<Vec<Artifact>> {
        let capsule = self.resolve(id)?;
        self.store.list_artifacts(&capsule.path)
    }

    pub fn read_artifact(&self, id: &str, artifact: &str) -> Result<Vec<u8>> {
        let capsule = self.resolve(id)?;
        self.store.read_member(&capsule.path, artifact)
    }

    pub fn extract(&self, id: &str, dest: &Path) -> Result<usize> {
        let capsule = self.resolve(id)?;
        self.store.extract(&capsule.path, dest)
    }

    pub fn detect(&self, id: &str) -> Result<Detection> {
        let capsule = self.resolve(id)?;
        self.pipeline.detect_format(&capsule.path)
    }

    pub fn plugins(&self) -> Vec<PluginDescriptor> {
        self.plugins.list()
    }

    pub fn bibles(&self) -> Result<Arc<Vec<BibleEntity>>> {
        self.cache.bibles()
    }

    pub fn corpus(&self, id: &str) -> Result<Arc<Corpus>> {
        self.cache.corpus(id)
    }

    pub fn modules(&self) -> Result<Arc<ModuleListing>> {
        self.cache.modules()
    }

    pub fn external_modules(&self) -> Result<Arc<Vec<ExternalModule>>> {
        self.cache.external_modules()
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.cache.stats()
    }

    pub fn store_stats(&self) -> StoreStats {
        self.store.stats()
    }

    // Mutations

    pub fn install(&self, source: &Path) -> Result<CapsuleInfo> {
        let capsule = self.store.install(source)?;
        self.cache.invalidate_capsule(&capsule.id, &capsule.path);
        Ok(capsule)
    }

    pub fn delete(&self, id: &str) -> Result<PathBuf> {
        let capsule = self.resolve(id)?;
        let removed = self.store.delete(&capsule.id)?;
        self.cache.invalidate_capsule(&capsule.id, &removed);
        Ok(removed)
    }

    pub fn generate_ir(&self, id: &str) -> Result<ConversionResult> {
        let capsule = self.resolve(id)?;
        let result = self.pipeline.generate_ir(&capsule.path);
        self.after_rewrite(&capsule, result.as_ref().ok());
        result
    }

    /// Generate IR for every capsule that has none yet
    ///
    /// `-old` backups are left alone.
    pub fn generate_ir_all(&self) -> Result<Vec<ConversionResult>> {
        let flags = self.scan_all()?;
        let pending: Vec<PathBuf> = flags
            .into_iter()
            .filter(|(path, f)| !f.has_ir && !is_backup_path(path))
            .map(|(path, _)| path)
            .collect();
        debug!("Generating IR for {} capsules", pending.len());

        let results = self.pipeline.generate_ir_batch(pending, self.max_workers);
        if results.iter().any(|r| r.success) {
            self.cache.invalidate_all();
        }
        Ok(results)
    }

    pub fn convert(&self, id: &str, target: &str) -> Result<ConversionResult> {
        let capsule = self.resolve(id)?;
        let result = self.pipeline.convert(&capsule.path, target);
        self.after_rewrite(&capsule, result.as_ref().ok());
        result
    }

    /// Start the cache pre-refresh loop if configured; needs a tokio runtime
    pub fn start_background_refresh(&self) -> Option<RefreshHandle> {
        self.background_refresh
            .then(|| self.cache.clone().spawn_refresh_loop())
    }

    /// A rewrite swaps the capsule file and adds an `-old` backup
    fn after_rewrite(&self, capsule: &CapsuleInfo, result: Option<&ConversionResult>) {
        // Failed rewrites restore the original but may have touched its stamp
        self.cache.invalidate_capsule(&capsule.id, &capsule.path);
        if let Some(backup) = result.and_then(|r| r.original_path.as_deref()) {
            self.cache.invalidate_capsule(&capsule.id, backup);
        }
    }
}

fn is_backup_path(path: &Path) -> bool {
    path.file_name()
        .is_some_and(|name| is_backup_name(&name.to_string_lossy()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::archive;
    use crate::plugin::Posture;
    use std::fs;
    use tempfile::TempDir;

    fn library(dir: &Path) -> Library {
        Library::new(
            ArchiveStore::new(dir),
            PluginRegistry::with_builtins(Posture::Permissive),
            CacheSettings::default(),
        )
    }

    fn kjv_capsule(dir: &Path) -> PathBuf {
        let staging = TempDir::new().unwrap();
        fs::create_dir_all(staging.path().join("mods.d")).unwrap();
        fs::write(
            staging.path().join("mods.d/kjv.conf"),
            "[KJV]\nDataPath=./modules/texts/kjv/\nModDrv=RawText\nLang=en\n",
        )
        .unwrap();
        fs::create_dir_all(staging.path().join("modules/texts/kjv")).unwrap();
        fs::write(staging.path().join("modules/texts/kjv/gen.txt"), "In the beginning").unwrap();
        let dest = dir.join("kjv.tar.gz");
        archive::create(staging.path(), &dest, "kjv").unwrap();
        dest
    }

    #[test]
    fn test_generate_ir_invalidates_listing() {
        let dir = TempDir::new().unwrap();
        kjv_capsule(dir.path());
        let lib = library(dir.path());

        assert_eq!(lib.list().unwrap().len(), 1);
        assert!(!lib.metadata("kjv").unwrap().has_ir);

        let result = lib.generate_ir("KJV").unwrap();
        assert!(result.success);

        let ids: Vec<String> = lib.list().unwrap().iter().map(|c| c.id.clone()).collect();
        assert_eq!(ids, vec!["kjv", "kjv-old"]);
        assert!(lib.metadata("kjv").unwrap().has_ir);
        assert_eq!(lib.corpus("kjv").unwrap().document.documents.len(), 1);
    }

    #[test]
    fn test_install_and_delete_invalidate() {
        let dir = TempDir::new().unwrap();
        let elsewhere = TempDir::new().unwrap();
        let source = kjv_capsule(elsewhere.path());
        let lib = library(dir.path());

        assert!(lib.list().unwrap().is_empty());
        lib.install(&source).unwrap();
        assert_eq!(lib.list().unwrap().len(), 1);

        lib.delete("kjv").unwrap();
        assert!(lib.list().unwrap().is_empty());
        assert!(lib.resolve("kjv").is_err());
    }

    #[test]
    fn test_resolve_falls_back_when_listing_is_stale() {
        let dir = TempDir::new().unwrap();
        let lib = library(dir.path());
        assert!(lib.list().unwrap().is_empty());

        // Added behind the cache's back
        kjv_capsule(dir.path());
        assert_eq!(lib.resolve("kjv").unwrap().id, "kjv");
    }

    #[test]
    fn test_generate_ir_all_skips_capsules_with_ir() {
        let dir = TempDir::new().unwrap();
        kjv_capsule(dir.path());
        let lib = library(dir.path());

        let first = lib.generate_ir_all().unwrap();
        assert_eq!(first.len(), 1);
        assert!(first[0].success);

        // kjv now has IR; the kjv-old backup is never a target
        let backup = dir.path().join("kjv-old.tar.gz");
        let backup_bytes = fs::read(&backup).unwrap();
        let second = lib.generate_ir_all().unwrap();
        assert!(second.is_empty());
        assert_eq!(fs::read(&backup).unwrap(), backup_bytes);
        assert!(!dir.path().join("kjv-old-old.tar.gz").exists());
    }

    #[test]
    fn test_backup_is_not_a_bible() {
        let dir = TempDir::new().unwrap();
        kjv_capsule(dir.path());
        let lib = library(dir.path());

        lib.generate_ir("kjv").unwrap();
        let ids: Vec<String> = lib.bibles().unwrap().iter().map(|b| b.id.clone()).collect();
        assert_eq!(ids, vec!["kjv"]);
        assert_eq!(lib.modules().unwrap().installable.len(), 1);
    }
}
