// src/cache/service.rs
//! The cache service
//!
//! One [`CacheService`] is constructed per process and shared by reference.
//! It memoizes the expensive read paths of the archive store:
//!
//! - the capsule listing
//! - Bible entities (capsules that hold a Bible text or its IR)
//! - parsed IR corpora, one per capsule
//! - installed and installable SWORD modules
//! - the external module directory listing
//! - per-capsule metadata flags (see [`MetadataCache`])
//!
//! Mutations never go through this type; callers report them with
//! [`CacheService::invalidate_capsule`] or [`CacheService::invalidate_all`].

use super::entry::{CacheEntry, EntryStats, KeyedCache};
use super::metadata::MetadataCache;
use crate::capsule::archive::is_ir_member;
use crate::capsule::id::{capsule_id, has_listed_extension, ids_match};
use crate::capsule::{ArchiveStore, CapsuleInfo, MetadataFlags};
use crate::error::{Error, Result};
use crate::plugin::IrDocument;
use crate::pool::{DEFAULT_MAX_WORKERS, run_bounded};
use crate::sword::{self, MODS_DIR, SwordConf};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// Cache tuning
#[derive(Debug, Clone)]
pub struct CacheSettings {
    pub capsules_ttl: Duration,
    pub bibles_ttl: Duration,
    pub corpus_ttl: Duration,
    pub modules_ttl: Duration,
    pub external_modules_ttl: Duration,
    /// Share of a TTL after which the background loop rebuilds an entry
    pub refresh_fraction: f64,
    pub max_workers: usize,
    /// Root of the local SWORD installation (contains `mods.d/`)
    pub sword_dir: Option<PathBuf>,
    pub external_modules_dir: Option<PathBuf>,
    pub metadata_snapshot: Option<PathBuf>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capsules_ttl: Duration::from_secs(5 * 60),
            bibles_ttl: Duration::from_secs(5 * 60),
            corpus_ttl: Duration::from_secs(10 * 60),
            modules_ttl: Duration::from_secs(5 * 60),
            external_modules_ttl: Duration::from_secs(15 * 60),
            refresh_fraction: 0.8,
            max_workers: DEFAULT_MAX_WORKERS,
            sword_dir: None,
            external_modules_dir: None,
            metadata_snapshot: None,
        }
    }
}

/// A capsule presented as a Bible
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct BibleEntity {
    pub id: String,
    pub title: String,
    pub language: String,
    pub source_format: String,
    pub path: PathBuf,
    pub has_ir: bool,
    pub is_cas: bool,
}

/// Parsed IR of one capsule
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct Corpus {
    pub capsule_id: String,
    /// Member the IR was read from
    pub member: String,
    pub document: IrDocument,
}

/// Where a SWORD module lives
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum ModuleLocation {
    /// Under the local SWORD directory
    Installed,
    /// Inside a capsule, ready to install
    Capsule { capsule_id: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModuleInfo {
    pub name: String,
    pub description: String,
    pub language: String,
    pub driver: String,
    pub location: ModuleLocation,
}

impl ModuleInfo {
    fn from_conf(conf: &SwordConf, location: ModuleLocation) -> Self {
        Self {
            name: conf.name.clone(),
            description: conf.description().to_string(),
            language: conf.language().to_string(),
            driver: conf.driver().to_string(),
            location,
        }
    }
}

/// Modules that can be managed: installed ones and those in capsules
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ModuleListing {
    pub installed: Vec<ModuleInfo>,
    pub installable: Vec<ModuleInfo>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ExternalKind {
    Capsule,
    ModuleTree,
}

/// Entry of the external module directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ExternalModule {
    pub name: String,
    pub path: PathBuf,
    pub kind: ExternalKind,
}

/// Counters for every cache
#[derive(Debug, Clone, Serialize)]
pub struct CacheStats {
    pub entries: Vec<EntryStats>,
    pub metadata_entries: usize,
    pub metadata_scans: u64,
}

impl CacheStats {
    /// Rebuild count of the named cache
    pub fn rebuilds(&self, name: &str) -> u64 {
        self.entries
            .iter()
            .find(|e| e.name == name)
            .map(|e| e.rebuilds)
            .unwrap_or(0)
    }
}

/// Memoized views over the archive store
pub struct CacheService {
    store: ArchiveStore,
    settings: CacheSettings,
    capsules: CacheEntry<Arc<Vec<CapsuleInfo>>>,
    bibles: CacheEntry<Arc<Vec<BibleEntity>>>,
    corpora: KeyedCache<Arc<Corpus>>,
    modules: CacheEntry<Arc<ModuleListing>>,
    external_modules: CacheEntry<Arc<Vec<ExternalModule>>>,
    metadata: MetadataCache,
}

impl CacheService {
    pub fn new(store: ArchiveStore, settings: CacheSettings) -> Self {
        let metadata = match &settings.metadata_snapshot {
            Some(path) => MetadataCache::with_snapshot(path),
            None => MetadataCache::new(),
        };
        Self {
            capsules: CacheEntry::new("capsules", settings.capsules_ttl),
            bibles: CacheEntry::new("bibles", settings.bibles_ttl),
            corpora: KeyedCache::new("corpora", settings.corpus_ttl),
            modules: CacheEntry::new("modules", settings.modules_ttl),
            external_modules: CacheEntry::new("external-modules", settings.external_modules_ttl),
            metadata,
            store,
            settings,
        }
    }

    pub fn settings(&self) -> &CacheSettings {
        &self.settings
    }

    pub fn capsules(&self) -> Result<Arc<Vec<CapsuleInfo>>> {
        self.capsules.get_or_build(|| self.build_capsules())
    }

    /// Flags for one capsule
    pub fn metadata(&self, path: &Path) -> Result<MetadataFlags> {
        self.metadata.get(&self.store, path)
    }

    /// Flags for every listed capsule
    pub fn metadata_all(&self) -> Result<BTreeMap<PathBuf, MetadataFlags>> {
        let paths: Vec<PathBuf> = self.capsules()?.iter().map(|c| c.path.clone()).collect();
        Ok(self
            .metadata
            .get_many(&self.store, &paths, self.settings.max_workers))
    }

    pub fn bibles(&self) -> Result<Arc<Vec<BibleEntity>>> {
        self.bibles.get_or_build(|| self.build_bibles())
    }

    /// Parsed IR of a capsule
    pub fn corpus(&self, id: &str) -> Result<Arc<Corpus>> {
        let capsule = self.find_capsule(id)?;
        self.corpora
            .get_or_build(&capsule.id, || self.build_corpus(&capsule))
    }

    pub fn modules(&self) -> Result<Arc<ModuleListing>> {
        self.modules.get_or_build(|| self.build_modules())
    }

    pub fn external_modules(&self) -> Result<Arc<Vec<ExternalModule>>> {
        self.external_modules
            .get_or_build(|| self.build_external_modules())
    }

    /// Forget everything derived from one capsule
    ///
    /// The capsule may no longer exist (deleted or renamed to `-old`).
    pub fn invalidate_capsule(&self, id: &str, path: &Path) {
        debug!("Invalidating caches for capsule {}", id);
        self.capsules.invalidate();
        self.bibles.invalidate();
        self.modules.invalidate();
        self.corpora.invalidate(id);
        self.metadata.invalidate(path);
    }

    pub fn invalidate_all(&self) {
        debug!("Invalidating all caches");
        self.capsules.invalidate();
        self.bibles.invalidate();
        self.modules.invalidate();
        self.external_modules.invalidate();
        self.corpora.invalidate_all();
        self.metadata.invalidate_all();
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: vec![
                self.capsules.stats(),
                self.bibles.stats(),
                self.corpora.stats(),
                self.modules.stats(),
                self.external_modules.stats(),
            ],
            metadata_entries: self.metadata.len(),
            metadata_scans: self.metadata.scans(),
        }
    }

    /// Rebuild every populated cache that is near expiry; returns how many
    ///
    /// Failures are logged and the entry is left for the next reader.
    pub fn refresh_due(&self) -> usize {
        let fraction = self.settings.refresh_fraction;
        let mut refreshed = 0usize;
        let mut note = |name: &str, result: Result<()>| match result {
            Ok(()) => refreshed += 1,
            Err(e) => warn!("Background refresh of {} failed: {}", name, e),
        };

        // Capsules first; the other listings are derived from it
        if self.capsules.needs_refresh(fraction) {
            note("capsules", self.capsules.refresh(|| self.build_capsules()).map(drop));
        }
        if self.bibles.needs_refresh(fraction) {
            note("bibles", self.bibles.refresh(|| self.build_bibles()).map(drop));
        }
        if self.modules.needs_refresh(fraction) {
            note("modules", self.modules.refresh(|| self.build_modules()).map(drop));
        }
        if self.external_modules.needs_refresh(fraction) {
            note(
                "external-modules",
                self.external_modules
                    .refresh(|| self.build_external_modules())
                    .map(drop),
            );
        }
        for id in self.corpora.due_for_refresh(fraction) {
            let result = self.find_capsule(&id).and_then(|capsule| {
                self.corpora
                    .entry(&id)
                    .refresh(|| self.build_corpus(&capsule))
                    .map(drop)
            });
            if result.is_err() {
                // Capsule vanished or lost its IR; stop refreshing it
                self.corpora.remove(&id);
            }
            note("corpus", result);
        }

        if refreshed > 0 {
            debug!("Background refresh rebuilt {} caches", refreshed);
        }
        refreshed
    }

    /// Interval of the background loop: the refresh fraction of the shortest TTL
    pub fn refresh_interval(&self) -> Duration {
        let shortest = [
            self.settings.capsules_ttl,
            self.settings.bibles_ttl,
            self.settings.corpus_ttl,
            self.settings.modules_ttl,
            self.settings.external_modules_ttl,
        ]
        .into_iter()
        .min()
        .unwrap_or(Duration::from_secs(60));
        shortest
            .mul_f64(self.settings.refresh_fraction.clamp(0.05, 1.0))
            .max(Duration::from_millis(10))
    }

    /// Start the background pre-refresh loop on the current tokio runtime
    pub fn spawn_refresh_loop(self: Arc<Self>) -> RefreshHandle {
        let interval = self.refresh_interval();
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let task = tokio::spawn(run_refresh_loop(self, interval, shutdown_rx));
        info!("Cache refresh loop started (every {:?})", interval);
        RefreshHandle {
            shutdown: shutdown_tx,
            task,
        }
    }

    fn find_capsule(&self, id: &str) -> Result<CapsuleInfo> {
        self.capsules()?
            .iter()
            .find(|c| ids_match(&c.id, id))
            .cloned()
            .ok_or_else(|| Error::CapsuleNotFound(id.to_string()))
    }

    fn build_capsules(&self) -> Result<Arc<Vec<CapsuleInfo>>> {
        Ok(Arc::new(self.store.list_capsules()?))
    }

    fn build_bibles(&self) -> Result<Arc<Vec<BibleEntity>>> {
        let jobs: Vec<CapsuleInfo> = self
            .capsules()?
            .iter()
            .filter(|c| !c.is_backup())
            .cloned()
            .collect();
        let paths: Vec<PathBuf> = jobs.iter().map(|c| c.path.clone()).collect();
        let flags = self
            .metadata
            .get_many(&self.store, &paths, self.settings.max_workers);

        let mut bibles: Vec<BibleEntity> = run_bounded(jobs, self.settings.max_workers, |capsule| {
            let manifest = match self.store.read_manifest(&capsule.path) {
                Ok(m) => m,
                Err(e) => {
                    warn!("Skipping {} in Bible listing: {}", capsule.id, e);
                    return None;
                }
            };
            let flags = flags.get(&capsule.path).copied().unwrap_or_default();
            let is_bible = manifest.as_ref().is_some_and(|m| m.is_bible());
            if !is_bible && !flags.has_ir {
                return None;
            }
            let manifest = manifest.unwrap_or_default();
            Some(BibleEntity {
                title: if manifest.title.is_empty() {
                    capsule.id.clone()
                } else {
                    manifest.title
                },
                id: capsule.id,
                language: manifest.language,
                source_format: manifest.source_format,
                path: capsule.path,
                has_ir: flags.has_ir,
                is_cas: flags.is_cas,
            })
        })
        .into_iter()
        .flatten()
        .collect();

        bibles.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(Arc::new(bibles))
    }

    fn build_corpus(&self, capsule: &CapsuleInfo) -> Result<Arc<Corpus>> {
        let preferred = format!("{}.ir.json", capsule.id);
        let members = self.store.list_members(&capsule.path)?;
        let member = members
            .iter()
            .find(|m| **m == preferred)
            .or_else(|| members.iter().find(|m| is_ir_member(Path::new(m.as_str()))))
            .cloned()
            .ok_or_else(|| Error::ArtifactNotFound {
                capsule: capsule.id.clone(),
                artifact: preferred,
            })?;

        let bytes = self.store.read_member(&capsule.path, &member)?;
        let document: IrDocument = serde_json::from_slice(&bytes).map_err(|e| {
            warn!("Unparseable IR {} in {}: {}", member, capsule.path.display(), e);
            Error::MalformedArtifact {
                capsule: capsule.id.clone(),
                artifact: member.clone(),
            }
        })?;
        debug!(
            "Parsed corpus {} ({} documents)",
            capsule.id,
            document.documents.len()
        );
        Ok(Arc::new(Corpus {
            capsule_id: capsule.id.clone(),
            member,
            document,
        }))
    }

    fn build_modules(&self) -> Result<Arc<ModuleListing>> {
        let mut installed = Vec::new();
        if let Some(dir) = &self.settings.sword_dir {
            for (_, conf) in sword::read_confs(dir)? {
                installed.push(ModuleInfo::from_conf(&conf, ModuleLocation::Installed));
            }
        }

        let capsules: Vec<CapsuleInfo> = self
            .capsules()?
            .iter()
            .filter(|c| !c.is_backup())
            .cloned()
            .collect();
        let mut installable: Vec<ModuleInfo> =
            run_bounded(capsules, self.settings.max_workers, |capsule| {
                self.capsule_modules(&capsule).unwrap_or_else(|e| {
                    warn!("Skipping {} in module listing: {}", capsule.id, e);
                    Vec::new()
                })
            })
            .into_iter()
            .flatten()
            .collect();

        installed.sort_by(|a, b| a.name.cmp(&b.name));
        installable.sort_by(|a, b| a.name.cmp(&b.name).then_with(|| location_key(a).cmp(location_key(b))));
        Ok(Arc::new(ModuleListing {
            installed,
            installable,
        }))
    }

    /// Modules shipped inside one capsule
    fn capsule_modules(&self, capsule: &CapsuleInfo) -> Result<Vec<ModuleInfo>> {
        let mut modules = Vec::new();
        for member in self.store.list_members(&capsule.path)? {
            let path = Path::new(&member);
            let in_mods_dir = path.parent().is_some_and(|p| p == Path::new(MODS_DIR));
            let is_conf = path
                .extension()
                .is_some_and(|e| e.eq_ignore_ascii_case("conf"));
            if !in_mods_dir || !is_conf {
                continue;
            }
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            let bytes = self.store.read_member(&capsule.path, &member)?;
            let conf = SwordConf::parse(&String::from_utf8_lossy(&bytes), &stem);
            modules.push(ModuleInfo::from_conf(
                &conf,
                ModuleLocation::Capsule {
                    capsule_id: capsule.id.clone(),
                },
            ));
        }
        Ok(modules)
    }

    fn build_external_modules(&self) -> Result<Arc<Vec<ExternalModule>>> {
        let Some(dir) = &self.settings.external_modules_dir else {
            return Ok(Arc::default());
        };
        if !dir.is_dir() {
            return Ok(Arc::default());
        }

        let mut found = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let file_name = path
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_default();
            if path.is_dir() && sword::is_module_tree(&path) {
                found.push(ExternalModule {
                    name: file_name,
                    path,
                    kind: ExternalKind::ModuleTree,
                });
            } else if path.is_file() && has_listed_extension(&file_name) {
                found.push(ExternalModule {
                    name: capsule_id(&file_name).to_string(),
                    path,
                    kind: ExternalKind::Capsule,
                });
            }
        }
        found.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(Arc::new(found))
    }
}

fn location_key(module: &ModuleInfo) -> &str {
    match &module.location {
        ModuleLocation::Installed => "",
        ModuleLocation::Capsule { capsule_id } => capsule_id,
    }
}

/// Owner of the background refresh task
pub struct RefreshHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl RefreshHandle {
    /// Stop the loop and wait for an in-flight refresh to finish
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            warn!("Cache refresh loop ended abnormally: {}", e);
        }
    }

    pub fn is_finished(&self) -> bool {
        self.task.is_finished()
    }
}

async fn run_refresh_loop(
    service: Arc<CacheService>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    loop {
        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let svc = service.clone();
        // Rebuilds read archives; keep them off the async workers
        if let Err(e) = tokio::task::spawn_blocking(move || svc.refresh_due()).await {
            warn!("Cache refresh task failed: {}", e);
        }
    }
    debug!("Cache refresh loop stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capsule::Manifest;
    use crate::capsule::archive;
    use tempfile::TempDir;

    fn make_capsule(capsules: &Path, id: &str, manifest: Option<Manifest>, ir: Option<&str>) {
        let staging = TempDir::new().unwrap();
        fs::create_dir_all(staging.path().join("mods.d")).unwrap();
        fs::write(
            staging.path().join(format!("mods.d/{}.conf", id)),
            format!("[{}]\nDescription={} Bible\nLang=en\nModDrv=zText\n", id.to_uppercase(), id),
        )
        .unwrap();
        if let Some(manifest) = manifest {
            fs::write(staging.path().join("manifest.json"), manifest.to_json().unwrap()).unwrap();
        }
        if let Some(ir) = ir {
            fs::write(staging.path().join(format!("{}.ir.json", id)), ir).unwrap();
        }
        archive::create(staging.path(), &capsules.join(format!("{}.tar.gz", id)), id).unwrap();
    }

    fn bible_manifest(title: &str) -> Manifest {
        let mut manifest = Manifest::new(title);
        manifest.module_type = "bible".to_string();
        manifest
    }

    fn service(dir: &Path) -> CacheService {
        CacheService::new(ArchiveStore::new(dir), CacheSettings::default())
    }

    #[test]
    fn test_capsule_listing_cached_until_invalidated() {
        let dir = TempDir::new().unwrap();
        make_capsule(dir.path(), "kjv", None, None);
        let cache = service(dir.path());

        assert_eq!(cache.capsules().unwrap().len(), 1);
        make_capsule(dir.path(), "web", None, None);
        assert_eq!(cache.capsules().unwrap().len(), 1);

        cache.invalidate_capsule("web", &dir.path().join("web.tar.gz"));
        assert_eq!(cache.capsules().unwrap().len(), 2);
        assert_eq!(cache.stats().rebuilds("capsules"), 2);
    }

    #[test]
    fn test_bibles_from_manifest_or_ir() {
        let dir = TempDir::new().unwrap();
        make_capsule(dir.path(), "kjv", Some(bible_manifest("King James Version")), None);
        make_capsule(dir.path(), "web", None, Some("{}"));
        make_capsule(dir.path(), "notes", None, None);
        let cache = service(dir.path());

        let bibles = cache.bibles().unwrap();
        let ids: Vec<&str> = bibles.iter().map(|b| b.id.as_str()).collect();
        assert_eq!(ids, vec!["kjv", "web"]);
        assert_eq!(bibles[0].title, "King James Version");
        assert!(!bibles[0].has_ir);
        assert_eq!(bibles[1].title, "web");
        assert!(bibles[1].has_ir);
    }

    #[test]
    fn test_corpus_parsed_once() {
        let dir = TempDir::new().unwrap();
        let ir = r#"{"ir_version":"1","id":"kjv","title":"KJV","documents":[{"path":"a.txt","content":"In the beginning"}]}"#;
        make_capsule(dir.path(), "kjv", None, Some(ir));
        let cache = service(dir.path());

        let corpus = cache.corpus("KJV").unwrap();
        assert_eq!(corpus.member, "kjv.ir.json");
        assert_eq!(corpus.document.documents.len(), 1);
        cache.corpus("kjv").unwrap();
        assert_eq!(cache.stats().rebuilds("corpora"), 1);
    }

    #[test]
    fn test_corpus_missing_ir() {
        let dir = TempDir::new().unwrap();
        make_capsule(dir.path(), "kjv", None, None);
        let cache = service(dir.path());
        assert!(matches!(cache.corpus("kjv"), Err(Error::ArtifactNotFound { .. })));
        assert!(matches!(cache.corpus("nope"), Err(Error::CapsuleNotFound(_))));
    }

    #[test]
    fn test_corpus_malformed_ir_is_generic() {
        let dir = TempDir::new().unwrap();
        make_capsule(dir.path(), "kjv", None, Some("{\"ir_version\": [unterminated"));
        let cache = service(dir.path());

        let err = cache.corpus("kjv").unwrap_err();
        assert!(matches!(err, Error::MalformedArtifact { .. }));
        let message = err.to_string();
        assert!(message.contains("kjv.ir.json"));
        assert!(!message.contains("line"));
        assert!(!message.contains("column"));
    }

    #[test]
    fn test_modules_installed_and_installable() {
        let dir = TempDir::new().unwrap();
        let capsules = dir.path().join("capsules");
        fs::create_dir_all(&capsules).unwrap();
        make_capsule(&capsules, "kjv", None, None);

        let sword_dir = dir.path().join("sword");
        fs::create_dir_all(sword_dir.join("mods.d")).unwrap();
        fs::write(sword_dir.join("mods.d/web.conf"), "[WEB]\nDescription=World English Bible\n").unwrap();

        let settings = CacheSettings {
            sword_dir: Some(sword_dir),
            ..Default::default()
        };
        let cache = CacheService::new(ArchiveStore::new(&capsules), settings);
        let listing = cache.modules().unwrap();

        assert_eq!(listing.installed.len(), 1);
        assert_eq!(listing.installed[0].name, "WEB");
        assert_eq!(listing.installable.len(), 1);
        assert_eq!(listing.installable[0].name, "KJV");
        assert_eq!(
            listing.installable[0].location,
            ModuleLocation::Capsule { capsule_id: "kjv".to_string() }
        );
    }

    #[test]
    fn test_external_modules_listing() {
        let dir = TempDir::new().unwrap();
        let external = dir.path().join("external");
        fs::create_dir_all(external.join("tree/mods.d")).unwrap();
        fs::write(external.join("tree/mods.d/a.conf"), "[A]\n").unwrap();
        fs::create_dir_all(external.join("empty")).unwrap();
        fs::write(external.join("asv.tar.xz"), b"").unwrap();
        fs::write(external.join("readme.md"), b"").unwrap();

        let settings = CacheSettings {
            external_modules_dir: Some(external),
            ..Default::default()
        };
        let cache = CacheService::new(ArchiveStore::new(dir.path()), settings);
        let found = cache.external_modules().unwrap();
        let names: Vec<(&str, ExternalKind)> = found.iter().map(|m| (m.name.as_str(), m.kind)).collect();
        assert_eq!(names, vec![("asv", ExternalKind::Capsule), ("tree", ExternalKind::ModuleTree)]);
    }

    #[test]
    fn test_refresh_due_rebuilds_stale_entries() {
        let dir = TempDir::new().unwrap();
        make_capsule(dir.path(), "kjv", None, None);
        let settings = CacheSettings {
            capsules_ttl: Duration::from_millis(100),
            refresh_fraction: 0.5,
            ..Default::default()
        };
        let cache = CacheService::new(ArchiveStore::new(dir.path()), settings);

        // Nothing populated, nothing to refresh
        assert_eq!(cache.refresh_due(), 0);
        cache.capsules().unwrap();
        std::thread::sleep(Duration::from_millis(60));
        assert_eq!(cache.refresh_due(), 1);
        assert_eq!(cache.stats().rebuilds("capsules"), 2);
    }

    #[test]
    fn test_refresh_interval_uses_shortest_ttl() {
        let settings = CacheSettings {
            modules_ttl: Duration::from_secs(10),
            refresh_fraction: 0.5,
            ..Default::default()
        };
        let cache = CacheService::new(ArchiveStore::new("/nonexistent"), settings);
        assert_eq!(cache.refresh_interval(), Duration::from_secs(5));
    }
}
