// src/plugin/registry.rs
//! Plugin registry: discovery, posture, lookup and invocation

use super::descriptor::{DESCRIPTOR_FILE, PluginDescriptor};
use super::embedded::{EmbeddedPlugin, IrJson, SwordPure};
use super::executor::{DEFAULT_PLUGIN_TIMEOUT, PluginExecutor};
use super::protocol::{DetectResult, EmitOutput, ExtractIrResult, IrOutput, Request, Response};
use crate::error::{Error, Result};
use crate::filesystem::path::ensure_within;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use strum_macros::{AsRefStr, Display, EnumString};
use tracing::{debug, info, warn};

/// Which plugins a process may run
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, Display, EnumString, AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Posture {
    /// Embedded plugins only
    #[default]
    Permissive,
    /// Embedded plugins plus one whitelisted external directory
    Restricted,
}

/// Registry of embedded and external plugins
pub struct PluginRegistry {
    posture: Posture,
    external_dir: Option<PathBuf>,
    embedded: BTreeMap<String, Arc<dyn EmbeddedPlugin>>,
    external: BTreeMap<String, PluginDescriptor>,
    executor: PluginExecutor,
}

impl PluginRegistry {
    /// Empty registry
    pub fn new(posture: Posture) -> Self {
        Self {
            posture,
            external_dir: None,
            embedded: BTreeMap::new(),
            external: BTreeMap::new(),
            executor: PluginExecutor::new(DEFAULT_PLUGIN_TIMEOUT),
        }
    }

    /// Registry with the compiled-in plugins
    pub fn with_builtins(posture: Posture) -> Self {
        let mut registry = Self::new(posture);
        registry.register_embedded(Arc::new(SwordPure));
        registry.register_embedded(Arc::new(IrJson));
        registry
    }

    /// Registry with builtins and, under the restricted posture, the
    /// plugins found in `external_dir`
    pub fn load(posture: Posture, external_dir: Option<&Path>, timeout: Duration) -> Result<Self> {
        let mut registry = Self::with_builtins(posture).with_timeout(timeout);
        match (posture, external_dir) {
            (Posture::Restricted, Some(dir)) => {
                registry.discover(dir)?;
            }
            (Posture::Restricted, None) => {
                warn!("Restricted plugin posture without an external directory; embedded plugins only");
            }
            (Posture::Permissive, Some(dir)) => {
                info!("Ignoring external plugin directory {} under permissive posture", dir.display());
            }
            (Posture::Permissive, None) => {}
        }
        Ok(registry)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.executor = PluginExecutor::new(timeout);
        self
    }

    pub fn posture(&self) -> Posture {
        self.posture
    }

    pub fn register_embedded(&mut self, plugin: Arc<dyn EmbeddedPlugin>) {
        let id = plugin.descriptor().id();
        if self.external.remove(&id).is_some() {
            debug!("Embedded plugin {} shadows an external plugin", id);
        }
        self.embedded.insert(id, plugin);
    }

    /// Load every `*/plugin.json` under `dir`; returns the number registered
    ///
    /// Only valid under the restricted posture. Plugins whose entrypoint
    /// resolves outside `dir` are skipped. An external plugin never replaces
    /// an embedded one with the same ID.
    pub fn discover(&mut self, dir: &Path) -> Result<usize> {
        if self.posture != Posture::Restricted {
            return Err(Error::PluginValidation(
                "external plugins require the restricted posture".to_string(),
            ));
        }
        if !dir.is_dir() {
            return Err(Error::NotFound(format!("plugin directory {}", dir.display())));
        }
        self.external_dir = Some(dir.to_path_buf());

        let mut subdirs: Vec<PathBuf> = fs::read_dir(dir)?
            .filter_map(|e| e.ok())
            .map(|e| e.path())
            .filter(|p| p.is_dir() && p.join(DESCRIPTOR_FILE).is_file())
            .collect();
        subdirs.sort();

        let mut loaded = 0usize;
        for subdir in subdirs {
            let descriptor = match PluginDescriptor::load(&subdir) {
                Ok(d) => d,
                Err(e) => {
                    warn!("Skipping plugin in {}: {}", subdir.display(), e);
                    continue;
                }
            };
            if let Err(e) = ensure_within(dir, &subdir.join(&descriptor.entrypoint)) {
                warn!("Skipping plugin {}: {}", descriptor.id(), e);
                continue;
            }

            let id = descriptor.id();
            if self.embedded.contains_key(&id) {
                debug!("External plugin {} shadowed by embedded plugin", id);
                continue;
            }
            info!("Discovered external plugin {} v{}", id, descriptor.version);
            self.external.insert(id, descriptor);
            loaded += 1;
        }
        Ok(loaded)
    }

    /// Every visible plugin, sorted by ID
    pub fn list(&self) -> Vec<PluginDescriptor> {
        let mut all: BTreeMap<String, PluginDescriptor> = self
            .external
            .iter()
            .map(|(id, d)| (id.clone(), d.clone()))
            .collect();
        for (id, plugin) in &self.embedded {
            all.insert(id.clone(), plugin.descriptor());
        }
        all.into_values().collect()
    }

    pub fn get(&self, id: &str) -> Option<PluginDescriptor> {
        self.embedded
            .get(id)
            .map(|p| p.descriptor())
            .or_else(|| self.external.get(id).cloned())
    }

    /// Plugins that turn `format` into IR, embedded first
    pub fn extractors_for(&self, format: &str) -> Vec<PluginDescriptor> {
        self.matching(|d| d.is_extractor_for(format))
    }

    /// Every plugin producing IR, embedded first
    pub fn extractors(&self) -> Vec<PluginDescriptor> {
        self.matching(|d| d.produces("ir"))
    }

    pub fn find_extractor(&self, format: &str) -> Option<PluginDescriptor> {
        self.extractors_for(format).into_iter().next()
    }

    pub fn find_emitter(&self, format: &str) -> Option<PluginDescriptor> {
        self.matching(|d| d.is_emitter_for(format)).into_iter().next()
    }

    fn matching(&self, pred: impl Fn(&PluginDescriptor) -> bool) -> Vec<PluginDescriptor> {
        let embedded = self.embedded.values().map(|p| p.descriptor());
        let external = self.external.values().cloned();
        embedded.chain(external).filter(|d| pred(d)).collect()
    }

    /// Send one request to a plugin
    pub fn invoke(&self, id: &str, request: &Request) -> Result<Response> {
        if let Some(plugin) = self.embedded.get(id) {
            debug!("Invoking embedded plugin {} ({})", id, request.command);
            return Ok(plugin.handle(request));
        }

        let descriptor = self
            .external
            .get(id)
            .ok_or_else(|| Error::PluginNotFound(id.to_string()))?;
        let (root, plugin_dir) = match (&self.external_dir, &descriptor.dir) {
            (Some(root), Some(dir)) if self.posture == Posture::Restricted => (root, dir),
            _ => {
                return Err(Error::PluginValidation(format!(
                    "external plugin {} is not permitted under the {} posture",
                    id, self.posture
                )));
            }
        };

        // Checked again at execution time; the tree may have changed since discovery
        let entrypoint = ensure_within(root, &plugin_dir.join(&descriptor.entrypoint))?;
        self.executor.run(id, &entrypoint, plugin_dir, request)
    }

    pub fn detect(&self, id: &str, path: &Path) -> Result<DetectResult> {
        self.invoke(id, &Request::detect(path))?.decode(id, "detect")
    }

    pub fn extract_ir(&self, id: &str, input: &Path, out_dir: &Path) -> Result<IrOutput> {
        self.invoke(id, &Request::extract_ir(input, out_dir))?
            .decode::<ExtractIrResult>(id, "extract-ir")?
            .into_output(id)
    }

    pub fn emit_native(&self, id: &str, ir_path: &Path, out_dir: &Path) -> Result<EmitOutput> {
        self.invoke(id, &Request::emit_native(ir_path, out_dir))?
            .decode(id, "emit-native")
    }
}

impl Default for PluginRegistry {
    fn default() -> Self {
        Self::with_builtins(Posture::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn write_plugin(root: &Path, name: &str, entrypoint: &str, inputs: &str, outputs: &str) {
        let dir = root.join(name);
        fs::create_dir_all(&dir).unwrap();
        fs::write(
            dir.join(DESCRIPTOR_FILE),
            format!(
                r#"{{"plugin_id":"{}","kind":"format","version":"1.0.0","entrypoint":"{}",
                    "capabilities":{{"inputs":[{}],"outputs":[{}]}}}}"#,
                name, entrypoint, inputs, outputs
            ),
        )
        .unwrap();
        fs::write(dir.join("run.sh"), "#!/bin/sh\n").unwrap();
    }

    #[test]
    fn test_builtins_listed_sorted() {
        let registry = PluginRegistry::default();
        let ids: Vec<_> = registry.list().into_iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["format.ir-json", "format.sword-pure"]);
    }

    #[test]
    fn test_lookup_by_capability() {
        let registry = PluginRegistry::default();
        assert_eq!(registry.find_extractor("sword").unwrap().id(), "format.sword-pure");
        assert_eq!(registry.find_emitter("json").unwrap().id(), "format.ir-json");
        assert!(registry.find_extractor("osis").is_none());
    }

    #[test]
    fn test_permissive_rejects_discovery() {
        let dir = TempDir::new().unwrap();
        let mut registry = PluginRegistry::with_builtins(Posture::Permissive);
        assert!(matches!(registry.discover(dir.path()), Err(Error::PluginValidation(_))));
    }

    #[test]
    fn test_restricted_discovers_and_validates() {
        let dir = TempDir::new().unwrap();
        write_plugin(dir.path(), "osis", "run.sh", r#""osis""#, r#""ir""#);
        write_plugin(dir.path(), "escape", "../../outside.sh", r#""usx""#, r#""ir""#);
        write_plugin(dir.path(), "sword-pure", "run.sh", r#""sword""#, r#""ir""#);

        let registry =
            PluginRegistry::load(Posture::Restricted, Some(dir.path()), Duration::from_secs(5)).unwrap();
        let ids: Vec<_> = registry.list().into_iter().map(|d| d.id()).collect();
        assert_eq!(ids, vec!["format.ir-json", "format.osis", "format.sword-pure"]);
        assert!(registry.get("format.sword-pure").unwrap().is_embedded());
        assert_eq!(registry.find_extractor("osis").unwrap().id(), "format.osis");
    }

    #[test]
    fn test_permissive_load_ignores_external_dir() {
        let dir = TempDir::new().unwrap();
        write_plugin(dir.path(), "osis", "run.sh", r#""osis""#, r#""ir""#);
        let registry =
            PluginRegistry::load(Posture::Permissive, Some(dir.path()), Duration::from_secs(5)).unwrap();
        assert!(registry.get("format.osis").is_none());
    }

    #[test]
    fn test_invoke_unknown_plugin() {
        let registry = PluginRegistry::default();
        let err = registry.invoke("format.nope", &Request::detect(Path::new("/"))).unwrap_err();
        assert!(matches!(err, Error::PluginNotFound(_)));
    }

    #[test]
    fn test_posture_strings() {
        assert_eq!("restricted".parse::<Posture>().unwrap(), Posture::Restricted);
        assert_eq!(Posture::Permissive.to_string(), "permissive");
    }
}
