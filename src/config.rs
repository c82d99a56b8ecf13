// src/config.rs
//! Configuration file parsing
//!
//! Supports TOML configuration files with the following sections:
//! - [storage] - Capsule directory, SWORD directory, metadata snapshot
//! - [plugins] - Plugin posture, external plugin directory, timeout
//! - [cache] - TTLs and background refresh
//! - [scan] - Worker and archive-read limits
//!
//! Every field has a default, so an empty file is a valid configuration.

use crate::cache::CacheSettings;
use crate::capsule::DEFAULT_ARCHIVE_CONCURRENCY;
use crate::error::{Error, Result};
use crate::plugin::Posture;
use crate::pool::DEFAULT_MAX_WORKERS;
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// TOML configuration file structure
#[derive(Debug, Default, Deserialize)]
pub struct ScriptoriumConfig {
    /// Storage locations
    #[serde(default)]
    pub storage: StorageSection,

    /// Plugin runtime settings
    #[serde(default)]
    pub plugins: PluginsSection,

    /// Cache settings
    #[serde(default)]
    pub cache: CacheSection,

    /// Batch scanning limits
    #[serde(default)]
    pub scan: ScanSection,
}

/// Storage configuration section
#[derive(Debug, Deserialize)]
pub struct StorageSection {
    /// Directory holding capsule archives
    #[serde(default = "default_capsules_dir")]
    pub capsules_dir: PathBuf,

    /// Local SWORD installation (contains `mods.d/`)
    #[serde(default)]
    pub sword_dir: Option<PathBuf>,

    /// Directory of modules managed outside the capsule store
    #[serde(default)]
    pub external_modules_dir: Option<PathBuf>,

    /// Persisted per-capsule metadata; disabled when unset
    #[serde(default)]
    pub metadata_snapshot: Option<PathBuf>,
}

impl Default for StorageSection {
    fn default() -> Self {
        Self {
            capsules_dir: default_capsules_dir(),
            sword_dir: None,
            external_modules_dir: None,
            metadata_snapshot: None,
        }
    }
}

fn default_capsules_dir() -> PathBuf {
    PathBuf::from("capsules")
}

/// Plugin configuration section
#[derive(Debug, Deserialize)]
pub struct PluginsSection {
    /// `permissive` (embedded only) or `restricted` (plus `external_dir`)
    #[serde(default)]
    pub posture: Posture,

    /// Whitelisted external plugin directory
    #[serde(default)]
    pub external_dir: Option<PathBuf>,

    /// Maximum run time of one plugin invocation
    #[serde(default = "default_plugin_timeout")]
    pub timeout: String,
}

impl Default for PluginsSection {
    fn default() -> Self {
        Self {
            posture: Posture::default(),
            external_dir: None,
            timeout: default_plugin_timeout(),
        }
    }
}

fn default_plugin_timeout() -> String {
    "60s".to_string()
}

/// Cache configuration section
#[derive(Debug, Deserialize)]
pub struct CacheSection {
    #[serde(default = "default_listing_ttl")]
    pub capsules_ttl: String,

    #[serde(default = "default_listing_ttl")]
    pub bibles_ttl: String,

    #[serde(default = "default_corpus_ttl")]
    pub corpus_ttl: String,

    #[serde(default = "default_listing_ttl")]
    pub modules_ttl: String,

    #[serde(default = "default_external_ttl")]
    pub external_modules_ttl: String,

    /// Share of a TTL after which background refresh rebuilds an entry
    #[serde(default = "default_refresh_fraction")]
    pub refresh_fraction: f64,

    /// Run the background refresh loop (long-running processes only)
    #[serde(default)]
    pub background_refresh: bool,
}

impl Default for CacheSection {
    fn default() -> Self {
        Self {
            capsules_ttl: default_listing_ttl(),
            bibles_ttl: default_listing_ttl(),
            corpus_ttl: default_corpus_ttl(),
            modules_ttl: default_listing_ttl(),
            external_modules_ttl: default_external_ttl(),
            refresh_fraction: default_refresh_fraction(),
            background_refresh: false,
        }
    }
}

fn default_listing_ttl() -> String {
    "5m".to_string()
}

fn default_corpus_ttl() -> String {
    "10m".to_string()
}

fn default_external_ttl() -> String {
    "15m".to_string()
}

fn default_refresh_fraction() -> f64 {
    0.8
}

/// Scan configuration section
#[derive(Debug, Deserialize)]
pub struct ScanSection {
    /// Upper bound on workers per batch
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,

    /// Archives open for reading at once
    #[serde(default = "default_archive_concurrency")]
    pub archive_concurrency: usize,
}

impl Default for ScanSection {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            archive_concurrency: default_archive_concurrency(),
        }
    }
}

fn default_max_workers() -> usize {
    DEFAULT_MAX_WORKERS
}

fn default_archive_concurrency() -> usize {
    DEFAULT_ARCHIVE_CONCURRENCY
}

impl ScriptoriumConfig {
    /// Load configuration from a TOML file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::Config(format!("failed to read config file {}: {}", path.display(), e))
        })?;
        Self::parse(&content).map_err(|e| match e {
            Error::Config(message) => Error::Config(format!("{}: {}", path.display(), message)),
            other => other,
        })
    }

    /// Parse and validate configuration text
    pub fn parse(content: &str) -> Result<Self> {
        let config: ScriptoriumConfig =
            toml::from_str(content).map_err(|e| Error::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        self.plugin_timeout()?;
        self.cache_settings()?;

        if !(0.0..=1.0).contains(&self.cache.refresh_fraction) || self.cache.refresh_fraction == 0.0 {
            return Err(Error::Config(format!(
                "cache.refresh_fraction must be in (0.0, 1.0], got {}",
                self.cache.refresh_fraction
            )));
        }
        if self.scan.max_workers == 0 {
            return Err(Error::Config("scan.max_workers must be at least 1".to_string()));
        }
        if self.scan.archive_concurrency == 0 {
            return Err(Error::Config(
                "scan.archive_concurrency must be at least 1".to_string(),
            ));
        }
        if self.plugins.posture == Posture::Permissive && self.plugins.external_dir.is_some() {
            tracing::warn!("plugins.external_dir is ignored under the permissive posture");
        }
        Ok(())
    }

    pub fn plugin_timeout(&self) -> Result<Duration> {
        parse_duration(&self.plugins.timeout)
            .map_err(|e| Error::Config(format!("plugins.timeout: {}", e)))
    }

    /// Cache tuning derived from the `[cache]`, `[storage]` and `[scan]` sections
    pub fn cache_settings(&self) -> Result<CacheSettings> {
        let ttl = |key: &str, value: &str| {
            parse_duration(value).map_err(|e| Error::Config(format!("cache.{}: {}", key, e)))
        };
        Ok(CacheSettings {
            capsules_ttl: ttl("capsules_ttl", &self.cache.capsules_ttl)?,
            bibles_ttl: ttl("bibles_ttl", &self.cache.bibles_ttl)?,
            corpus_ttl: ttl("corpus_ttl", &self.cache.corpus_ttl)?,
            modules_ttl: ttl("modules_ttl", &self.cache.modules_ttl)?,
            external_modules_ttl: ttl("external_modules_ttl", &self.cache.external_modules_ttl)?,
            refresh_fraction: self.cache.refresh_fraction,
            max_workers: self.scan.max_workers,
            sword_dir: self.storage.sword_dir.clone(),
            external_modules_dir: self.storage.external_modules_dir.clone(),
            metadata_snapshot: self.storage.metadata_snapshot.clone(),
        })
    }
}

/// Parse a duration string like "60s", "5m", "1h" or "7d"; a bare number
/// is seconds
pub fn parse_duration(s: &str) -> std::result::Result<Duration, String> {
    let s = s.trim().to_lowercase();

    let (num_str, multiplier) = if let Some(n) = s.strip_suffix('d') {
        (n, 24 * 60 * 60)
    } else if let Some(n) = s.strip_suffix('h') {
        (n, 60 * 60)
    } else if let Some(n) = s.strip_suffix('m') {
        (n, 60)
    } else if let Some(n) = s.strip_suffix('s') {
        (n, 1)
    } else {
        // Assume seconds
        (s.as_str(), 1)
    };

    let num: u64 = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid duration: {}", s))?;
    if num == 0 {
        return Err("duration must be greater than zero".to_string());
    }

    Ok(Duration::from_secs(num * multiplier))
}
