// src/lib.rs

//! Scriptorium
//!
//! Storage and conversion service for scripture corpora packaged as
//! compressed tar capsules.
//!
//! # Architecture
//!
//! - Capsules: one archive per module, optional manifest, optional IR
//! - Plugins: format extractors and emitters behind a JSON-lines protocol,
//!   embedded or run as whitelisted subprocesses
//! - Conversion: detect, extract IR, emit, then an atomic swap that keeps
//!   the previous capsule as `<id>-old`
//! - Caches: TTL-bounded listings and corpora, invalidated on every mutation

pub mod cache;
pub mod capsule;
pub mod compression;
pub mod config;
pub mod convert;
mod error;
pub mod filesystem;
pub mod hash;
pub mod library;
pub mod plugin;
pub mod pool;
pub mod sword;

pub use cache::{CacheService, CacheSettings};
pub use capsule::{ArchiveStore, CapsuleInfo, Manifest, MetadataFlags};
pub use config::ScriptoriumConfig;
pub use convert::{ConversionPipeline, ConversionResult, LossClass};
pub use error::{Error, Result};
pub use hash::HashAlgorithm;
pub use library::Library;
pub use plugin::{PluginRegistry, Posture};
