// src/cache/mod.rs
//! TTL caches over the archive store
//!
//! Every cached collection follows the same pattern ([`CacheEntry`]): a
//! value, a populated flag and a build timestamp behind one read/write lock,
//! rebuilt lazily on the first read after expiry or invalidation.

mod entry;
mod metadata;
mod service;

pub use entry::{CacheEntry, EntryStats, KeyedCache};
pub use metadata::{FileStamp, MetadataCache};
pub use service::{
    BibleEntity, CacheService, CacheSettings, CacheStats, Corpus, ExternalKind, ExternalModule,
    ModuleInfo, ModuleListing, ModuleLocation, RefreshHandle,
};
