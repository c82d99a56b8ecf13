// src/cache/entry.rs
//! TTL-bounded, lazily rebuilt cache cells
//!
//! A [`CacheEntry`] starts empty and is filled on first read. Reads take the
//! read lock and return the cached value while it is fresh. A stale or empty
//! entry is rebuilt under the write lock after re-checking freshness, so
//! concurrent readers that all miss trigger exactly one rebuild.
//!
//! Invalidation clears the `populated` flag and keeps the old value; the
//! next read rebuilds.

use crate::error::Result;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};
use tracing::debug;

struct State<T> {
    value: T,
    populated: bool,
    timestamp: Option<Instant>,
}

impl<T> State<T> {
    fn age(&self) -> Option<Duration> {
        self.timestamp.map(|t| t.elapsed())
    }

    fn is_fresh(&self, ttl: Duration) -> bool {
        self.populated && self.age().is_some_and(|age| age < ttl)
    }
}

/// One cached value
pub struct CacheEntry<T> {
    name: String,
    ttl: Duration,
    state: RwLock<State<T>>,
    rebuilds: AtomicU64,
}

/// Snapshot of an entry's bookkeeping
#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize)]
pub struct EntryStats {
    pub name: String,
    pub populated: bool,
    pub rebuilds: u64,
    pub ttl_secs: u64,
    pub age_secs: Option<u64>,
}

impl<T: Clone + Default> CacheEntry<T> {
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            state: RwLock::new(State {
                value: T::default(),
                populated: false,
                timestamp: None,
            }),
            rebuilds: AtomicU64::new(0),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Cached value, rebuilding with `build` if empty or expired
    ///
    /// A failed build leaves the entry as it was and returns the error.
    pub fn get_or_build<F>(&self, build: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        {
            let state = self.state.read();
            if state.is_fresh(self.ttl) {
                return Ok(state.value.clone());
            }
        }

        let mut state = self.state.write();
        if state.is_fresh(self.ttl) {
            return Ok(state.value.clone());
        }
        self.rebuild(&mut state, build)
    }

    /// Rebuild now, whatever the entry's state
    pub fn refresh<F>(&self, build: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let mut state = self.state.write();
        self.rebuild(&mut state, build)
    }

    fn rebuild<F>(&self, state: &mut State<T>, build: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        let started = Instant::now();
        let value = build()?;
        state.value = value.clone();
        state.populated = true;
        state.timestamp = Some(Instant::now());
        self.rebuilds.fetch_add(1, Ordering::Relaxed);
        debug!("Rebuilt cache {} in {:?}", self.name, started.elapsed());
        Ok(value)
    }

    /// Force a rebuild on the next read
    pub fn invalidate(&self) {
        self.state.write().populated = false;
    }

    pub fn is_populated(&self) -> bool {
        self.state.read().populated
    }

    pub fn is_fresh(&self) -> bool {
        self.state.read().is_fresh(self.ttl)
    }

    /// Last built value regardless of freshness, if one was ever built
    pub fn peek(&self) -> Option<T> {
        let state = self.state.read();
        state.timestamp.map(|_| state.value.clone())
    }

    /// Populated and at least `fraction` of the TTL old
    pub fn needs_refresh(&self, fraction: f64) -> bool {
        let state = self.state.read();
        state.populated
            && state
                .age()
                .is_some_and(|age| age >= self.ttl.mul_f64(fraction.clamp(0.0, 1.0)))
    }

    pub fn rebuilds(&self) -> u64 {
        self.rebuilds.load(Ordering::Relaxed)
    }

    pub fn stats(&self) -> EntryStats {
        let state = self.state.read();
        EntryStats {
            name: self.name.clone(),
            populated: state.populated,
            rebuilds: self.rebuilds(),
            ttl_secs: self.ttl.as_secs(),
            age_secs: state.age().map(|a| a.as_secs()),
        }
    }
}

/// Cache entries addressed by key, sharing one TTL
pub struct KeyedCache<T> {
    name: String,
    ttl: Duration,
    entries: RwLock<HashMap<String, Arc<CacheEntry<T>>>>,
}

impl<T: Clone + Default> KeyedCache<T> {
    pub fn new(name: impl Into<String>, ttl: Duration) -> Self {
        Self {
            name: name.into(),
            ttl,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Entry for `key`, created empty on first use
    pub fn entry(&self, key: &str) -> Arc<CacheEntry<T>> {
        if let Some(entry) = self.entries.read().get(key) {
            return entry.clone();
        }
        self.entries
            .write()
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(CacheEntry::new(format!("{}:{}", self.name, key), self.ttl)))
            .clone()
    }

    pub fn get_or_build<F>(&self, key: &str, build: F) -> Result<T>
    where
        F: FnOnce() -> Result<T>,
    {
        self.entry(key).get_or_build(build)
    }

    pub fn invalidate(&self, key: &str) {
        if let Some(entry) = self.entries.read().get(key) {
            entry.invalidate();
        }
    }

    pub fn invalidate_all(&self) {
        for entry in self.entries.read().values() {
            entry.invalidate();
        }
    }

    /// Drop an entry entirely (capsule deleted)
    pub fn remove(&self, key: &str) {
        self.entries.write().remove(key);
    }

    /// Keys whose entries are due for background refresh
    pub fn due_for_refresh(&self, fraction: f64) -> Vec<String> {
        let mut keys: Vec<String> = self
            .entries
            .read()
            .iter()
            .filter(|(_, e)| e.needs_refresh(fraction))
            .map(|(k, _)| k.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn rebuilds(&self) -> u64 {
        self.entries.read().values().map(|e| e.rebuilds()).sum()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self) -> EntryStats {
        let entries = self.entries.read();
        EntryStats {
            name: self.name.clone(),
            populated: entries.values().any(|e| e.is_populated()),
            rebuilds: entries.values().map(|e| e.rebuilds()).sum(),
            ttl_secs: self.ttl.as_secs(),
            age_secs: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_builds_once_while_fresh() {
        let entry: CacheEntry<Vec<u32>> = CacheEntry::new("capsules", Duration::from_secs(60));
        assert!(!entry.is_populated());

        let calls = AtomicUsize::new(0);
        for _ in 0..3 {
            let value = entry
                .get_or_build(|| {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok(vec![1, 2, 3])
                })
                .unwrap();
            assert_eq!(value, vec![1, 2, 3]);
        }
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(entry.rebuilds(), 1);
    }

    #[test]
    fn test_invalidate_keeps_value_and_rebuilds() {
        let entry: CacheEntry<u32> = CacheEntry::new("n", Duration::from_secs(60));
        entry.get_or_build(|| Ok(1)).unwrap();
        entry.invalidate();

        assert!(!entry.is_populated());
        assert_eq!(entry.peek(), Some(1));
        assert_eq!(entry.get_or_build(|| Ok(2)).unwrap(), 2);
        assert_eq!(entry.rebuilds(), 2);
    }

    #[test]
    fn test_expiry_triggers_rebuild() {
        let entry: CacheEntry<u32> = CacheEntry::new("n", Duration::from_millis(20));
        entry.get_or_build(|| Ok(1)).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        assert!(!entry.is_fresh());
        assert_eq!(entry.get_or_build(|| Ok(2)).unwrap(), 2);
    }

    #[test]
    fn test_failed_build_leaves_entry_empty() {
        let entry: CacheEntry<u32> = CacheEntry::new("n", Duration::from_secs(60));
        let err = entry.get_or_build(|| Err(crate::Error::NotFound("x".into())));
        assert!(err.is_err());
        assert!(!entry.is_populated());
        assert_eq!(entry.rebuilds(), 0);
    }

    #[test]
    fn test_concurrent_misses_rebuild_once() {
        let entry: CacheEntry<u32> = CacheEntry::new("n", Duration::from_secs(60));
        let calls = AtomicUsize::new(0);
        std::thread::scope(|scope| {
            for _ in 0..16 {
                scope.spawn(|| {
                    entry
                        .get_or_build(|| {
                            calls.fetch_add(1, Ordering::SeqCst);
                            std::thread::sleep(Duration::from_millis(20));
                            Ok(7)
                        })
                        .unwrap()
                });
            }
        });
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_needs_refresh_fraction() {
        let entry: CacheEntry<u32> = CacheEntry::new("n", Duration::from_millis(100));
        assert!(!entry.needs_refresh(0.8));
        entry.get_or_build(|| Ok(1)).unwrap();
        assert!(!entry.needs_refresh(0.8));
        std::thread::sleep(Duration::from_millis(90));
        assert!(entry.needs_refresh(0.8));
    }

    #[test]
    fn test_keyed_cache() {
        let cache: KeyedCache<String> = KeyedCache::new("corpus", Duration::from_secs(60));
        assert_eq!(cache.get_or_build("kjv", || Ok("a".into())).unwrap(), "a");
        assert_eq!(cache.get_or_build("kjv", || Ok("b".into())).unwrap(), "a");

        cache.invalidate("kjv");
        assert_eq!(cache.get_or_build("kjv", || Ok("c".into())).unwrap(), "c");
        assert_eq!(cache.rebuilds(), 2);

        cache.remove("kjv");
        assert!(cache.is_empty());
    }
}
