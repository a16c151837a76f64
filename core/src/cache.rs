//! Two-Level Cache (SPEC_FULL §4.C): a bounded in-memory LRU (L1) backed by
//! an injected durable store (L2). Grounded on
//! `original_source/backend/engine/cache.py`'s `TwoLevelCache`
//! (`OrderedDict` LRU + injected get/save + hit-count warm-up).

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;

use log::debug;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("durable cache store error: {0}")]
    Store(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheLevel {
    L1,
    L2,
    Miss,
}

/// Injected durable (L2) store. Implementations may block.
pub trait DurableCacheStore: Send + Sync {
    fn get(&self, key: &str) -> Option<String>;
    fn put(&self, key: &str, value: &str) -> Result<(), CacheError>;
    /// Top `limit` entries by hit count, most-used first, for warm-up.
    fn top_by_hits(&self, limit: usize) -> Vec<(String, String)>;
}

/// An in-process durable store, standing in for a real KV/SQL-backed one.
/// Tracks hit counts so `top_by_hits` has something meaningful to sort.
#[derive(Default)]
pub struct InMemoryCacheStore {
    entries: Mutex<HashMap<String, (String, u64)>>,
}

impl InMemoryCacheStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl DurableCacheStore for InMemoryCacheStore {
    fn get(&self, key: &str) -> Option<String> {
        let mut entries = self.entries.lock().expect("cache store poisoned");
        let entry = entries.get_mut(key)?;
        entry.1 += 1;
        Some(entry.0.clone())
    }

    fn put(&self, key: &str, value: &str) -> Result<(), CacheError> {
        let mut entries = self.entries.lock().expect("cache store poisoned");
        entries
            .entry(key.to_string())
            .and_modify(|e| e.0 = value.to_string())
            .or_insert_with(|| (value.to_string(), 0));
        Ok(())
    }

    fn top_by_hits(&self, limit: usize) -> Vec<(String, String)> {
        let entries = self.entries.lock().expect("cache store poisoned");
        let mut all: Vec<(&String, &(String, u64))> = entries.iter().collect();
        all.sort_by(|a, b| b.1 .1.cmp(&a.1 .1));
        all.into_iter()
            .take(limit)
            .map(|(key, (value, _))| (key.clone(), value.clone()))
            .collect()
    }
}

/// A durable store that never persists anything: useful when the engine
/// runs without a configured backing store.
#[derive(Default)]
pub struct NullCacheStore;

impl DurableCacheStore for NullCacheStore {
    fn get(&self, _key: &str) -> Option<String> {
        None
    }

    fn put(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
        Ok(())
    }

    fn top_by_hits(&self, _limit: usize) -> Vec<(String, String)> {
        Vec::new()
    }
}

#[derive(Debug, Clone)]
pub struct CacheStats {
    pub total_lookups: u64,
    pub hits_l1: u64,
    pub hits_l2: u64,
    pub misses: u64,
    pub l1_size: usize,
    pub l1_max: usize,
}

impl CacheStats {
    pub fn hit_rate_l1(&self) -> f64 {
        rate(self.hits_l1, self.total_lookups)
    }

    pub fn hit_rate_total(&self) -> f64 {
        rate(self.hits_l1 + self.hits_l2, self.total_lookups)
    }
}

fn rate(hits: u64, total: u64) -> f64 {
    if total == 0 {
        0.0
    } else {
        hits as f64 / total as f64 * 100.0
    }
}

struct L1State {
    map: HashMap<String, String>,
    // Insertion/access order, oldest first. Small enough (bounded by
    // `max_memory`) that a linear move-to-end is fine.
    order: Vec<String>,
}

impl L1State {
    fn touch(&mut self, key: &str) {
        if let Some(pos) = self.order.iter().position(|k| k == key) {
            let key = self.order.remove(pos);
            self.order.push(key);
        }
    }

    fn insert(&mut self, key: String, value: String, max_memory: usize) {
        if self.map.contains_key(&key) {
            self.map.insert(key.clone(), value);
            self.touch(&key);
            return;
        }
        if self.order.len() >= max_memory {
            if let Some(oldest) = self.order.first().cloned() {
                self.order.remove(0);
                self.map.remove(&oldest);
            }
        }
        self.order.push(key.clone());
        self.map.insert(key, value);
    }
}

/// L1 (bounded LRU, in-memory) + L2 (durable, injected) translation cache.
/// A single lock serializes L1 structural edits; L2 operations may block.
pub struct TwoLevelCache {
    max_memory: usize,
    l1: Mutex<L1State>,
    l2: Box<dyn DurableCacheStore>,
    total_lookups: AtomicU64,
    hits_l1: AtomicU64,
    hits_l2: AtomicU64,
    misses: AtomicU64,
}

impl TwoLevelCache {
    pub fn new(l2: Box<dyn DurableCacheStore>, max_memory: usize) -> Self {
        Self {
            max_memory,
            l1: Mutex::new(L1State {
                map: HashMap::new(),
                order: Vec::new(),
            }),
            l2,
            total_lookups: AtomicU64::new(0),
            hits_l1: AtomicU64::new(0),
            hits_l2: AtomicU64::new(0),
            misses: AtomicU64::new(0),
        }
    }

    fn normalize(text: &str) -> String {
        text.trim().to_string()
    }

    pub fn lookup(&self, text: &str) -> (Option<String>, CacheLevel) {
        let key = Self::normalize(text);
        self.total_lookups.fetch_add(1, Ordering::Relaxed);

        {
            let mut l1 = self.l1.lock().expect("cache l1 poisoned");
            if let Some(value) = l1.map.get(&key).cloned() {
                l1.touch(&key);
                self.hits_l1.fetch_add(1, Ordering::Relaxed);
                return (Some(value), CacheLevel::L1);
            }
        }

        if let Some(value) = self.l2.get(&key) {
            self.hits_l2.fetch_add(1, Ordering::Relaxed);
            let mut l1 = self.l1.lock().expect("cache l1 poisoned");
            l1.insert(key, value.clone(), self.max_memory);
            return (Some(value), CacheLevel::L2);
        }

        self.misses.fetch_add(1, Ordering::Relaxed);
        (None, CacheLevel::Miss)
    }

    /// Store a translation. The invariant that a stored value never equals
    /// its (trim+lowercase) key is enforced here as a final guard: the
    /// Provider Chain is expected to have already filtered these out.
    pub fn store(&self, text: &str, translated: &str, persist: bool) {
        let key = Self::normalize(text);
        if key.to_lowercase() == translated.trim().to_lowercase() {
            debug!("refusing to cache no-op translation for '{key}'");
            return;
        }

        {
            let mut l1 = self.l1.lock().expect("cache l1 poisoned");
            l1.insert(key.clone(), translated.to_string(), self.max_memory);
        }

        if persist {
            if let Err(err) = self.l2.put(&key, translated) {
                debug!("cache persistence failed for '{key}': {err}");
            }
        }
    }

    pub fn warm_up(&self, limit: usize) {
        let top = self.l2.top_by_hits(limit);
        let count = top.len();
        let mut l1 = self.l1.lock().expect("cache l1 poisoned");
        for (key, value) in top {
            l1.insert(key, value, self.max_memory);
        }
        drop(l1);
        debug!("cache warm-up loaded {count} entries into L1");
    }

    pub fn stats(&self) -> CacheStats {
        let l1 = self.l1.lock().expect("cache l1 poisoned");
        CacheStats {
            total_lookups: self.total_lookups.load(Ordering::Relaxed),
            hits_l1: self.hits_l1.load(Ordering::Relaxed),
            hits_l2: self.hits_l2.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            l1_size: l1.map.len(),
            l1_max: self.max_memory,
        }
    }
}
