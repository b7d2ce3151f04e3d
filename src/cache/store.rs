// Response cache store.
// TTL-bounded, capacity-bounded, tag-indexed key/value store with LRU eviction.
// Every operation runs under one lock so prune-evict-insert is a single step.

use std::collections::{BTreeSet, HashMap};
use std::future::Future;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use serde_json::Value;
use tracing::{debug, warn};

use crate::clock::SharedClock;

use super::persist::{CacheSnapshot, PersistenceAdapter, StorageKind};

/// Default TTL for AI responses: 5 minutes.
pub const DEFAULT_TTL: Duration = Duration::from_secs(5 * 60);
pub const DEFAULT_MAX_ENTRIES: usize = 100;
pub const DEFAULT_KEY_PREFIX: &str = "ai-cache";

/// Cache behaviour settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub default_ttl_ms: u64,
    pub max_entries: usize,
    /// Write a snapshot to storage after every mutation.
    pub persist: bool,
    pub key_prefix: String,
    pub storage: StorageKind,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            default_ttl_ms: DEFAULT_TTL.as_millis() as u64,
            max_entries: DEFAULT_MAX_ENTRIES,
            persist: false,
            key_prefix: DEFAULT_KEY_PREFIX.to_string(),
            storage: StorageKind::default(),
        }
    }
}

impl CacheConfig {
    pub fn default_ttl(&self) -> Duration {
        Duration::from_millis(self.default_ttl_ms)
    }
}

/// One cached value with its bookkeeping.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CacheEntry {
    pub key: String,
    pub data: Value,
    pub created_at: DateTime<Utc>,
    /// Always later than `created_at`.
    pub expires_at: DateTime<Utc>,
    pub hit_count: u64,
    pub last_accessed_at: DateTime<Utc>,
    pub tags: BTreeSet<String>,
}

impl CacheEntry {
    fn new(key: &str, data: Value, ttl: Duration, tags: BTreeSet<String>, now: DateTime<Utc>) -> Self {
        // Zero TTLs still get a sliver of life so expires_at > created_at holds.
        let ttl = chrono::Duration::from_std(ttl.max(Duration::from_millis(1)))
            .unwrap_or(chrono::Duration::MAX);
        let expires_at = now.checked_add_signed(ttl).unwrap_or(DateTime::<Utc>::MAX_UTC);

        Self {
            key: key.to_string(),
            data,
            created_at: now,
            expires_at,
            hit_count: 0,
            last_accessed_at: now,
            tags,
        }
    }

    pub fn is_valid(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        !self.is_valid(now)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }
}

/// What the cache currently holds, independent of this process's counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CacheSummary {
    pub size: usize,
    pub keys: Vec<String>,
    pub persist: bool,
    pub storage: StorageKind,
}

/// Counters for one session. `size` always mirrors the entry count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub size: usize,
    pub last_prune_at: DateTime<Utc>,
}

impl CacheStats {
    fn fresh(now: DateTime<Utc>) -> Self {
        Self {
            hits: 0,
            misses: 0,
            evictions: 0,
            size: 0,
            last_prune_at: now,
        }
    }

    /// Fraction of lookups served from cache.
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            self.hits as f64 / total as f64
        }
    }
}

/// Options for `set`.
#[derive(Debug, Clone, Default)]
pub struct SetOptions {
    /// Falls back to the config's default TTL.
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
}

impl SetOptions {
    pub fn ttl(ttl: Duration) -> Self {
        Self {
            ttl: Some(ttl),
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }
}

/// Options for `get_or_fetch`.
#[derive(Debug, Clone, Default)]
pub struct FetchOptions {
    pub ttl: Option<Duration>,
    pub tags: Vec<String>,
    /// Skip the cache lookup and always call the fetcher.
    pub force_refresh: bool,
}

impl FetchOptions {
    pub fn refresh() -> Self {
        Self {
            force_refresh: true,
            ..Self::default()
        }
    }

    pub fn with_tags<I, S>(mut self, tags: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.tags.extend(tags.into_iter().map(Into::into));
        self
    }

    pub fn with_ttl(mut self, ttl: Duration) -> Self {
        self.ttl = Some(ttl);
        self
    }
}

struct Inner {
    entries: HashMap<String, CacheEntry>,
    config: CacheConfig,
    stats: CacheStats,
}

impl Inner {
    fn sync_size(&mut self) {
        self.stats.size = self.entries.len();
    }

    fn prune(&mut self, now: DateTime<Utc>) -> usize {
        let before = self.entries.len();
        self.entries.retain(|_, entry| entry.is_valid(now));
        self.stats.last_prune_at = now;
        self.sync_size();
        before - self.entries.len()
    }

    fn evict_lru(&mut self) -> Option<String> {
        let key = self
            .entries
            .values()
            .min_by_key(|e| (e.last_accessed_at, e.created_at))
            .map(|e| e.key.clone())?;
        self.entries.remove(&key);
        self.stats.evictions += 1;
        self.sync_size();
        Some(key)
    }

    fn snapshot(&self) -> CacheSnapshot {
        CacheSnapshot {
            entries: self.entries.values().cloned().collect(),
            config: self.config.clone(),
        }
    }
}

/// The response cache. Construct one and share it (e.g. behind an `Arc`).
pub struct CacheStore {
    inner: Mutex<Inner>,
    clock: SharedClock,
    persistence: Option<PersistenceAdapter>,
}

impl CacheStore {
    pub fn new(config: CacheConfig, clock: SharedClock) -> Self {
        let now = clock.now();
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                config,
                stats: CacheStats::fresh(now),
            }),
            clock,
            persistence: None,
        }
    }

    /// A store that restores from, and writes through to, `adapter`.
    /// The given config wins over any persisted one; expired entries are
    /// dropped on restore.
    pub fn with_persistence(
        config: CacheConfig,
        clock: SharedClock,
        adapter: PersistenceAdapter,
    ) -> Self {
        let mut store = Self::new(config, clock);

        if let Some(snapshot) = adapter.load() {
            let now = store.clock.now();
            let mut inner = store.lock();
            let max = inner.config.max_entries.max(1);
            let mut restored: Vec<CacheEntry> = snapshot
                .entries
                .into_iter()
                .filter(|e| e.is_valid(now))
                .collect();
            // Keep the most recently used when the snapshot is over capacity.
            restored.sort_by_key(|e| std::cmp::Reverse(e.last_accessed_at));
            restored.truncate(max);
            inner.entries = restored.into_iter().map(|e| (e.key.clone(), e)).collect();
            inner.sync_size();
            debug!(entries = inner.stats.size, "cache restored from storage");
        }

        store.persistence = Some(adapter);
        store
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn persist(&self, inner: &Inner) {
        if !inner.config.persist {
            return;
        }
        if let Some(adapter) = &self.persistence {
            adapter.save(&inner.snapshot());
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.lock().config.enabled
    }

    pub fn config(&self) -> CacheConfig {
        self.lock().config.clone()
    }

    /// Replace the config. Shrinking `max_entries` evicts down to fit.
    pub fn update_config(&self, config: CacheConfig) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.config = config;

        let max = inner.config.max_entries.max(1);
        if inner.entries.len() > max {
            inner.prune(now);
        }
        while inner.entries.len() > max {
            if inner.evict_lru().is_none() {
                break;
            }
        }
        self.persist(&inner);
    }

    /// Cached value for `key` if present and unexpired. Counts a hit or miss;
    /// a hit refreshes the entry's recency. An entry that no longer decodes
    /// as `T` is dropped and counted as a miss.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Option<T> {
        self.lookup(key, |value| match serde_json::from_value(value.clone()) {
            Ok(data) => Some(data),
            Err(e) => {
                warn!(key, "dropping cached value with unexpected shape: {}", e);
                None
            }
        })
    }

    /// Raw JSON form of `get`.
    pub fn get_value(&self, key: &str) -> Option<Value> {
        self.lookup(key, |value| Some(value.clone()))
    }

    fn lookup<R>(&self, key: &str, decode: impl FnOnce(&Value) -> Option<R>) -> Option<R> {
        let now = self.clock.now();
        let mut inner = self.lock();

        if !inner.config.enabled {
            inner.stats.misses += 1;
            return None;
        }

        let looked_up = inner
            .entries
            .get(key)
            .map(|entry| {
                if entry.is_valid(now) {
                    decode(&entry.data)
                } else {
                    None
                }
            });

        let data = match looked_up {
            Some(Some(data)) => data,
            Some(None) => {
                // Expired or undecodable.
                inner.entries.remove(key);
                inner.stats.misses += 1;
                inner.sync_size();
                debug!(key, "cache miss (dropped stale entry)");
                self.persist(&inner);
                return None;
            }
            None => {
                inner.stats.misses += 1;
                debug!(key, "cache miss");
                return None;
            }
        };

        if let Some(entry) = inner.entries.get_mut(key) {
            entry.hit_count += 1;
            entry.last_accessed_at = now;
        }
        inner.stats.hits += 1;
        debug!(key, "cache hit");
        Some(data)
    }

    /// Whether `key` holds an unexpired entry. No bookkeeping.
    pub fn has(&self, key: &str) -> bool {
        let now = self.clock.now();
        let inner = self.lock();
        inner.config.enabled && inner.entries.get(key).is_some_and(|e| e.is_valid(now))
    }

    /// Entry metadata without counting a hit.
    pub fn entry_info(&self, key: &str) -> Option<CacheEntry> {
        self.lock().entries.get(key).cloned()
    }

    /// Store a value. At capacity, expired entries go first, then the least
    /// recently used one.
    pub fn set<T: Serialize + ?Sized>(&self, key: &str, data: &T, options: SetOptions) {
        let data = match serde_json::to_value(data) {
            Ok(data) => data,
            Err(e) => {
                warn!(key, "value is not cacheable: {}", e);
                return;
            }
        };

        let now = self.clock.now();
        let mut inner = self.lock();
        if !inner.config.enabled {
            return;
        }

        let max = inner.config.max_entries.max(1);
        if !inner.entries.contains_key(key) && inner.entries.len() >= max {
            let pruned = inner.prune(now);
            if pruned > 0 {
                debug!(pruned, "pruned expired entries to make room");
            }
            if inner.entries.len() >= max {
                if let Some(evicted) = inner.evict_lru() {
                    debug!(key = %evicted, "evicted least recently used entry");
                }
            }
        }

        let ttl = options.ttl.unwrap_or_else(|| inner.config.default_ttl());
        let tags = options.tags.into_iter().collect();
        inner
            .entries
            .insert(key.to_string(), CacheEntry::new(key, data, ttl, tags, now));
        inner.sync_size();
        self.persist(&inner);
    }

    pub fn invalidate(&self, key: &str) -> bool {
        let mut inner = self.lock();
        let removed = inner.entries.remove(key).is_some();
        if removed {
            inner.sync_size();
            self.persist(&inner);
        }
        removed
    }

    /// Remove every entry tagged `tag`. Each removal counts as an eviction.
    pub fn invalidate_by_tag(&self, tag: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|_, entry| !entry.has_tag(tag));
        let removed = before - inner.entries.len();

        if removed > 0 {
            inner.stats.evictions += removed as u64;
            inner.sync_size();
            debug!(tag, removed, "invalidated entries by tag");
            self.persist(&inner);
        }
        removed
    }

    pub fn invalidate_by_prefix(&self, prefix: &str) -> usize {
        let mut inner = self.lock();
        let before = inner.entries.len();
        inner.entries.retain(|key, _| !key.starts_with(prefix));
        let removed = before - inner.entries.len();

        if removed > 0 {
            inner.sync_size();
            debug!(prefix, removed, "invalidated entries by prefix");
            self.persist(&inner);
        }
        removed
    }

    /// Drop every expired entry. Returns how many went.
    pub fn prune(&self) -> usize {
        let now = self.clock.now();
        let mut inner = self.lock();
        let removed = inner.prune(now);
        if removed > 0 {
            self.persist(&inner);
        }
        removed
    }

    /// Remove everything and reset the counters.
    pub fn clear(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.entries.clear();
        inner.stats = CacheStats::fresh(now);
        if inner.config.persist {
            if let Some(adapter) = &self.persistence {
                adapter.clear();
            }
        }
    }

    pub fn stats(&self) -> CacheStats {
        self.lock().stats.clone()
    }

    pub fn size(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.lock().entries.keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Unexpired entries and storage settings. Hit and miss counters are
    /// per-process and left out.
    pub fn summary(&self) -> CacheSummary {
        let now = self.clock.now();
        let inner = self.lock();
        let mut keys: Vec<String> = inner
            .entries
            .values()
            .filter(|entry| entry.is_valid(now))
            .map(|entry| entry.key.clone())
            .collect();
        keys.sort();

        CacheSummary {
            size: keys.len(),
            keys,
            persist: inner.config.persist,
            storage: inner.config.storage,
        }
    }

    /// Cached value if valid; otherwise run `fetcher` and cache its result.
    /// Fetcher errors pass through untouched and nothing is cached.
    pub async fn get_or_fetch<T, F, Fut, E>(
        &self,
        key: &str,
        fetcher: F,
        options: FetchOptions,
    ) -> Result<T, E>
    where
        T: Serialize + DeserializeOwned,
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        if !options.force_refresh {
            if let Some(cached) = self.get::<T>(key) {
                return Ok(cached);
            }
        }

        let value = fetcher().await?;

        if self.is_enabled() {
            self.set(
                key,
                &value,
                SetOptions {
                    ttl: options.ttl,
                    tags: options.tags,
                },
            );
        }
        Ok(value)
    }
}
