// Response cache module.
// In-memory TTL/LRU cache for AI responses with optional persisted snapshots.

pub mod keys;
pub mod persist;
pub mod store;

pub use keys::{AI_NAMESPACE, cache_key, feature_prefix, sorted_json, storage_key};
pub use persist::{
    CacheSnapshot, FileStorage, MemoryStorage, PersistenceAdapter, StorageBackend, StorageKind,
    backend_for, local_dir, session_dir,
};
pub use store::{
    CacheConfig, CacheEntry, CacheStats, CacheStore, CacheSummary, DEFAULT_KEY_PREFIX,
    DEFAULT_MAX_ENTRIES, DEFAULT_TTL, FetchOptions, SetOptions,
};
