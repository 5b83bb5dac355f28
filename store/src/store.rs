//! The sharded key/value store.

use adaptive_cache::{AdaptiveCache, CacheOptions, CacheStats};
use bytes::Bytes;
use parking_lot::RwLock;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use crate::compress;
use crate::error::StoreError;
use crate::persist::Persister;
use crate::routing::{self, Route, SUBMAPS_PER_BUCKET};

/// Sync thread wake granularity.
const SYNC_TICK: Duration = Duration::from_millis(200);

/// Store construction options.
#[derive(Debug, Clone)]
pub struct StoreOptions {
    pub shard_count: usize,
    pub buckets_per_shard: usize,
    pub enable_compression: bool,
    /// Directory for per-shard persistence files. `None` disables the
    /// persistence collaborator entirely.
    pub persist_path: Option<PathBuf>,
    pub sync_interval: Duration,
    pub cache: CacheOptions,
}

impl Default for StoreOptions {
    fn default() -> Self {
        StoreOptions {
            shard_count: 128,
            buckets_per_shard: 16,
            enable_compression: false,
            persist_path: None,
            sync_interval: Duration::from_secs(600),
            cache: CacheOptions::default(),
        }
    }
}

/// A value as held at rest in a sub-map.
#[derive(Debug, Clone)]
pub(crate) enum Stored {
    Raw(Bytes),
    Compressed(Bytes),
}

impl Stored {
    /// Decode to the client-visible value.
    pub(crate) fn to_value(&self) -> Result<Bytes, StoreError> {
        match self {
            Stored::Raw(data) => Ok(data.clone()),
            Stored::Compressed(data) => Ok(Bytes::from(compress::decompress(data)?)),
        }
    }

    /// The bytes exactly as stored (what persistence writes).
    pub(crate) fn stored_bytes(&self) -> &Bytes {
        match self {
            Stored::Raw(data) | Stored::Compressed(data) => data,
        }
    }
}

/// The unit of locking: one map behind one reader/writer lock.
pub(crate) struct SubMap {
    pub(crate) map: RwLock<HashMap<Bytes, Stored, ahash::RandomState>>,
}

impl SubMap {
    fn new() -> Self {
        SubMap {
            map: RwLock::new(HashMap::default()),
        }
    }
}

pub(crate) struct Bucket {
    pub(crate) submaps: Vec<SubMap>,
}

pub(crate) struct StoreShard {
    pub(crate) buckets: Vec<Bucket>,
}

impl StoreShard {
    fn new(buckets_per_shard: usize) -> Self {
        let buckets = (0..buckets_per_shard)
            .map(|_| Bucket {
                submaps: (0..SUBMAPS_PER_BUCKET).map(|_| SubMap::new()).collect(),
            })
            .collect();
        StoreShard { buckets }
    }
}

/// Sharded map fronted by the adaptive cache.
pub struct DataStore {
    inner: Arc<StoreInner>,
    sync: Option<thread::JoinHandle<()>>,
}

struct StoreInner {
    shards: Vec<StoreShard>,
    shard_count: usize,
    buckets_per_shard: usize,
    cache: AdaptiveCache,
    compression: bool,
    persister: Option<Persister>,
    sync_interval: Duration,
    stop: AtomicBool,
}

impl DataStore {
    /// Build the store; when persistence is configured, existing shard
    /// files are loaded and the sync thread is started.
    pub fn new(options: StoreOptions) -> Result<Self, StoreError> {
        let shard_count = options.shard_count.max(1);
        let buckets_per_shard = options.buckets_per_shard.max(1);

        let shards: Vec<StoreShard> = (0..shard_count)
            .map(|_| StoreShard::new(buckets_per_shard))
            .collect();

        let persister = match &options.persist_path {
            Some(path) => Some(Persister::new(path)?),
            None => None,
        };

        let inner = Arc::new(StoreInner {
            shards,
            shard_count,
            buckets_per_shard,
            cache: AdaptiveCache::new(options.cache),
            compression: options.enable_compression,
            persister,
            sync_interval: options.sync_interval,
            stop: AtomicBool::new(false),
        });

        if let Some(persister) = &inner.persister {
            let mut loaded = 0usize;
            for idx in 0..inner.shard_count {
                match persister.load_shard(
                    idx,
                    &inner.shards[idx],
                    inner.buckets_per_shard,
                    inner.compression,
                ) {
                    Ok(count) => loaded += count,
                    Err(e) => {
                        tracing::warn!(shard = idx, error = %e, "failed to load shard, starting empty");
                    }
                }
            }
            if loaded > 0 {
                tracing::info!(entries = loaded, "loaded persisted entries");
            }
        }

        let sync = if inner.persister.is_some() {
            let inner = inner.clone();
            Some(
                thread::Builder::new()
                    .name("store-sync".to_string())
                    .spawn(move || sync_loop(inner))
                    .expect("failed to spawn store-sync thread"),
            )
        } else {
            None
        };

        Ok(DataStore { inner, sync })
    }

    /// Write-through set: the cache always receives the raw value; the
    /// sub-map receives the (optionally compressed) at-rest form.
    pub fn set(&self, key: Bytes, value: Bytes) -> Result<(), StoreError> {
        self.inner.cache.put(key.clone(), value.clone());
        let stored = self.inner.encode(value)?;
        let submap = self.inner.submap_for(&key);
        submap.map.write().insert(key, stored);
        Ok(())
    }

    /// Read-through get: cache first, then the sub-map (installing the
    /// decoded value back into the cache on a miss).
    pub fn get(&self, key: &[u8]) -> Result<Option<Bytes>, StoreError> {
        if let Some(value) = self.inner.cache.get(key) {
            return Ok(Some(value));
        }

        let stored = {
            let submap = self.inner.submap_for(key);
            let map = submap.map.read();
            match map.get(key) {
                Some(stored) => stored.clone(),
                None => return Ok(None),
            }
        };

        let value = stored.to_value()?;
        self.inner
            .cache
            .put(Bytes::copy_from_slice(key), value.clone());
        Ok(Some(value))
    }

    /// Invalidate the cache, then erase from the sub-map. Returns whether
    /// the sub-map held the key.
    pub fn del(&self, key: &[u8]) -> bool {
        self.inner.cache.remove(key);
        let submap = self.inner.submap_for(key);
        submap.map.write().remove(key).is_some()
    }

    pub fn contains(&self, key: &[u8]) -> bool {
        if self.inner.cache.contains(key) {
            return true;
        }
        let submap = self.inner.submap_for(key);
        submap.map.read().contains_key(key)
    }

    /// Batch set: each sub-map's write lock is taken exactly once.
    pub fn multi_set(&self, pairs: Vec<(Bytes, Bytes)>) -> Result<(), StoreError> {
        let mut grouped: HashMap<Route, Vec<(Bytes, Stored)>, ahash::RandomState> =
            HashMap::default();

        for (key, value) in pairs {
            self.inner.cache.put(key.clone(), value.clone());
            let stored = self.inner.encode(value)?;
            grouped
                .entry(self.inner.route(&key))
                .or_default()
                .push((key, stored));
        }

        for (route, entries) in grouped {
            let submap = self.inner.submap_at(route);
            let mut map = submap.map.write();
            for (key, stored) in entries {
                map.insert(key, stored);
            }
        }
        Ok(())
    }

    /// Batch get, preserving input order; each sub-map's read lock is taken
    /// exactly once for the keys it owns.
    pub fn multi_get(&self, keys: &[Bytes]) -> Result<Vec<Option<Bytes>>, StoreError> {
        let mut results: Vec<Option<Bytes>> = vec![None; keys.len()];
        let mut grouped: HashMap<Route, Vec<usize>, ahash::RandomState> = HashMap::default();

        for (i, key) in keys.iter().enumerate() {
            if let Some(value) = self.inner.cache.get(key) {
                results[i] = Some(value);
            } else {
                grouped.entry(self.inner.route(key)).or_default().push(i);
            }
        }

        // Fetch at-rest values per sub-map, decode and install outside the
        // lock.
        let mut fetched: Vec<(usize, Stored)> = Vec::new();
        for (route, indices) in grouped {
            let submap = self.inner.submap_at(route);
            let map = submap.map.read();
            for i in indices {
                if let Some(stored) = map.get(&keys[i][..]) {
                    fetched.push((i, stored.clone()));
                }
            }
        }

        for (i, stored) in fetched {
            let value = stored.to_value()?;
            self.inner.cache.put(keys[i].clone(), value.clone());
            results[i] = Some(value);
        }

        Ok(results)
    }

    /// Batch delete. Returns how many keys existed.
    pub fn multi_del(&self, keys: &[Bytes]) -> usize {
        let mut grouped: HashMap<Route, Vec<usize>, ahash::RandomState> = HashMap::default();
        for (i, key) in keys.iter().enumerate() {
            self.inner.cache.remove(key);
            grouped.entry(self.inner.route(key)).or_default().push(i);
        }

        let mut deleted = 0;
        for (route, indices) in grouped {
            let submap = self.inner.submap_at(route);
            let mut map = submap.map.write();
            for i in indices {
                if map.remove(&keys[i][..]).is_some() {
                    deleted += 1;
                }
            }
        }
        deleted
    }

    /// Warm the cache for a set of keys without returning values.
    pub fn prefetch(&self, keys: &[Bytes]) -> Result<(), StoreError> {
        let mut grouped: HashMap<Route, Vec<usize>, ahash::RandomState> = HashMap::default();
        for (i, key) in keys.iter().enumerate() {
            if !self.inner.cache.contains(key) {
                grouped.entry(self.inner.route(key)).or_default().push(i);
            }
        }

        let mut fetched: Vec<(usize, Stored)> = Vec::new();
        for (route, indices) in grouped {
            let submap = self.inner.submap_at(route);
            let map = submap.map.read();
            for i in indices {
                if let Some(stored) = map.get(&keys[i][..]) {
                    fetched.push((i, stored.clone()));
                }
            }
        }

        for (i, stored) in fetched {
            let value = stored.to_value()?;
            self.inner.cache.put(keys[i].clone(), value);
        }
        Ok(())
    }

    /// Total entries across every sub-map.
    pub fn entry_count(&self) -> usize {
        let mut total = 0;
        for shard in &self.inner.shards {
            for bucket in &shard.buckets {
                for submap in &bucket.submaps {
                    total += submap.map.read().len();
                }
            }
        }
        total
    }

    /// The fronting cache (stats, capacity control).
    pub fn cache(&self) -> &AdaptiveCache {
        &self.inner.cache
    }

    pub fn cache_stats(&self) -> CacheStats {
        self.inner.cache.stats()
    }

    /// Persist every shard now. No-op without a persistence directory.
    pub fn flush_all(&self) -> Result<(), StoreError> {
        if let Some(persister) = &self.inner.persister {
            for idx in 0..self.inner.shard_count {
                persister.persist_shard(idx, &self.inner.shards[idx])?;
            }
        }
        Ok(())
    }
}

impl Drop for DataStore {
    fn drop(&mut self) {
        self.inner.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.sync.take() {
            let _ = handle.join();
        }
        if self.inner.persister.is_some() {
            if let Err(e) = self.flush_all() {
                tracing::warn!(error = %e, "final flush failed");
            }
        }
    }
}

impl StoreInner {
    #[inline]
    fn route(&self, key: &[u8]) -> Route {
        routing::route(key, self.shard_count, self.buckets_per_shard)
    }

    #[inline]
    fn submap_at(&self, route: Route) -> &SubMap {
        &self.shards[route.shard].buckets[route.bucket].submaps[route.submap]
    }

    #[inline]
    fn submap_for(&self, key: &[u8]) -> &SubMap {
        self.submap_at(self.route(key))
    }

    fn encode(&self, value: Bytes) -> Result<Stored, StoreError> {
        if self.compression {
            Ok(Stored::Compressed(Bytes::from(compress::compress(&value)?)))
        } else {
            Ok(Stored::Raw(value))
        }
    }
}

fn sync_loop(inner: Arc<StoreInner>) {
    let mut elapsed = Duration::ZERO;
    while !inner.stop.load(Ordering::Relaxed) {
        thread::sleep(SYNC_TICK);
        elapsed += SYNC_TICK;
        if elapsed < inner.sync_interval {
            continue;
        }
        elapsed = Duration::ZERO;

        let persister = match &inner.persister {
            Some(p) => p,
            None => return,
        };
        for idx in 0..inner.shard_count {
            if let Err(e) = persister.persist_shard(idx, &inner.shards[idx]) {
                // Logged and retried next cycle.
                tracing::warn!(shard = idx, error = %e, "shard sync failed");
            }
        }
    }
}
