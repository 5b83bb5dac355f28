//! The adaptive cache.

use bytes::Bytes;
use parking_lot::{Mutex, RwLock};
use std::hash::Hasher;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};
use twox_hash::XxHash64;

use crate::config::{CacheOptions, PolicyKind};
use crate::policy::{ItemMetrics, Policy};
use crate::shard::Shard;
use crate::stats::CacheStats;

/// Seed for the shard-selection hash. Fixed so a key's shard never changes.
const SHARD_HASH_SEED: u64 = 0x51_7c_c1_b7_27_22_0a_95;

/// Estimated fixed cost of one item beyond its key and value bytes
/// (arena node, links, metrics, map entry).
const ITEM_OVERHEAD: usize = 96;

/// Resizer thread wake granularity; keeps shutdown prompt regardless of the
/// configured adjustment interval.
const RESIZER_TICK: Duration = Duration::from_millis(200);

/// Sharded, policy-driven cache with background capacity adjustment.
pub struct AdaptiveCache {
    inner: Arc<CacheInner>,
    resizer: Option<thread::JoinHandle<()>>,
}

struct CacheInner {
    shards: Vec<RwLock<Shard>>,
    shard_mask: u64,
    policy: Mutex<Policy>,
    policy_kind: PolicyKind,
    capacity: AtomicUsize,
    min_capacity: usize,
    max_capacity: usize,
    size: AtomicUsize,
    hits: AtomicU64,
    misses: AtomicU64,
    evictions: AtomicU64,
    expirations: AtomicU64,
    cleanup_threshold: f64,
    cleanup_target: f64,
    adjustment_interval: Duration,
    adaptive: AtomicBool,
    stop: AtomicBool,
    epoch: Instant,
}

impl AdaptiveCache {
    pub fn new(options: CacheOptions) -> Self {
        let shard_count = options.shard_count.max(1).next_power_of_two();
        let mut shards = Vec::with_capacity(shard_count);
        for _ in 0..shard_count {
            shards.push(RwLock::new(Shard::new()));
        }

        let policy = Policy::build(&options);
        let policy_kind = policy.kind();
        let max_capacity = options.max_capacity.max(1);
        let min_capacity = options.min_capacity.clamp(1, max_capacity);
        let initial = options.initial_capacity.clamp(min_capacity, max_capacity);

        let inner = Arc::new(CacheInner {
            shards,
            shard_mask: (shard_count - 1) as u64,
            policy: Mutex::new(policy),
            policy_kind,
            capacity: AtomicUsize::new(initial),
            min_capacity,
            max_capacity,
            size: AtomicUsize::new(0),
            hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            evictions: AtomicU64::new(0),
            expirations: AtomicU64::new(0),
            cleanup_threshold: options.cleanup_threshold,
            cleanup_target: options.cleanup_target,
            adjustment_interval: options.adjustment_interval,
            adaptive: AtomicBool::new(options.enable_adaptive_sizing),
            stop: AtomicBool::new(false),
            epoch: Instant::now(),
        });

        let resizer = {
            let inner = inner.clone();
            Some(
                thread::Builder::new()
                    .name("cache-resizer".to_string())
                    .spawn(move || resizer_loop(inner))
                    .expect("failed to spawn cache-resizer thread"),
            )
        };

        AdaptiveCache { inner, resizer }
    }

    /// Insert or overwrite a key.
    pub fn put(&self, key: Bytes, value: Bytes) {
        self.inner.put(key, value);
    }

    /// Look up a key, applying policy bookkeeping and lazy expiry.
    pub fn get(&self, key: &[u8]) -> Option<Bytes> {
        self.inner.get(key)
    }

    /// Remove a key. Returns whether it was present.
    pub fn remove(&self, key: &[u8]) -> bool {
        self.inner.remove(key)
    }

    /// Membership check without policy side effects.
    pub fn contains(&self, key: &[u8]) -> bool {
        let shard = self.inner.shard_for(key).read();
        shard.map.contains_key(key)
    }

    /// Drop every item, shard by shard.
    pub fn clear(&self) {
        for shard in &self.inner.shards {
            let mut shard = shard.write();
            let removed = shard.arena.len();
            shard.arena.clear();
            shard.map.clear();
            self.inner.size.fetch_sub(removed, Ordering::Relaxed);
        }
    }

    /// Items currently stored.
    pub fn size(&self) -> usize {
        self.inner.size.load(Ordering::Relaxed)
    }

    /// Current capacity in items.
    pub fn capacity(&self) -> usize {
        self.inner.capacity.load(Ordering::Relaxed)
    }

    /// Force a capacity, clamped to the configured bounds. Shrinking below
    /// the current size distributes the required evictions across shards.
    pub fn set_capacity(&self, new_capacity: usize) {
        self.inner.set_capacity(new_capacity);
    }

    /// Toggle the background resizer's effect.
    pub fn enable_adaptive_sizing(&self, enable: bool) {
        self.inner.adaptive.store(enable, Ordering::Relaxed);
    }

    pub fn hit_ratio(&self) -> f64 {
        let hits = self.inner.hits.load(Ordering::Relaxed);
        let misses = self.inner.misses.load(Ordering::Relaxed);
        let total = hits + misses;
        if total == 0 {
            0.0
        } else {
            hits as f64 / total as f64
        }
    }

    pub fn policy_name(&self) -> &'static str {
        self.inner.policy_kind.name()
    }

    /// Snapshot counters and walk the shards for a memory estimate.
    pub fn stats(&self) -> CacheStats {
        let inner = &self.inner;
        let mut memory = 0usize;
        for shard in &inner.shards {
            let shard = shard.read();
            for (_, node) in shard.arena.iter_from_tail() {
                memory += node.key.len() + node.value.len() + ITEM_OVERHEAD;
            }
        }

        let hits = inner.hits.load(Ordering::Relaxed);
        let misses = inner.misses.load(Ordering::Relaxed);
        let total = hits + misses;

        CacheStats {
            size: inner.size.load(Ordering::Relaxed),
            capacity: inner.capacity.load(Ordering::Relaxed),
            hits,
            misses,
            hit_ratio: if total == 0 {
                0.0
            } else {
                hits as f64 / total as f64
            },
            evictions: inner.evictions.load(Ordering::Relaxed),
            expirations: inner.expirations.load(Ordering::Relaxed),
            memory_usage: memory,
            uptime: inner.epoch.elapsed(),
            policy: inner.policy_kind.name(),
        }
    }
}

impl Drop for AdaptiveCache {
    fn drop(&mut self) {
        self.inner.stop.store(true, Ordering::Relaxed);
        if let Some(handle) = self.resizer.take() {
            let _ = handle.join();
        }
    }
}

fn resizer_loop(inner: Arc<CacheInner>) {
    let mut elapsed = Duration::ZERO;
    while !inner.stop.load(Ordering::Relaxed) {
        thread::sleep(RESIZER_TICK);
        elapsed += RESIZER_TICK;
        if elapsed < inner.adjustment_interval {
            continue;
        }
        elapsed = Duration::ZERO;

        if !inner.adaptive.load(Ordering::Relaxed) {
            continue;
        }

        let hits = inner.hits.load(Ordering::Relaxed);
        let misses = inner.misses.load(Ordering::Relaxed);
        let adjustment = inner.policy.lock().size_adjustment(hits, misses);
        if adjustment == 0 {
            continue;
        }

        let current = inner.capacity.load(Ordering::Relaxed);
        let factor = 1.0 + adjustment as f64 / 100.0;
        let target = (current as f64 * factor) as usize;
        if target != current {
            inner.set_capacity(target);
        }
    }
}

impl CacheInner {
    #[inline]
    fn now_us(&self) -> u64 {
        self.epoch.elapsed().as_micros() as u64
    }

    #[inline]
    fn shard_index(&self, key: &[u8]) -> usize {
        let mut hasher = XxHash64::with_seed(SHARD_HASH_SEED);
        hasher.write(key);
        (hasher.finish() & self.shard_mask) as usize
    }

    #[inline]
    fn shard_for(&self, key: &[u8]) -> &RwLock<Shard> {
        &self.shards[self.shard_index(key)]
    }

    fn put(&self, key: Bytes, value: Bytes) {
        let now = self.now_us();
        let idx = self.shard_index(&key);

        {
            let mut shard = self.shards[idx].write();

            if let Some(&slot) = shard.map.get(&key[..]) {
                shard.arena.get_mut(slot).value = value;
                match self.policy_kind {
                    PolicyKind::Lru => {
                        shard.arena.get(slot).metrics.record_access(now);
                        shard.arena.move_to_front(slot);
                    }
                    _ => {
                        let node = shard.arena.get(slot);
                        self.policy.lock().on_access(&node.key, &node.metrics, now);
                    }
                }
                return;
            }

            if self.size.load(Ordering::Relaxed) >= self.capacity.load(Ordering::Relaxed) {
                let count = self.items_to_evict();
                self.evict_locked(&mut shard, count);
            }

            let slot = shard
                .arena
                .push_front(key.clone(), value, ItemMetrics::new(now));
            shard.map.insert(key, slot);

            match self.policy_kind {
                PolicyKind::Lru => shard.arena.get(slot).metrics.record_access(now),
                _ => {
                    let node = shard.arena.get(slot);
                    self.policy.lock().on_add(&node.key, &node.metrics, now);
                }
            }

            self.size.fetch_add(1, Ordering::Relaxed);
        }

        // Expiration sweep outside the insert's critical section.
        if self.policy_kind == PolicyKind::Tlru {
            let size = self.size.load(Ordering::Relaxed);
            let capacity = self.capacity.load(Ordering::Relaxed).max(1);
            if size as f64 / capacity as f64 > self.cleanup_threshold {
                self.cleanup_expired(idx);
            }
        }
    }

    fn get(&self, key: &[u8]) -> Option<Bytes> {
        let now = self.now_us();
        let idx = self.shard_index(key);

        // TTL check first: an expired item reads as a miss.
        if self.policy_kind == PolicyKind::Tlru && self.expire_if_due(idx, key, now) {
            self.expirations.fetch_add(1, Ordering::Relaxed);
            self.misses.fetch_add(1, Ordering::Relaxed);
            return None;
        }

        match self.policy_kind {
            PolicyKind::Lru => {
                // LRU must relink, which needs the write lock; take the read
                // lock only to confirm presence cheaply first.
                {
                    let shard = self.shards[idx].read();
                    if !shard.map.contains_key(key) {
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        return None;
                    }
                }
                let mut shard = self.shards[idx].write();
                match shard.map.get(key).copied() {
                    Some(slot) => {
                        shard.arena.get(slot).metrics.record_access(now);
                        shard.arena.move_to_front(slot);
                        let value = shard.arena.get(slot).value.clone();
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        Some(value)
                    }
                    None => {
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                }
            }
            _ => {
                let shard = self.shards[idx].read();
                match shard.map.get(key).copied() {
                    Some(slot) => {
                        let node = shard.arena.get(slot);
                        self.policy.lock().on_access(&node.key, &node.metrics, now);
                        self.hits.fetch_add(1, Ordering::Relaxed);
                        Some(node.value.clone())
                    }
                    None => {
                        self.misses.fetch_add(1, Ordering::Relaxed);
                        None
                    }
                }
            }
        }
    }

    /// Drop the key if its TTL has lapsed. Returns true when an expired
    /// item was removed (the get must then report a miss).
    fn expire_if_due(&self, idx: usize, key: &[u8], now: u64) -> bool {
        {
            let shard = self.shards[idx].read();
            let Some(&slot) = shard.map.get(key) else {
                return false;
            };
            let node = shard.arena.get(slot);
            if !self.policy.lock().should_evict(&node.metrics, now) {
                return false;
            }
        }

        // Upgrade to the write lock and re-check: the item may have been
        // touched or removed in the window.
        let mut shard = self.shards[idx].write();
        let Some(&slot) = shard.map.get(key) else {
            return false;
        };
        let expired = {
            let node = shard.arena.get(slot);
            self.policy.lock().should_evict(&node.metrics, now)
        };
        if !expired {
            return false;
        }
        let node = shard.arena.remove(slot);
        shard.map.remove(&node.key[..]);
        self.size.fetch_sub(1, Ordering::Relaxed);
        true
    }

    fn remove(&self, key: &[u8]) -> bool {
        let mut shard = self.shard_for(key).write();
        let Some(slot) = shard.map.remove(key) else {
            return false;
        };
        let node = shard.arena.remove(slot);
        self.policy.lock().on_eviction(&node.key, &node.metrics);
        self.size.fetch_sub(1, Ordering::Relaxed);
        true
    }

    /// How many items to drop when an insert finds the cache at capacity.
    fn items_to_evict(&self) -> usize {
        let size = self.size.load(Ordering::Relaxed);
        let capacity = self.capacity.load(Ordering::Relaxed).max(1);

        if size > capacity {
            return size - capacity + 1;
        }
        let usage = size as f64 / capacity as f64;
        if usage > self.cleanup_threshold {
            let target = (capacity as f64 * self.cleanup_target) as usize;
            if size > target {
                return size - target;
            }
        }
        1
    }

    /// Evict up to `count` items from an already write-locked shard,
    /// highest policy priority first. Expired items take precedence; ties
    /// fall to the older list position (the scan starts at the tail and the
    /// sort is stable).
    fn evict_locked(&self, shard: &mut Shard, count: usize) {
        if count == 0 || shard.arena.len() == 0 {
            return;
        }
        let now = self.now_us();

        let mut candidates: Vec<(u32, f64, bool)> = Vec::with_capacity(shard.arena.len());
        {
            let policy = self.policy.lock();
            for (slot, node) in shard.arena.iter_from_tail() {
                if policy.should_evict(&node.metrics, now) {
                    candidates.push((slot, f64::INFINITY, true));
                } else {
                    candidates.push((slot, policy.priority(&node.metrics), false));
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.1.partial_cmp(&a.1)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(b.2.cmp(&a.2))
        });

        for &(slot, _, expired) in candidates.iter().take(count) {
            let node = shard.arena.remove(slot);
            shard.map.remove(&node.key[..]);
            self.policy.lock().on_eviction(&node.key, &node.metrics);
            self.size.fetch_sub(1, Ordering::Relaxed);
            if expired {
                self.expirations.fetch_add(1, Ordering::Relaxed);
            } else {
                self.evictions.fetch_add(1, Ordering::Relaxed);
            }
        }
    }

    /// Drop every expired item from one shard.
    fn cleanup_expired(&self, idx: usize) {
        let now = self.now_us();
        let mut shard = self.shards[idx].write();

        let mut doomed: Vec<u32> = Vec::new();
        {
            let policy = self.policy.lock();
            for (slot, node) in shard.arena.iter_from_tail() {
                if policy.should_evict(&node.metrics, now) {
                    doomed.push(slot);
                }
            }
        }

        for slot in doomed {
            let node = shard.arena.remove(slot);
            shard.map.remove(&node.key[..]);
            self.size.fetch_sub(1, Ordering::Relaxed);
            self.expirations.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn set_capacity(&self, new_capacity: usize) {
        let new_capacity = new_capacity.clamp(self.min_capacity, self.max_capacity);
        let old = self.capacity.swap(new_capacity, Ordering::Relaxed);
        if new_capacity >= old {
            return;
        }

        let size = self.size.load(Ordering::Relaxed);
        if size <= new_capacity {
            return;
        }
        let need = size - new_capacity;

        // Distribute eviction proportionally to shard fill. Lock one shard
        // at a time; never two simultaneously.
        let lens: Vec<usize> = self.shards.iter().map(|s| s.read().arena.len()).collect();
        let total: usize = lens.iter().sum();
        if total == 0 {
            return;
        }

        let mut remaining = need;
        for (idx, len) in lens.iter().enumerate() {
            if remaining == 0 {
                break;
            }
            let quota = ((len * need + total - 1) / total).min(remaining);
            if quota == 0 {
                continue;
            }
            let mut shard = self.shards[idx].write();
            let before = shard.arena.len();
            self.evict_locked(&mut shard, quota);
            remaining = remaining.saturating_sub(before - shard.arena.len());
        }
    }
}
