//! Eviction policies.
//!
//! One [`Policy`] instance is shared by every shard of a cache, guarded by a
//! single mutex that is held only for the duration of a call. Per-item
//! bookkeeping lives in [`ItemMetrics`] whose fields are atomics, so hit
//! paths that only touch metrics can run under a shard's read lock.
//!
//! LRU is stateless; the cache inlines its bookkeeping on the hot path and
//! never takes the policy lock for it. The stateful policies (LFU's decay
//! clock, ARC's ghost lists) go through the lock.

use bytes::Bytes;
use std::collections::{HashSet, VecDeque};
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::Duration;

use crate::config::{CacheOptions, PolicyKind};

/// Per-item access metrics.
///
/// Timestamps are microseconds since the owning cache's epoch. All mutable
/// fields are atomics so reads under a shard's shared lock may update them.
#[derive(Debug)]
pub struct ItemMetrics {
    last_access_us: AtomicU64,
    inserted_at_us: u64,
    access_count: AtomicU32,
    total_access_count: AtomicU64,
    frequency_weight_bits: AtomicU64,
}

impl ItemMetrics {
    pub fn new(now_us: u64) -> Self {
        ItemMetrics {
            last_access_us: AtomicU64::new(now_us),
            inserted_at_us: now_us,
            access_count: AtomicU32::new(0),
            total_access_count: AtomicU64::new(0),
            frequency_weight_bits: AtomicU64::new(1.0f64.to_bits()),
        }
    }

    /// Touch the access time and bump both counters.
    #[inline]
    pub fn record_access(&self, now_us: u64) {
        self.last_access_us.store(now_us, Ordering::Relaxed);
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.total_access_count.fetch_add(1, Ordering::Relaxed);
    }

    /// Bump the counters without touching the access time (FIFO).
    #[inline]
    pub fn bump_count(&self) {
        self.access_count.fetch_add(1, Ordering::Relaxed);
        self.total_access_count.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn last_access_us(&self) -> u64 {
        self.last_access_us.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn inserted_at_us(&self) -> u64 {
        self.inserted_at_us
    }

    #[inline]
    pub fn access_count(&self) -> u32 {
        self.access_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn total_access_count(&self) -> u64 {
        self.total_access_count.load(Ordering::Relaxed)
    }

    #[inline]
    pub fn frequency_weight(&self) -> f64 {
        f64::from_bits(self.frequency_weight_bits.load(Ordering::Relaxed))
    }

    /// Multiply the frequency weight by `factor` (LFU aging).
    #[inline]
    pub fn age(&self, factor: f64) {
        let current = self.frequency_weight();
        self.frequency_weight_bits
            .store((current * factor).to_bits(), Ordering::Relaxed);
    }
}

/// Priority offset that places ARC's recency segment ahead of its frequency
/// segment in eviction order.
const ARC_T1_BASE: f64 = 1e15;

/// The pluggable eviction policy.
pub enum Policy {
    Lru,
    Fifo,
    Lfu(LfuState),
    Tlru(TlruState),
    Arc(ArcState),
}

pub struct LfuState {
    decay_factor: f64,
    decay_interval_us: u64,
    last_decay_us: u64,
}

pub struct TlruState {
    ttl_us: u64,
}

pub struct ArcState {
    /// Target balance between the recency and frequency segments.
    p: f64,
    t1_hits: u64,
    t2_hits: u64,
    ghost_recency_hits: u64,
    ghost_frequency_hits: u64,
    ghost_recency: GhostList,
    ghost_frequency: GhostList,
}

impl Policy {
    /// Build a policy for the given options.
    pub fn build(options: &CacheOptions) -> Policy {
        match options.policy {
            PolicyKind::Lru => Policy::Lru,
            PolicyKind::Fifo => Policy::Fifo,
            PolicyKind::Lfu => Policy::Lfu(LfuState {
                decay_factor: options.lfu_decay_factor,
                decay_interval_us: options.lfu_decay_interval.as_micros() as u64,
                last_decay_us: 0,
            }),
            PolicyKind::Tlru => Policy::Tlru(TlruState {
                ttl_us: options.ttl.as_micros() as u64,
            }),
            PolicyKind::Arc => Policy::Arc(ArcState {
                p: 0.5,
                t1_hits: 0,
                t2_hits: 0,
                ghost_recency_hits: 0,
                ghost_frequency_hits: 0,
                ghost_recency: GhostList::new(options.initial_capacity),
                ghost_frequency: GhostList::new(options.initial_capacity),
            }),
        }
    }

    pub fn kind(&self) -> PolicyKind {
        match self {
            Policy::Lru => PolicyKind::Lru,
            Policy::Fifo => PolicyKind::Fifo,
            Policy::Lfu(_) => PolicyKind::Lfu,
            Policy::Tlru(_) => PolicyKind::Tlru,
            Policy::Arc(_) => PolicyKind::Arc,
        }
    }

    pub fn name(&self) -> &'static str {
        self.kind().name()
    }

    /// Record a hit (get or overwrite) against an item.
    pub fn on_access(&mut self, _key: &Bytes, metrics: &ItemMetrics, now_us: u64) {
        match self {
            Policy::Lru | Policy::Tlru(_) => metrics.record_access(now_us),
            Policy::Fifo => metrics.bump_count(),
            Policy::Lfu(state) => {
                metrics.record_access(now_us);
                if now_us.saturating_sub(state.last_decay_us) >= state.decay_interval_us {
                    metrics.age(state.decay_factor);
                    state.last_decay_us = now_us;
                }
            }
            Policy::Arc(state) => {
                let first_hit = metrics.access_count() <= 1;
                metrics.record_access(now_us);
                if first_hit {
                    state.t1_hits += 1;
                } else {
                    state.t2_hits += 1;
                }
            }
        }
    }

    /// Record a fresh insertion.
    pub fn on_add(&mut self, key: &Bytes, metrics: &ItemMetrics, now_us: u64) {
        match self {
            Policy::Lru | Policy::Tlru(_) | Policy::Lfu(_) => metrics.record_access(now_us),
            // FIFO orders by insertion time only.
            Policy::Fifo => {}
            Policy::Arc(state) => {
                if state.ghost_recency.remove(key) {
                    state.ghost_recency_hits += 1;
                    state.p = (state.p + 0.05).min(1.0);
                } else if state.ghost_frequency.remove(key) {
                    state.ghost_frequency_hits += 1;
                    state.p = (state.p - 0.05).max(0.0);
                }
                metrics.record_access(now_us);
            }
        }
    }

    /// Record an eviction or removal.
    pub fn on_eviction(&mut self, key: &Bytes, metrics: &ItemMetrics) {
        if let Policy::Arc(state) = self {
            if metrics.access_count() <= 1 {
                state.ghost_recency.insert(key);
            } else {
                state.ghost_frequency.insert(key);
            }
        }
    }

    /// Whether the item should be dropped on sight (TTL expiry).
    pub fn should_evict(&self, metrics: &ItemMetrics, now_us: u64) -> bool {
        match self {
            Policy::Tlru(state) => now_us.saturating_sub(metrics.last_access_us()) > state.ttl_us,
            _ => false,
        }
    }

    /// Eviction priority: higher evicts first.
    pub fn priority(&self, metrics: &ItemMetrics) -> f64 {
        match self {
            Policy::Lru | Policy::Tlru(_) => -(metrics.last_access_us() as f64),
            Policy::Fifo => -(metrics.inserted_at_us() as f64),
            Policy::Lfu(_) => {
                let count = metrics.access_count();
                if count == 0 {
                    return f64::INFINITY;
                }
                1.0 / (count as f64 * metrics.frequency_weight())
            }
            Policy::Arc(_) => {
                if metrics.access_count() <= 1 {
                    ARC_T1_BASE - metrics.last_access_us() as f64
                } else {
                    -(metrics.last_access_us() as f64)
                }
            }
        }
    }

    /// Recommended capacity change in percent, fed the cache-level hit and
    /// miss counts observed since startup.
    pub fn size_adjustment(&self, hits: u64, misses: u64) -> i32 {
        match self {
            Policy::Lru | Policy::Fifo | Policy::Tlru(_) => 0,
            Policy::Lfu(_) => {
                let samples = hits + misses;
                if samples < 1000 {
                    return 0;
                }
                let ratio = hits as f64 / samples as f64;
                if ratio > 0.9 {
                    10
                } else if ratio < 0.5 {
                    -10
                } else {
                    0
                }
            }
            Policy::Arc(state) => {
                let samples = state.t1_hits
                    + state.t2_hits
                    + state.ghost_recency_hits
                    + state.ghost_frequency_hits;
                if samples < 1000 {
                    return 0;
                }
                let ghost_ratio = (state.ghost_recency_hits + state.ghost_frequency_hits) as f64
                    / samples as f64;
                if ghost_ratio > 0.2 {
                    return 20;
                }
                let hit_ratio = (state.t1_hits + state.t2_hits) as f64 / samples as f64;
                if hit_ratio < 0.5 {
                    return -10;
                }
                0
            }
        }
    }

    /// Drop accumulated policy state.
    pub fn reset(&mut self) {
        match self {
            Policy::Lru | Policy::Fifo | Policy::Tlru(_) => {}
            Policy::Lfu(state) => state.last_decay_us = 0,
            Policy::Arc(state) => {
                state.p = 0.5;
                state.t1_hits = 0;
                state.t2_hits = 0;
                state.ghost_recency_hits = 0;
                state.ghost_frequency_hits = 0;
                state.ghost_recency.clear();
                state.ghost_frequency.clear();
            }
        }
    }

    /// Current ARC balance parameter (tests and stats).
    pub fn arc_balance(&self) -> Option<f64> {
        match self {
            Policy::Arc(state) => Some(state.p),
            _ => None,
        }
    }

    /// TTL for TLRU policies.
    pub fn ttl(&self) -> Option<Duration> {
        match self {
            Policy::Tlru(state) => Some(Duration::from_micros(state.ttl_us)),
            _ => None,
        }
    }
}

/// Bounded record of recently evicted keys (ARC's B1/B2).
///
/// Membership is exact; order is kept lazily, with stale entries skipped
/// during trimming.
struct GhostList {
    order: VecDeque<Bytes>,
    members: HashSet<Bytes, ahash::RandomState>,
    capacity: usize,
}

impl GhostList {
    fn new(capacity: usize) -> Self {
        GhostList {
            order: VecDeque::new(),
            members: HashSet::default(),
            capacity: capacity.max(1),
        }
    }

    fn insert(&mut self, key: &Bytes) {
        if self.members.insert(key.clone()) {
            self.order.push_back(key.clone());
            self.trim();
        }
    }

    fn remove(&mut self, key: &[u8]) -> bool {
        self.members.remove(key)
    }

    fn clear(&mut self) {
        self.order.clear();
        self.members.clear();
    }

    fn trim(&mut self) {
        while self.members.len() > self.capacity {
            match self.order.pop_front() {
                Some(old) => {
                    self.members.remove(&old);
                }
                None => break,
            }
        }
        // The order queue can accumulate entries removed on ghost hits.
        if self.order.len() > self.capacity * 2 {
            let members = &self.members;
            self.order.retain(|k| members.contains(&k[..]));
        }
    }
}
