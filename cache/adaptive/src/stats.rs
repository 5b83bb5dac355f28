//! Cache statistics snapshot.

use std::time::Duration;

/// Point-in-time view of cache state and counters.
#[derive(Debug, Clone)]
pub struct CacheStats {
    /// Items currently stored.
    pub size: usize,
    /// Current capacity (items).
    pub capacity: usize,
    /// Lookup hits since startup.
    pub hits: u64,
    /// Lookup misses since startup.
    pub misses: u64,
    /// hits / (hits + misses), 0.0 when no lookups happened.
    pub hit_ratio: f64,
    /// Items dropped by capacity pressure.
    pub evictions: u64,
    /// Items dropped by TTL expiry.
    pub expirations: u64,
    /// Estimated bytes held (keys + values + fixed per-item overhead).
    pub memory_usage: usize,
    /// Time since the cache was created.
    pub uptime: Duration,
    /// Active policy name.
    pub policy: &'static str,
}
