//! Cache configuration.

use std::str::FromStr;
use std::time::Duration;

/// Eviction policy selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PolicyKind {
    /// Least recently used.
    Lru,
    /// Least frequently used, with frequency-weight decay.
    Lfu,
    /// First in, first out (insertion order).
    Fifo,
    /// Time-aware LRU: items expire after a TTL since last access.
    Tlru,
    /// Adaptive replacement cache with ghost-list feedback.
    Arc,
}

impl PolicyKind {
    pub fn name(&self) -> &'static str {
        match self {
            PolicyKind::Lru => "lru",
            PolicyKind::Lfu => "lfu",
            PolicyKind::Fifo => "fifo",
            PolicyKind::Tlru => "tlru",
            PolicyKind::Arc => "arc",
        }
    }
}

impl FromStr for PolicyKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "lru" => Ok(PolicyKind::Lru),
            "lfu" => Ok(PolicyKind::Lfu),
            "fifo" => Ok(PolicyKind::Fifo),
            "tlru" => Ok(PolicyKind::Tlru),
            "arc" => Ok(PolicyKind::Arc),
            other => Err(format!(
                "unknown cache policy '{}' (expected lru, lfu, fifo, tlru or arc)",
                other
            )),
        }
    }
}

/// Cache construction options.
#[derive(Debug, Clone)]
pub struct CacheOptions {
    /// Number of shards; rounded up to a power of two.
    pub shard_count: usize,
    /// Starting item capacity across all shards.
    pub initial_capacity: usize,
    /// Lower bound for adaptive resizing.
    pub min_capacity: usize,
    /// Upper bound for adaptive resizing.
    pub max_capacity: usize,
    /// Eviction policy.
    pub policy: PolicyKind,
    /// Item TTL (TLRU only).
    pub ttl: Duration,
    /// LFU frequency-weight decay factor.
    pub lfu_decay_factor: f64,
    /// How often LFU decay is applied.
    pub lfu_decay_interval: Duration,
    /// Cadence of the background capacity adjustment.
    pub adjustment_interval: Duration,
    /// Whether the background resizer runs at all.
    pub enable_adaptive_sizing: bool,
    /// Fill ratio past which an expiration sweep runs after inserts.
    pub cleanup_threshold: f64,
    /// Target fill ratio for pressure-driven eviction.
    pub cleanup_target: f64,
}

impl Default for CacheOptions {
    fn default() -> Self {
        CacheOptions {
            shard_count: 16,
            initial_capacity: 100_000,
            min_capacity: 10_000,
            max_capacity: 10_000_000,
            policy: PolicyKind::Lru,
            ttl: Duration::from_secs(30 * 60),
            lfu_decay_factor: 0.95,
            lfu_decay_interval: Duration::from_secs(60 * 60),
            adjustment_interval: Duration::from_secs(60),
            enable_adaptive_sizing: true,
            cleanup_threshold: 0.9,
            cleanup_target: 0.8,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_from_str() {
        assert_eq!("lru".parse::<PolicyKind>().unwrap(), PolicyKind::Lru);
        assert_eq!("LFU".parse::<PolicyKind>().unwrap(), PolicyKind::Lfu);
        assert_eq!("TlRu".parse::<PolicyKind>().unwrap(), PolicyKind::Tlru);
        assert!("clock".parse::<PolicyKind>().is_err());
    }

    #[test]
    fn test_defaults_sane() {
        let options = CacheOptions::default();
        assert!(options.min_capacity <= options.initial_capacity);
        assert!(options.initial_capacity <= options.max_capacity);
        assert!(options.cleanup_target < options.cleanup_threshold);
    }
}
