//! Server configuration.
//!
//! Loaded from an INI-style file (`[section]` headers, `key = value` lines,
//! `#` comments) into typed sections with defaults. Buffer sizes accept
//! `64KB`-style suffixes.

use adaptive_cache::{CacheOptions, PolicyKind};
use datastore::StoreOptions;
use std::collections::HashMap;
use std::net::{SocketAddr, ToSocketAddrs};
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid value for {key}: {reason}")]
    InvalidValue { key: String, reason: String },

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Socket and buffer limits.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Readiness events collected per poller wait.
    pub max_events: usize,
    /// Starting size of per-connection buffers.
    pub initial_buffer_size: usize,
    /// Hard ceiling for per-connection buffers and per-round reads.
    pub max_buffer_size: usize,
    /// Admission limit; connections past this are closed on accept.
    pub max_connections: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        ServerConfig {
            host: "127.0.0.1".to_string(),
            port: 6379,
            max_events: 4096,
            initial_buffer_size: 16 * 1024,
            max_buffer_size: 256 * 1024,
            max_connections: 10_000,
        }
    }
}

/// Thread counts. Zero means "derive from the hardware thread count".
///
/// The reactor folds reads, command execution and writes into the worker
/// that owns the connection, so `read_threads` sizes the worker pool;
/// `write_threads`, `accept_threads` and `command_threads` are accepted for
/// config-file compatibility and validated but do not create extra pools.
#[derive(Debug, Clone)]
pub struct ThreadPoolConfig {
    pub read_threads: usize,
    pub write_threads: usize,
    pub accept_threads: usize,
    pub command_threads: usize,
    /// Optional CPU list ("0-3,6") to pin workers to.
    pub cpu_affinity: Option<String>,
}

impl Default for ThreadPoolConfig {
    fn default() -> Self {
        ThreadPoolConfig {
            read_threads: 0,
            write_threads: 0,
            accept_threads: 1,
            command_threads: 0,
            cpu_affinity: None,
        }
    }
}

/// Store and cache-policy selection.
#[derive(Debug, Clone)]
pub struct StoreConfig {
    pub shard_count: usize,
    pub bucket_per_shard: usize,
    /// Initial cache capacity in items.
    pub cache_size: usize,
    /// Cache shard count.
    pub cache_shards: usize,
    pub cache_policy: PolicyKind,
    pub adaptive_cache_sizing: bool,
    pub enable_compression: bool,
    /// Persistence directory; empty disables persistence.
    pub persist_path: String,
    pub sync_interval_sec: u64,
}

impl Default for StoreConfig {
    fn default() -> Self {
        StoreConfig {
            shard_count: 128,
            bucket_per_shard: 16,
            cache_size: 100_000,
            cache_shards: 32,
            cache_policy: PolicyKind::Lru,
            adaptive_cache_sizing: true,
            enable_compression: false,
            persist_path: String::new(),
            sync_interval_sec: 600,
        }
    }
}

/// Bounds and cadence for adaptive cache sizing.
#[derive(Debug, Clone)]
pub struct AdaptiveCacheConfig {
    pub min_capacity: usize,
    pub max_capacity: usize,
    pub adjustment_interval_sec: u64,
    pub cleanup_threshold: f64,
    pub cleanup_target: f64,
}

impl Default for AdaptiveCacheConfig {
    fn default() -> Self {
        AdaptiveCacheConfig {
            min_capacity: 1000,
            max_capacity: 1_000_000,
            adjustment_interval_sec: 60,
            cleanup_threshold: 0.9,
            cleanup_target: 0.8,
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct Config {
    pub server: ServerConfig,
    pub thread_pool: ThreadPoolConfig,
    pub store: StoreConfig,
    pub adaptive_cache: AdaptiveCacheConfig,
}

impl Config {
    /// Load and validate a configuration file.
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let loader = IniLoader::load(path)?;
        let config = Self::from_loader(&loader)?;
        config.validate()?;
        Ok(config)
    }

    fn from_loader(loader: &IniLoader) -> Result<Self, ConfigError> {
        let defaults = Config::default();

        let server = ServerConfig {
            host: loader.get_str("server", "host", &defaults.server.host),
            port: loader.get_parsed("server", "port", defaults.server.port)?,
            max_events: loader.get_parsed("server", "max_events", defaults.server.max_events)?,
            initial_buffer_size: loader.get_size(
                "server",
                "initial_buffer_size",
                defaults.server.initial_buffer_size,
            )?,
            max_buffer_size: loader.get_size(
                "server",
                "max_buffer_size",
                defaults.server.max_buffer_size,
            )?,
            max_connections: loader.get_parsed(
                "server",
                "max_connections",
                defaults.server.max_connections,
            )?,
        };

        let thread_pool = ThreadPoolConfig {
            read_threads: loader.get_parsed("thread_pool", "read_threads", 0)?,
            write_threads: loader.get_parsed("thread_pool", "write_threads", 0)?,
            accept_threads: loader.get_parsed("thread_pool", "accept_threads", 1)?,
            command_threads: loader.get_parsed("thread_pool", "command_threads", 0)?,
            cpu_affinity: loader.get_opt("thread_pool", "cpu_affinity"),
        };

        let policy_str = loader.get_str("store", "cache_policy", "lru");
        let cache_policy = policy_str
            .parse::<PolicyKind>()
            .map_err(|reason| ConfigError::InvalidValue {
                key: "store.cache_policy".to_string(),
                reason,
            })?;

        let store = StoreConfig {
            shard_count: loader.get_parsed("store", "shard_count", defaults.store.shard_count)?,
            bucket_per_shard: loader.get_parsed(
                "store",
                "bucket_per_shard",
                defaults.store.bucket_per_shard,
            )?,
            cache_size: loader.get_parsed("store", "cache_size", defaults.store.cache_size)?,
            cache_shards: loader.get_parsed("store", "cache_shards", defaults.store.cache_shards)?,
            cache_policy,
            adaptive_cache_sizing: loader.get_bool(
                "store",
                "adaptive_cache_sizing",
                defaults.store.adaptive_cache_sizing,
            )?,
            enable_compression: loader.get_bool(
                "store",
                "enable_compression",
                defaults.store.enable_compression,
            )?,
            persist_path: loader.get_str("store", "persist_path", ""),
            sync_interval_sec: loader.get_parsed(
                "store",
                "sync_interval_sec",
                defaults.store.sync_interval_sec,
            )?,
        };

        let adaptive_cache = AdaptiveCacheConfig {
            min_capacity: loader.get_parsed(
                "adaptive_cache",
                "min_capacity",
                defaults.adaptive_cache.min_capacity,
            )?,
            max_capacity: loader.get_parsed(
                "adaptive_cache",
                "max_capacity",
                defaults.adaptive_cache.max_capacity,
            )?,
            adjustment_interval_sec: loader.get_parsed(
                "adaptive_cache",
                "adjustment_interval_sec",
                defaults.adaptive_cache.adjustment_interval_sec,
            )?,
            cleanup_threshold: loader.get_parsed(
                "adaptive_cache",
                "cleanup_threshold",
                defaults.adaptive_cache.cleanup_threshold,
            )?,
            cleanup_target: loader.get_parsed(
                "adaptive_cache",
                "cleanup_target",
                defaults.adaptive_cache.cleanup_target,
            )?,
        };

        Ok(Config {
            server,
            thread_pool,
            store,
            adaptive_cache,
        })
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.server.initial_buffer_size == 0 {
            return Err(ConfigError::Invalid(
                "initial_buffer_size must be positive".to_string(),
            ));
        }
        if self.server.max_buffer_size < self.server.initial_buffer_size {
            return Err(ConfigError::Invalid(format!(
                "max_buffer_size ({}) must be at least initial_buffer_size ({})",
                self.server.max_buffer_size, self.server.initial_buffer_size
            )));
        }
        if self.server.max_connections == 0 {
            return Err(ConfigError::Invalid(
                "max_connections must be positive".to_string(),
            ));
        }
        if self.store.shard_count == 0 || self.store.bucket_per_shard == 0 {
            return Err(ConfigError::Invalid(
                "shard_count and bucket_per_shard must be positive".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.adaptive_cache.cleanup_threshold)
            || !(0.0..=1.0).contains(&self.adaptive_cache.cleanup_target)
        {
            return Err(ConfigError::Invalid(
                "cleanup_threshold and cleanup_target must be within [0, 1]".to_string(),
            ));
        }
        if self.adaptive_cache.cleanup_target >= self.adaptive_cache.cleanup_threshold {
            return Err(ConfigError::Invalid(
                "cleanup_target must be below cleanup_threshold".to_string(),
            ));
        }
        if self.adaptive_cache.min_capacity > self.adaptive_cache.max_capacity {
            return Err(ConfigError::Invalid(
                "min_capacity must not exceed max_capacity".to_string(),
            ));
        }
        if let Some(affinity) = &self.thread_pool.cpu_affinity {
            parse_cpu_list(affinity)
                .map_err(|e| ConfigError::Invalid(format!("invalid cpu_affinity: {}", e)))?;
        }
        Ok(())
    }

    /// Number of worker threads: `read_threads`, or the hardware thread
    /// count when zero.
    pub fn worker_threads(&self) -> usize {
        if self.thread_pool.read_threads > 0 {
            return self.thread_pool.read_threads;
        }
        if let Some(cpus) = self.cpu_affinity() {
            return cpus.len();
        }
        num_cpus::get()
    }

    pub fn cpu_affinity(&self) -> Option<Vec<usize>> {
        self.thread_pool
            .cpu_affinity
            .as_ref()
            .and_then(|s| parse_cpu_list(s).ok())
    }

    /// Resolve the listen address.
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let spec = format!("{}:{}", self.server.host, self.server.port);
        spec.to_socket_addrs()
            .map_err(|e| ConfigError::Invalid(format!("cannot resolve {}: {}", spec, e)))?
            .next()
            .ok_or_else(|| ConfigError::Invalid(format!("no address for {}", spec)))
    }

    pub fn cache_options(&self) -> CacheOptions {
        CacheOptions {
            shard_count: self.store.cache_shards,
            initial_capacity: self.store.cache_size,
            min_capacity: self.adaptive_cache.min_capacity,
            max_capacity: self.adaptive_cache.max_capacity,
            policy: self.store.cache_policy,
            adjustment_interval: Duration::from_secs(self.adaptive_cache.adjustment_interval_sec),
            enable_adaptive_sizing: self.store.adaptive_cache_sizing,
            cleanup_threshold: self.adaptive_cache.cleanup_threshold,
            cleanup_target: self.adaptive_cache.cleanup_target,
            ..CacheOptions::default()
        }
    }

    pub fn store_options(&self) -> StoreOptions {
        StoreOptions {
            shard_count: self.store.shard_count,
            buckets_per_shard: self.store.bucket_per_shard,
            enable_compression: self.store.enable_compression,
            persist_path: if self.store.persist_path.is_empty() {
                None
            } else {
                Some(PathBuf::from(&self.store.persist_path))
            },
            sync_interval: Duration::from_secs(self.store.sync_interval_sec),
            cache: self.cache_options(),
        }
    }
}

/// Line-oriented `[section]` / `key = value` loader.
struct IniLoader {
    data: HashMap<String, String>,
}

impl IniLoader {
    fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Ok(Self::parse(&contents))
    }

    fn parse(contents: &str) -> Self {
        let mut data = HashMap::new();
        let mut section = String::new();

        for line in contents.lines() {
            let line = match line.find('#') {
                Some(pos) => &line[..pos],
                None => line,
            };
            let line = line.trim();
            if line.is_empty() {
                continue;
            }

            if line.starts_with('[') && line.ends_with(']') {
                section = line[1..line.len() - 1].trim().to_string();
                continue;
            }

            if let Some((key, value)) = line.split_once('=') {
                let key = format!("{}.{}", section, key.trim());
                data.insert(key, value.trim().to_string());
            }
        }

        IniLoader { data }
    }

    fn get_opt(&self, section: &str, key: &str) -> Option<String> {
        self.data.get(&format!("{}.{}", section, key)).cloned()
    }

    fn get_str(&self, section: &str, key: &str, default: &str) -> String {
        self.get_opt(section, key)
            .unwrap_or_else(|| default.to_string())
    }

    fn get_parsed<T: std::str::FromStr>(
        &self,
        section: &str,
        key: &str,
        default: T,
    ) -> Result<T, ConfigError>
    where
        T::Err: std::fmt::Display,
    {
        match self.get_opt(section, key) {
            Some(raw) => raw.parse().map_err(|e: T::Err| ConfigError::InvalidValue {
                key: format!("{}.{}", section, key),
                reason: e.to_string(),
            }),
            None => Ok(default),
        }
    }

    fn get_bool(&self, section: &str, key: &str, default: bool) -> Result<bool, ConfigError> {
        match self.get_opt(section, key) {
            Some(raw) => match raw.to_ascii_lowercase().as_str() {
                "true" | "yes" | "on" | "1" => Ok(true),
                "false" | "no" | "off" | "0" => Ok(false),
                other => Err(ConfigError::InvalidValue {
                    key: format!("{}.{}", section, key),
                    reason: format!("expected a boolean, got '{}'", other),
                }),
            },
            None => Ok(default),
        }
    }

    fn get_size(&self, section: &str, key: &str, default: usize) -> Result<usize, ConfigError> {
        match self.get_opt(section, key) {
            Some(raw) => parse_size(&raw).map_err(|reason| ConfigError::InvalidValue {
                key: format!("{}.{}", section, key),
                reason,
            }),
            None => Ok(default),
        }
    }
}

/// Parse a size like "65536", "64KB" or "1MB" into bytes.
pub fn parse_size(s: &str) -> Result<usize, String> {
    let s = s.trim();
    if s.is_empty() {
        return Err("empty size".to_string());
    }

    let (num_str, suffix) = match s.find(|c: char| c.is_alphabetic()) {
        Some(idx) => (&s[..idx], s[idx..].to_uppercase()),
        None => (s, String::new()),
    };

    let num: usize = num_str
        .trim()
        .parse()
        .map_err(|_| format!("invalid number: {}", num_str))?;

    let multiplier: usize = match suffix.as_str() {
        "" | "B" => 1,
        "K" | "KB" | "KIB" => 1024,
        "M" | "MB" | "MIB" => 1024 * 1024,
        "G" | "GB" | "GIB" => 1024 * 1024 * 1024,
        _ => return Err(format!("unknown size suffix: {}", suffix)),
    };

    num.checked_mul(multiplier)
        .ok_or_else(|| "size overflow".to_string())
}

/// Parse a CPU list like "0-3,6,8" into sorted unique CPU ids.
pub fn parse_cpu_list(list: &str) -> Result<Vec<usize>, String> {
    let mut cpus = Vec::new();

    for part in list.split(',') {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        if let Some((start_str, end_str)) = part.split_once('-') {
            let start: usize = start_str
                .trim()
                .parse()
                .map_err(|_| format!("invalid start of range: {}", start_str))?;
            let end: usize = end_str
                .trim()
                .parse()
                .map_err(|_| format!("invalid end of range: {}", end_str))?;
            if start > end {
                return Err(format!("invalid range: {} > {}", start, end));
            }
            cpus.extend(start..=end);
        } else {
            let cpu: usize = part
                .parse()
                .map_err(|_| format!("invalid CPU number: {}", part))?;
            cpus.push(cpu);
        }
    }

    if cpus.is_empty() {
        return Err("CPU list cannot be empty".to_string());
    }
    cpus.sort_unstable();
    cpus.dedup();
    Ok(cpus)
}

/// A commented default configuration, for `--print-config`.
pub fn default_config_text() -> &'static str {
    r#"# Key/value server configuration

[server]
host = 127.0.0.1
port = 6379
# Readiness events collected per poller wait
max_events = 4096
# Per-connection buffer sizes (accepts KB/MB suffixes)
initial_buffer_size = 16KB
max_buffer_size = 256KB
# Connections past this limit are closed on accept
max_connections = 10000

[thread_pool]
# 0 = hardware thread count
read_threads = 0
write_threads = 0
accept_threads = 1
command_threads = 0
# Pin workers to CPUs, e.g. "0-3,6"
# cpu_affinity = 0-3

[store]
shard_count = 128
bucket_per_shard = 16
# Initial cache capacity in items
cache_size = 100000
cache_shards = 32
# lru, lfu, fifo, tlru or arc
cache_policy = lru
adaptive_cache_sizing = true
enable_compression = false
# Empty disables persistence
persist_path =
sync_interval_sec = 600

[adaptive_cache]
min_capacity = 1000
max_capacity = 1000000
adjustment_interval_sec = 60
cleanup_threshold = 0.9
cleanup_target = 0.8
"#
}
