//! Startup banner.

use crate::config::Config;
use std::fmt::Write;

/// Print a startup summary to stdout.
pub fn print_banner(config: &Config, workers: usize) {
    let mut output = String::with_capacity(512);

    let name = "anvilkv-server";
    let version = env!("CARGO_PKG_VERSION");
    writeln!(output, "{} v{}", name, version).unwrap();
    writeln!(output, "{}", "=".repeat(name.len() + version.len() + 2)).unwrap();
    writeln!(output).unwrap();

    writeln!(
        output,
        "Listen:      {}:{}",
        config.server.host, config.server.port
    )
    .unwrap();
    writeln!(output, "Workers:     {}", workers).unwrap();
    if let Some(cpus) = config.cpu_affinity() {
        writeln!(output, "CPU Pinning: {:?}", cpus).unwrap();
    }
    writeln!(output, "Max Conns:   {}", config.server.max_connections).unwrap();
    writeln!(output).unwrap();

    writeln!(output, "Store:").unwrap();
    writeln!(
        output,
        "  Shards:      {} x {} buckets",
        config.store.shard_count, config.store.bucket_per_shard
    )
    .unwrap();
    writeln!(
        output,
        "  Cache:       {} items, {} shards ({})",
        config.store.cache_size,
        config.store.cache_shards,
        config.store.cache_policy.name()
    )
    .unwrap();
    writeln!(
        output,
        "  Adaptive:    {}",
        if config.store.adaptive_cache_sizing {
            "on"
        } else {
            "off"
        }
    )
    .unwrap();
    writeln!(
        output,
        "  Compression: {}",
        if config.store.enable_compression {
            "on"
        } else {
            "off"
        }
    )
    .unwrap();
    if config.store.persist_path.is_empty() {
        writeln!(output, "  Persistence: off").unwrap();
    } else {
        writeln!(
            output,
            "  Persistence: {} (every {}s)",
            config.store.persist_path, config.store.sync_interval_sec
        )
        .unwrap();
    }
    writeln!(output).unwrap();

    print!("{}", output);
}
