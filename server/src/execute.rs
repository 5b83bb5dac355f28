//! Command execution.
//!
//! Dispatches a parsed command by its lowercased name and writes the RESP
//! reply directly into the connection's write buffer. Every recognized
//! command records its latency in the per-command table; INFO serializes
//! those along with server and cache state.

use bytes::BytesMut;
use datastore::DataStore;
use protocol_resp::{reply, Command};
use std::fmt::Write as _;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::Instant;

use crate::command_stats::{CommandKind, CommandStatsTable};
use crate::metrics::COMMANDS_PROCESSED;
use crate::server::ServerShared;

/// Everything a handler needs, shared across workers.
pub struct ExecEnv {
    pub store: Arc<DataStore>,
    pub stats: Arc<CommandStatsTable>,
    pub shared: Arc<ServerShared>,
}

/// Execute one command, appending the reply to `out`.
pub fn execute(cmd: &Command, env: &ExecEnv, out: &mut BytesMut) {
    let name = cmd.name().to_ascii_lowercase();
    let Some(kind) = CommandKind::from_name(&name) else {
        let display = String::from_utf8_lossy(cmd.name());
        reply::error(out, &format!("ERR unknown command '{}'", display));
        return;
    };

    let started = Instant::now();
    match kind {
        CommandKind::Set => set(cmd, env, out),
        CommandKind::Get => get(cmd, env, out),
        CommandKind::Del => del(cmd, env, out),
        CommandKind::MSet => mset(cmd, env, out),
        CommandKind::MGet => mget(cmd, env, out),
        CommandKind::Info => info(cmd, env, out),
    }
    env.stats.record(kind, started.elapsed().as_micros() as u64);
    env.shared.total_commands.fetch_add(1, Ordering::Relaxed);
    COMMANDS_PROCESSED.increment();
}

fn wrong_arity(out: &mut BytesMut, kind: CommandKind) {
    reply::error(
        out,
        &format!("ERR wrong number of arguments for '{}' command", kind.name()),
    );
}

fn set(cmd: &Command, env: &ExecEnv, out: &mut BytesMut) {
    let args = cmd.args();
    if args.len() != 3 {
        wrong_arity(out, CommandKind::Set);
        return;
    }
    match env.store.set(args[1].clone(), args[2].clone()) {
        Ok(()) => reply::ok(out),
        Err(e) => reply::error(out, &format!("ERR {}", e)),
    }
}

fn get(cmd: &Command, env: &ExecEnv, out: &mut BytesMut) {
    let args = cmd.args();
    if args.len() != 2 {
        wrong_arity(out, CommandKind::Get);
        return;
    }
    match env.store.get(&args[1]) {
        Ok(Some(value)) => reply::bulk(out, &value),
        Ok(None) => reply::null_bulk(out),
        Err(e) => reply::error(out, &format!("ERR {}", e)),
    }
}

fn del(cmd: &Command, env: &ExecEnv, out: &mut BytesMut) {
    let args = cmd.args();
    if args.len() != 2 {
        wrong_arity(out, CommandKind::Del);
        return;
    }
    let deleted = env.store.del(&args[1]);
    reply::integer(out, if deleted { 1 } else { 0 });
}

fn mset(cmd: &Command, env: &ExecEnv, out: &mut BytesMut) {
    let args = cmd.args();
    if args.len() < 3 || (args.len() - 1) % 2 != 0 {
        wrong_arity(out, CommandKind::MSet);
        return;
    }
    let pairs = args[1..]
        .chunks_exact(2)
        .map(|pair| (pair[0].clone(), pair[1].clone()))
        .collect();
    match env.store.multi_set(pairs) {
        Ok(()) => reply::ok(out),
        Err(e) => reply::error(out, &format!("ERR {}", e)),
    }
}

fn mget(cmd: &Command, env: &ExecEnv, out: &mut BytesMut) {
    let args = cmd.args();
    if args.len() < 2 {
        wrong_arity(out, CommandKind::MGet);
        return;
    }
    match env.store.multi_get(&args[1..]) {
        Ok(values) => {
            reply::array_header(out, values.len());
            for value in values {
                match value {
                    Some(value) => reply::bulk(out, &value),
                    None => reply::null_bulk(out),
                }
            }
        }
        Err(e) => reply::error(out, &format!("ERR {}", e)),
    }
}

fn info(cmd: &Command, env: &ExecEnv, out: &mut BytesMut) {
    if cmd.args().len() != 1 {
        wrong_arity(out, CommandKind::Info);
        return;
    }
    let body = render_info(env);
    reply::bulk(out, body.as_bytes());
}

/// Render the INFO body: server state, cache state, per-command latency.
fn render_info(env: &ExecEnv) -> String {
    let shared = &env.shared;
    let uptime = shared.start.elapsed();
    let total_commands = shared.total_commands.load(Ordering::Relaxed);
    let commands_per_second = if uptime.as_secs_f64() > 0.0 {
        total_commands as f64 / uptime.as_secs_f64()
    } else {
        0.0
    };

    let mut body = String::with_capacity(1024);

    body.push_str("# Server\r\n");
    let _ = writeln!(body, "version:{}\r", env!("CARGO_PKG_VERSION"));
    let _ = writeln!(body, "uptime_seconds:{}\r", uptime.as_secs());
    let _ = writeln!(
        body,
        "total_connections:{}\r",
        shared.total_connections.load(Ordering::Relaxed)
    );
    let _ = writeln!(
        body,
        "current_connections:{}\r",
        shared.current_connections.load(Ordering::Relaxed)
    );
    let _ = writeln!(body, "total_commands:{}\r", total_commands);
    let _ = writeln!(body, "commands_per_second:{:.2}\r", commands_per_second);
    let _ = writeln!(body, "store_entries:{}\r", env.store.entry_count());
    body.push_str("\r\n");

    let cache = env.store.cache_stats();
    body.push_str("# Cache\r\n");
    let _ = writeln!(body, "policy:{}\r", cache.policy);
    let _ = writeln!(body, "size:{}\r", cache.size);
    let _ = writeln!(body, "capacity:{}\r", cache.capacity);
    let _ = writeln!(body, "hits:{}\r", cache.hits);
    let _ = writeln!(body, "misses:{}\r", cache.misses);
    let _ = writeln!(body, "hit_ratio:{:.4}\r", cache.hit_ratio);
    let _ = writeln!(body, "evictions:{}\r", cache.evictions);
    let _ = writeln!(body, "expirations:{}\r", cache.expirations);
    let _ = writeln!(body, "memory_bytes:{}\r", cache.memory_usage);
    body.push_str("\r\n");

    body.push_str("# Commandstats\r\n");
    for kind in CommandKind::ALL {
        let latency = env.stats.latency(kind);
        if latency.calls == 0 {
            continue;
        }
        let _ = writeln!(
            body,
            "cmdstat_{}:calls={},usec={},usec_min={},usec_max={}\r",
            kind.name(),
            latency.calls,
            latency.total_us,
            latency.min_us,
            latency.max_us
        );
    }

    body
}

#[cfg(test)]
mod tests {
    use super::*;
    use adaptive_cache::{CacheOptions, PolicyKind};
    use bytes::Bytes;
    use datastore::StoreOptions;

    fn env() -> ExecEnv {
        let store = DataStore::new(StoreOptions {
            shard_count: 4,
            buckets_per_shard: 2,
            cache: CacheOptions {
                shard_count: 2,
                initial_capacity: 1000,
                min_capacity: 10,
                policy: PolicyKind::Lru,
                enable_adaptive_sizing: false,
                ..CacheOptions::default()
            },
            ..StoreOptions::default()
        })
        .unwrap();
        ExecEnv {
            store: Arc::new(store),
            stats: Arc::new(CommandStatsTable::new()),
            shared: Arc::new(ServerShared::new()),
        }
    }

    fn run(env: &ExecEnv, args: &[&[u8]]) -> BytesMut {
        let cmd = Command::new(args.iter().map(|a| Bytes::copy_from_slice(a)).collect());
        let mut out = BytesMut::new();
        execute(&cmd, env, &mut out);
        out
    }

    #[test]
    fn test_set_get_round_trip() {
        let env = env();
        assert_eq!(&run(&env, &[b"SET", b"foo", b"bar"])[..], b"+OK\r\n");
        assert_eq!(&run(&env, &[b"GET", b"foo"])[..], b"$3\r\nbar\r\n");
    }

    #[test]
    fn test_get_miss_is_null() {
        let env = env();
        assert_eq!(&run(&env, &[b"GET", b"absent"])[..], b"$-1\r\n");
    }

    #[test]
    fn test_del() {
        let env = env();
        run(&env, &[b"SET", b"k", b"v"]);
        assert_eq!(&run(&env, &[b"DEL", b"k"])[..], b":1\r\n");
        assert_eq!(&run(&env, &[b"DEL", b"k"])[..], b":0\r\n");
    }

    #[test]
    fn test_mset_mget() {
        let env = env();
        assert_eq!(
            &run(&env, &[b"MSET", b"a", b"1", b"b", b"2"])[..],
            b"+OK\r\n"
        );
        assert_eq!(
            &run(&env, &[b"MGET", b"a", b"b", b"ghost"])[..],
            b"*3\r\n$1\r\n1\r\n$1\r\n2\r\n$-1\r\n"
        );
    }

    #[test]
    fn test_mset_odd_pairs_is_arity_error() {
        let env = env();
        assert_eq!(
            &run(&env, &[b"MSET", b"a", b"1", b"b"])[..],
            b"-ERR wrong number of arguments for 'mset' command\r\n"
        );
    }

    #[test]
    fn test_wrong_arity_messages() {
        let env = env();
        assert_eq!(
            &run(&env, &[b"SET", b"x"])[..],
            b"-ERR wrong number of arguments for 'set' command\r\n"
        );
        assert_eq!(
            &run(&env, &[b"GET"])[..],
            b"-ERR wrong number of arguments for 'get' command\r\n"
        );
        assert_eq!(
            &run(&env, &[b"MGET"])[..],
            b"-ERR wrong number of arguments for 'mget' command\r\n"
        );
    }

    #[test]
    fn test_unknown_command() {
        let env = env();
        assert_eq!(
            &run(&env, &[b"SUBSCRIBE", b"chan"])[..],
            b"-ERR unknown command 'SUBSCRIBE'\r\n"
        );
    }

    #[test]
    fn test_command_names_case_insensitive() {
        let env = env();
        assert_eq!(&run(&env, &[b"set", b"k", b"v"])[..], b"+OK\r\n");
        assert_eq!(&run(&env, &[b"GeT", b"k"])[..], b"$1\r\nv\r\n");
    }

    #[test]
    fn test_binary_values_round_trip() {
        let env = env();
        let value: &[u8] = b"\x00\x01\r\n\xff";
        run(&env, &[b"SET", b"bin", value]);
        let out = run(&env, &[b"GET", b"bin"]);
        assert_eq!(&out[..], b"$5\r\n\x00\x01\r\n\xff\r\n");
    }

    #[test]
    fn test_info_length_matches_body() {
        let env = env();
        run(&env, &[b"SET", b"k", b"v"]);
        run(&env, &[b"GET", b"k"]);
        let out = run(&env, &[b"INFO"]);

        // Parse the bulk header and verify the declared length is exact.
        assert_eq!(out[0], b'$');
        let header_end = out.iter().position(|&b| b == b'\r').unwrap();
        let declared: usize = std::str::from_utf8(&out[1..header_end])
            .unwrap()
            .parse()
            .unwrap();
        let body = &out[header_end + 2..out.len() - 2];
        assert_eq!(declared, body.len());

        let text = std::str::from_utf8(body).unwrap();
        assert!(text.contains("# Server"));
        assert!(text.contains("# Cache"));
        assert!(text.contains("cmdstat_set:calls=1"));
        assert!(text.contains("cmdstat_get:calls=1"));
    }

    #[test]
    fn test_latency_recorded() {
        let env = env();
        run(&env, &[b"SET", b"k", b"v"]);
        run(&env, &[b"SET", b"k", b"v2"]);
        let latency = env.stats.latency(CommandKind::Set);
        assert_eq!(latency.calls, 2);
        assert!(latency.max_us >= latency.min_us);
    }
}
