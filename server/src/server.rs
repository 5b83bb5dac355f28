//! Server facade.
//!
//! Owns the listening socket, the acceptor thread, the worker pool and the
//! stats thread. `run()` blocks until `stop()` is called (or the acceptor
//! dies); `stop()` is idempotent and safe to call from a signal handler.

use datastore::{DataStore, StoreError};
use io_reactor::{bind_listener, BufferPool, Poller};
use std::io;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use crate::acceptor::{run_acceptor, WorkerLink};
use crate::affinity::set_cpu_affinity;
use crate::command_stats::CommandStatsTable;
use crate::config::Config;
use crate::context::{ContextPool, DEFAULT_PER_SHARD_CAP, DEFAULT_POOL_SHARDS};
use crate::execute::ExecEnv;
use crate::metrics::{WorkerStats, WorkerStatsSnapshot};
use crate::worker::{run_worker, WorkerContext};

const LISTEN_BACKLOG: u32 = 1024;
const STATS_TICK: Duration = Duration::from_millis(200);
const STATS_REPORT_EVERY: u32 = 50; // ~10s

/// Counters shared across the acceptor, workers and INFO.
pub struct ServerShared {
    pub total_connections: AtomicU64,
    pub current_connections: AtomicU64,
    pub total_commands: AtomicU64,
    pub start: Instant,
}

impl ServerShared {
    pub fn new() -> Self {
        ServerShared {
            total_connections: AtomicU64::new(0),
            current_connections: AtomicU64::new(0),
            total_commands: AtomicU64::new(0),
            start: Instant::now(),
        }
    }
}

impl Default for ServerShared {
    fn default() -> Self {
        Self::new()
    }
}

/// Aggregate server statistics.
#[derive(Debug, Clone)]
pub struct ServerStats {
    pub total_connections: u64,
    pub current_connections: u64,
    pub total_commands: u64,
    pub commands_per_second: f64,
    pub uptime: Duration,
}

pub struct Server {
    config: Config,
    store: Arc<DataStore>,
    shared: Arc<ServerShared>,
    command_stats: Arc<CommandStatsTable>,
    running: Arc<AtomicBool>,
}

impl Server {
    /// Build the server: constructs the store (loading persisted shards
    /// when configured). Binding happens in [`run`](Server::run).
    pub fn new(config: Config) -> Result<Self, StoreError> {
        let store = Arc::new(DataStore::new(config.store_options())?);
        Ok(Server {
            config,
            store,
            shared: Arc::new(ServerShared::new()),
            command_stats: Arc::new(CommandStatsTable::new()),
            running: Arc::new(AtomicBool::new(true)),
        })
    }

    /// Serve until [`stop`](Server::stop). Returns a startup error if the
    /// listen socket cannot be bound.
    pub fn run(&self) -> io::Result<()> {
        let addr = self
            .config
            .listen_addr()
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidInput, e.to_string()))?;
        let listener = bind_listener(addr, LISTEN_BACKLOG)?;
        let workers = self.config.worker_threads().max(1);
        tracing::info!(%addr, workers, "listening");

        let buffers = Arc::new(BufferPool::new());
        let contexts = Arc::new(ContextPool::new(
            DEFAULT_POOL_SHARDS,
            DEFAULT_PER_SHARD_CAP,
            buffers,
            self.config.server.initial_buffer_size,
            self.config.server.max_buffer_size,
        ));
        let env = Arc::new(ExecEnv {
            store: self.store.clone(),
            stats: self.command_stats.clone(),
            shared: self.shared.clone(),
        });
        let worker_stats: Arc<Vec<WorkerStats>> =
            Arc::new((0..workers).map(|_| WorkerStats::new()).collect());
        let cpu_affinity = self.config.cpu_affinity();

        let mut links = Vec::with_capacity(workers);
        let mut worker_handles = Vec::with_capacity(workers);
        for id in 0..workers {
            let poller = Poller::new(self.config.server.max_events)?;
            let waker = poller.waker();
            let (tx, rx) = crossbeam_channel::unbounded();
            let load = Arc::new(AtomicUsize::new(0));
            links.push(WorkerLink {
                tx,
                waker,
                load: load.clone(),
            });

            let worker_ctx = WorkerContext {
                id,
                poller,
                accept_rx: rx,
                running: self.running.clone(),
                env: env.clone(),
                contexts: contexts.clone(),
                load,
                stats: worker_stats.clone(),
                initial_buffer_size: self.config.server.initial_buffer_size,
                max_buffer_size: self.config.server.max_buffer_size,
            };
            let cpu = cpu_affinity.as_ref().map(|cpus| cpus[id % cpus.len()]);

            let handle = thread::Builder::new()
                .name(format!("worker-{}", id))
                .spawn(move || {
                    if let Some(cpu) = cpu {
                        if let Err(e) = set_cpu_affinity(cpu) {
                            tracing::warn!(cpu, error = %e, "failed to pin worker");
                        }
                    }
                    run_worker(worker_ctx);
                })?;
            worker_handles.push(handle);
        }

        let stats_handle = {
            let running = self.running.clone();
            let shared = self.shared.clone();
            let worker_stats = worker_stats.clone();
            thread::Builder::new()
                .name("stats".to_string())
                .spawn(move || stats_loop(running, shared, worker_stats))?
        };

        let acceptor_handle = {
            let running = self.running.clone();
            let max_connections = self.config.server.max_connections;
            thread::Builder::new()
                .name("acceptor".to_string())
                .spawn(move || run_acceptor(listener, links, running, max_connections))?
        };

        // The acceptor exits when `running` clears — via stop() or its own
        // fatal error (which clears the flag itself).
        let _ = acceptor_handle.join();
        self.running.store(false, Ordering::Release);

        for handle in worker_handles {
            let _ = handle.join();
        }
        let _ = stats_handle.join();

        if let Err(e) = self.store.flush_all() {
            tracing::warn!(error = %e, "final flush failed");
        }
        tracing::info!("server stopped");
        Ok(())
    }

    /// Request shutdown. Idempotent; callable from a signal handler. The
    /// acceptor and workers observe the flag within their poll timeouts.
    pub fn stop(&self) {
        if self.running.swap(false, Ordering::SeqCst) {
            tracing::info!("shutdown requested");
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::Acquire)
    }

    pub fn store(&self) -> &Arc<DataStore> {
        &self.store
    }

    pub fn stats(&self) -> ServerStats {
        let uptime = self.shared.start.elapsed();
        let total_commands = self.shared.total_commands.load(Ordering::Relaxed);
        ServerStats {
            total_connections: self.shared.total_connections.load(Ordering::Relaxed),
            current_connections: self.shared.current_connections.load(Ordering::Relaxed),
            total_commands,
            commands_per_second: if uptime.as_secs_f64() > 0.0 {
                total_commands as f64 / uptime.as_secs_f64()
            } else {
                0.0
            },
            uptime,
        }
    }
}

/// Periodic rate logging from the per-worker stat blocks.
fn stats_loop(
    running: Arc<AtomicBool>,
    shared: Arc<ServerShared>,
    worker_stats: Arc<Vec<WorkerStats>>,
) {
    let mut prev: Vec<WorkerStatsSnapshot> = worker_stats.iter().map(|s| s.snapshot()).collect();
    let mut prev_commands = shared.total_commands.load(Ordering::Relaxed);
    let mut ticks = 0u32;

    while running.load(Ordering::Acquire) {
        thread::sleep(STATS_TICK);
        ticks += 1;
        if ticks < STATS_REPORT_EVERY {
            continue;
        }
        ticks = 0;

        let window = STATS_TICK.as_secs_f64() * STATS_REPORT_EVERY as f64;
        let commands = shared.total_commands.load(Ordering::Relaxed);
        let rate = (commands - prev_commands) as f64 / window;
        prev_commands = commands;

        tracing::info!(
            connections = shared.current_connections.load(Ordering::Relaxed),
            commands_per_sec = rate,
            "stats"
        );

        for (i, stats) in worker_stats.iter().enumerate() {
            let current = stats.snapshot();
            let delta = current.delta(&prev[i]);
            if delta.recv_events > 0 || delta.send_events > 0 || current.active_connections > 0 {
                tracing::debug!(
                    worker = i,
                    conns = current.active_connections,
                    recv = delta.recv_events,
                    send = delta.send_events,
                    bytes_in = delta.bytes_received,
                    bytes_out = delta.bytes_sent,
                    commands = delta.commands,
                    "worker stats"
                );
            }
            prev[i] = current;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stop_is_idempotent() {
        let mut config = Config::default();
        config.store.cache_size = 100;
        config.adaptive_cache.min_capacity = 10;
        config.store.adaptive_cache_sizing = false;
        let server = Server::new(config).unwrap();
        assert!(server.is_running());
        server.stop();
        server.stop();
        assert!(!server.is_running());
    }

    #[test]
    fn test_stats_initial() {
        let mut config = Config::default();
        config.store.adaptive_cache_sizing = false;
        let server = Server::new(config).unwrap();
        let stats = server.stats();
        assert_eq!(stats.total_connections, 0);
        assert_eq!(stats.total_commands, 0);
    }
}
