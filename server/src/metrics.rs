//! Server metrics.
//!
//! Global counters and gauges are metriken statics; per-worker diagnostics
//! use plain atomic blocks with snapshot/delta support so the stats thread
//! can log rates.

use metriken::{metric, Counter, Gauge};
use std::sync::atomic::{AtomicU64, Ordering};

#[metric(
    name = "connections_accepted",
    description = "Total number of connections accepted"
)]
pub static CONNECTIONS_ACCEPTED: Counter = Counter::new();

#[metric(
    name = "connections_active",
    description = "Number of currently active connections"
)]
pub static CONNECTIONS_ACTIVE: Gauge = Gauge::new();

#[metric(
    name = "connections_rejected",
    description = "Connections closed at accept because the limit was reached"
)]
pub static CONNECTIONS_REJECTED: Counter = Counter::new();

#[metric(name = "commands_processed", description = "Total commands executed")]
pub static COMMANDS_PROCESSED: Counter = Counter::new();

#[metric(
    name = "protocol_errors",
    description = "Total protocol parse errors"
)]
pub static PROTOCOL_ERRORS: Counter = Counter::new();

/// Per-worker statistics for diagnosing load imbalance.
#[derive(Default)]
pub struct WorkerStats {
    pub polls: AtomicU64,
    pub wakeups: AtomicU64,
    pub recv_events: AtomicU64,
    pub send_events: AtomicU64,
    pub bytes_received: AtomicU64,
    pub bytes_sent: AtomicU64,
    pub commands: AtomicU64,
    pub closes: AtomicU64,
    pub active_connections: AtomicU64,
}

impl WorkerStats {
    pub const fn new() -> Self {
        WorkerStats {
            polls: AtomicU64::new(0),
            wakeups: AtomicU64::new(0),
            recv_events: AtomicU64::new(0),
            send_events: AtomicU64::new(0),
            bytes_received: AtomicU64::new(0),
            bytes_sent: AtomicU64::new(0),
            commands: AtomicU64::new(0),
            closes: AtomicU64::new(0),
            active_connections: AtomicU64::new(0),
        }
    }

    #[inline]
    pub fn inc_poll(&self) {
        self.polls.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_wakeup(&self) {
        self.wakeups.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_recv(&self) {
        self.recv_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_send(&self) {
        self.send_events.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_bytes_received(&self, n: u64) {
        self.bytes_received.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_bytes_sent(&self, n: u64) {
        self.bytes_sent.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn add_commands(&self, n: u64) {
        self.commands.fetch_add(n, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_open(&self) {
        self.active_connections.fetch_add(1, Ordering::Relaxed);
    }

    #[inline]
    pub fn inc_close(&self) {
        self.closes.fetch_add(1, Ordering::Relaxed);
        self.active_connections.fetch_sub(1, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> WorkerStatsSnapshot {
        WorkerStatsSnapshot {
            polls: self.polls.load(Ordering::Relaxed),
            wakeups: self.wakeups.load(Ordering::Relaxed),
            recv_events: self.recv_events.load(Ordering::Relaxed),
            send_events: self.send_events.load(Ordering::Relaxed),
            bytes_received: self.bytes_received.load(Ordering::Relaxed),
            bytes_sent: self.bytes_sent.load(Ordering::Relaxed),
            commands: self.commands.load(Ordering::Relaxed),
            closes: self.closes.load(Ordering::Relaxed),
            active_connections: self.active_connections.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of worker stats.
#[derive(Debug, Clone, Default)]
pub struct WorkerStatsSnapshot {
    pub polls: u64,
    pub wakeups: u64,
    pub recv_events: u64,
    pub send_events: u64,
    pub bytes_received: u64,
    pub bytes_sent: u64,
    pub commands: u64,
    pub closes: u64,
    pub active_connections: u64,
}

impl WorkerStatsSnapshot {
    /// Difference against an earlier snapshot. Gauge-like fields keep their
    /// current value.
    pub fn delta(&self, prev: &Self) -> Self {
        WorkerStatsSnapshot {
            polls: self.polls.saturating_sub(prev.polls),
            wakeups: self.wakeups.saturating_sub(prev.wakeups),
            recv_events: self.recv_events.saturating_sub(prev.recv_events),
            send_events: self.send_events.saturating_sub(prev.send_events),
            bytes_received: self.bytes_received.saturating_sub(prev.bytes_received),
            bytes_sent: self.bytes_sent.saturating_sub(prev.bytes_sent),
            commands: self.commands.saturating_sub(prev.commands),
            closes: self.closes.saturating_sub(prev.closes),
            active_connections: self.active_connections,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_worker_stats_delta() {
        let stats = WorkerStats::new();
        stats.inc_poll();
        stats.inc_open();
        stats.add_commands(5);
        let first = stats.snapshot();

        stats.inc_poll();
        stats.add_commands(3);
        let second = stats.snapshot();

        let delta = second.delta(&first);
        assert_eq!(delta.polls, 1);
        assert_eq!(delta.commands, 3);
        assert_eq!(delta.active_connections, 1);
    }

    #[test]
    fn test_open_close_balance() {
        let stats = WorkerStats::new();
        stats.inc_open();
        stats.inc_open();
        stats.inc_close();
        assert_eq!(stats.snapshot().active_connections, 1);
        assert_eq!(stats.snapshot().closes, 1);
    }
}
