//! Per-command latency accounting.

use std::sync::atomic::{AtomicU64, Ordering};

/// Commands the dispatcher recognizes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CommandKind {
    Set,
    Get,
    Del,
    MSet,
    MGet,
    Info,
}

impl CommandKind {
    pub const COUNT: usize = 6;

    pub const ALL: [CommandKind; Self::COUNT] = [
        CommandKind::Set,
        CommandKind::Get,
        CommandKind::Del,
        CommandKind::MSet,
        CommandKind::MGet,
        CommandKind::Info,
    ];

    /// Match a lowercased command name.
    pub fn from_name(name: &[u8]) -> Option<CommandKind> {
        match name {
            b"set" => Some(CommandKind::Set),
            b"get" => Some(CommandKind::Get),
            b"del" => Some(CommandKind::Del),
            b"mset" => Some(CommandKind::MSet),
            b"mget" => Some(CommandKind::MGet),
            b"info" => Some(CommandKind::Info),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            CommandKind::Set => "set",
            CommandKind::Get => "get",
            CommandKind::Del => "del",
            CommandKind::MSet => "mset",
            CommandKind::MGet => "mget",
            CommandKind::Info => "info",
        }
    }

    #[inline]
    fn index(&self) -> usize {
        match self {
            CommandKind::Set => 0,
            CommandKind::Get => 1,
            CommandKind::Del => 2,
            CommandKind::MSet => 3,
            CommandKind::MGet => 4,
            CommandKind::Info => 5,
        }
    }
}

/// Latency slot for one command.
struct Slot {
    calls: AtomicU64,
    total_us: AtomicU64,
    min_us: AtomicU64,
    max_us: AtomicU64,
}

impl Slot {
    const fn new() -> Self {
        Slot {
            calls: AtomicU64::new(0),
            total_us: AtomicU64::new(0),
            min_us: AtomicU64::new(u64::MAX),
            max_us: AtomicU64::new(0),
        }
    }
}

/// Fixed table of per-command latency slots.
pub struct CommandStatsTable {
    slots: [Slot; CommandKind::COUNT],
}

/// Snapshot of one command's latency slot.
#[derive(Debug, Clone, Copy)]
pub struct CommandLatency {
    pub calls: u64,
    pub total_us: u64,
    pub min_us: u64,
    pub max_us: u64,
}

impl CommandStatsTable {
    pub const fn new() -> Self {
        CommandStatsTable {
            slots: [
                Slot::new(),
                Slot::new(),
                Slot::new(),
                Slot::new(),
                Slot::new(),
                Slot::new(),
            ],
        }
    }

    /// Record one call's latency in microseconds.
    pub fn record(&self, kind: CommandKind, micros: u64) {
        let slot = &self.slots[kind.index()];
        slot.calls.fetch_add(1, Ordering::Relaxed);
        slot.total_us.fetch_add(micros, Ordering::Relaxed);
        slot.min_us.fetch_min(micros, Ordering::Relaxed);
        slot.max_us.fetch_max(micros, Ordering::Relaxed);
    }

    /// Snapshot one command's slot; `min_us` reads 0 when never called.
    pub fn latency(&self, kind: CommandKind) -> CommandLatency {
        let slot = &self.slots[kind.index()];
        let calls = slot.calls.load(Ordering::Relaxed);
        CommandLatency {
            calls,
            total_us: slot.total_us.load(Ordering::Relaxed),
            min_us: if calls == 0 {
                0
            } else {
                slot.min_us.load(Ordering::Relaxed)
            },
            max_us: slot.max_us.load(Ordering::Relaxed),
        }
    }

    pub fn total_calls(&self) -> u64 {
        self.slots
            .iter()
            .map(|s| s.calls.load(Ordering::Relaxed))
            .sum()
    }
}

impl Default for CommandStatsTable {
    fn default() -> Self {
        Self::new()
    }
}
