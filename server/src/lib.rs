//! RESP-compatible key/value server.
//!
//! One acceptor thread feeds a pool of worker threads; each worker owns a
//! private readiness poller and a disjoint set of connections. Commands are
//! parsed incrementally, executed synchronously inside the owning worker
//! against the sharded store, and replies are queued on the connection's
//! write buffer.

pub mod acceptor;
pub mod affinity;
pub mod banner;
pub mod command_stats;
pub mod config;
pub mod connection;
pub mod context;
pub mod execute;
pub mod logging;
pub mod metrics;
pub mod server;
pub mod signal;
pub mod worker;

pub use config::Config;
pub use server::{Server, ServerStats};
