//! Readiness-based I/O for worker threads.
//!
//! Each worker owns a private [`Poller`] (epoll on Linux, kqueue elsewhere,
//! via mio) and a disjoint set of connections. The poller reports edge-style
//! readiness events; reads and writes are non-blocking and never park the
//! worker. The crate also provides the size-classed [`BufferPool`] shared by
//! all connection contexts.

pub mod buffer_pool;
pub mod listener;
pub mod poller;
pub mod types;

pub use buffer_pool::BufferPool;
pub use listener::bind_listener;
pub use poller::Poller;
pub use types::{ConnId, Event};
