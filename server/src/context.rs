//! Connection context pool.
//!
//! Contexts are expensive to build (parser, buffers), so released ones are
//! kept in fd-sharded free lists and handed back out on accept. A
//! [`PooledContext`] gives the owning worker exclusive access and returns
//! its inner connection to the pool when dropped.

use io_reactor::BufferPool;
use parking_lot::Mutex;
use std::ops::{Deref, DerefMut};
use std::os::unix::io::RawFd;
use std::sync::Arc;

use crate::connection::Connection;

/// Free-list shards; fd mod shards spreads lock contention.
pub const DEFAULT_POOL_SHARDS: usize = 32;

/// Contexts kept per shard; overflow is destroyed.
pub const DEFAULT_PER_SHARD_CAP: usize = 100;

pub struct ContextPool {
    shards: Vec<Mutex<Vec<Box<Connection>>>>,
    per_shard_cap: usize,
    buffers: Arc<BufferPool>,
    initial_buffer_size: usize,
    max_buffer_size: usize,
}

impl ContextPool {
    pub fn new(
        shard_count: usize,
        per_shard_cap: usize,
        buffers: Arc<BufferPool>,
        initial_buffer_size: usize,
        max_buffer_size: usize,
    ) -> Self {
        let shard_count = shard_count.max(1);
        ContextPool {
            shards: (0..shard_count).map(|_| Mutex::new(Vec::new())).collect(),
            per_shard_cap,
            buffers,
            initial_buffer_size,
            max_buffer_size,
        }
    }

    #[inline]
    fn shard_for(&self, fd: RawFd) -> &Mutex<Vec<Box<Connection>>> {
        &self.shards[fd.max(0) as usize % self.shards.len()]
    }

    /// Get a context for a freshly accepted fd, reusing a pooled one when
    /// available. Returned contexts are in their initial state.
    pub fn acquire(self: &Arc<Self>, fd: RawFd) -> PooledContext {
        let pooled = self.shard_for(fd).lock().pop();
        let mut ctx = match pooled {
            Some(ctx) => ctx,
            None => Box::new(Connection::new(
                self.initial_buffer_size,
                self.max_buffer_size,
            )),
        };
        ctx.touch();
        PooledContext {
            ctx: Some(ctx),
            pool: self.clone(),
            fd,
        }
    }

    /// Reset a context (oversize buffers go back to the buffer pool) and
    /// file it under the fd's shard, unless that shard is full.
    fn release(&self, mut ctx: Box<Connection>, fd: RawFd) {
        ctx.recycle(&self.buffers);
        let mut shard = self.shard_for(fd).lock();
        if shard.len() < self.per_shard_cap {
            shard.push(ctx);
        }
    }

    /// Contexts currently pooled (tests and diagnostics).
    pub fn pooled_count(&self) -> usize {
        self.shards.iter().map(|s| s.lock().len()).sum()
    }
}

/// Exclusive handle to a pooled connection context.
///
/// Dropping the handle pushes the context back into the pool shard matching
/// its fd.
pub struct PooledContext {
    ctx: Option<Box<Connection>>,
    pool: Arc<ContextPool>,
    fd: RawFd,
}

impl PooledContext {
    #[inline]
    pub fn fd(&self) -> RawFd {
        self.fd
    }
}

impl Deref for PooledContext {
    type Target = Connection;

    #[inline]
    fn deref(&self) -> &Connection {
        self.ctx.as_deref().expect("context present until drop")
    }
}

impl DerefMut for PooledContext {
    #[inline]
    fn deref_mut(&mut self) -> &mut Connection {
        self.ctx.as_deref_mut().expect("context present until drop")
    }
}

impl Drop for PooledContext {
    fn drop(&mut self) {
        if let Some(ctx) = self.ctx.take() {
            self.pool.release(ctx, self.fd);
        }
    }
}
