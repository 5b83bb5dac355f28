//! Per-connection state.
//!
//! A connection owns its incremental parser (which holds the read
//! accumulation buffer) and a write buffer behind a dedicated lock. The
//! worker that owns the connection is the only reader of the write buffer,
//! but handlers append replies under the same lock while a drain is in
//! progress.

use bytes::BytesMut;
use io_reactor::BufferPool;
use parking_lot::{Mutex, MutexGuard};
use protocol_resp::{Command, ParseError, Parser};
use std::time::Instant;

/// Reply bytes awaiting transmission: a buffer plus a drain position.
pub struct WriteBuf {
    buf: BytesMut,
    pos: usize,
}

impl WriteBuf {
    fn new(initial_capacity: usize) -> Self {
        WriteBuf {
            buf: BytesMut::with_capacity(initial_capacity),
            pos: 0,
        }
    }

    /// Buffer to append reply frames to.
    #[inline]
    pub fn buf_mut(&mut self) -> &mut BytesMut {
        &mut self.buf
    }

    #[inline]
    pub fn has_pending(&self) -> bool {
        self.pos < self.buf.len()
    }

    #[inline]
    pub fn pending_len(&self) -> usize {
        self.buf.len() - self.pos
    }

    /// Unsent bytes.
    #[inline]
    pub fn pending(&self) -> &[u8] {
        &self.buf[self.pos..]
    }

    /// Mark `n` bytes as sent; a fully drained buffer resets to empty.
    pub fn advance(&mut self, n: usize) {
        self.pos += n;
        if self.pos >= self.buf.len() {
            self.buf.clear();
            self.pos = 0;
        }
    }

    /// Drop any pending bytes.
    pub fn reset(&mut self) {
        self.buf.clear();
        self.pos = 0;
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buf.capacity()
    }

    fn swap_buffer(&mut self, mut replacement: BytesMut) -> BytesMut {
        replacement.clear();
        self.pos = 0;
        std::mem::replace(&mut self.buf, replacement)
    }
}

/// State for one client connection.
pub struct Connection {
    parser: Parser,
    write: Mutex<WriteBuf>,
    last_active: Instant,
    initial_buffer_size: usize,
    max_buffer_size: usize,
}

impl Connection {
    pub fn new(initial_buffer_size: usize, max_buffer_size: usize) -> Self {
        Connection {
            parser: Parser::new(initial_buffer_size),
            write: Mutex::new(WriteBuf::new(initial_buffer_size)),
            last_active: Instant::now(),
            initial_buffer_size,
            max_buffer_size,
        }
    }

    /// Feed received bytes to the parser.
    ///
    /// If buffering the chunk would push the read side past the configured
    /// ceiling, both buffers are reset and `BufferOverflow` is returned; the
    /// caller replies with a protocol error and closes.
    pub fn feed(&mut self, chunk: &[u8]) -> Result<Vec<Command>, ParseError> {
        if self.parser.buffered() + chunk.len() > self.max_buffer_size {
            self.parser.reset();
            self.write.lock().reset();
            return Err(ParseError::BufferOverflow);
        }
        self.parser.parse(chunk)
    }

    /// Take the writer lock.
    #[inline]
    pub fn write(&self) -> MutexGuard<'_, WriteBuf> {
        self.write.lock()
    }

    /// Backpressure check: stop reading while too many reply bytes are
    /// queued.
    pub fn should_read(&self) -> bool {
        self.write.lock().pending_len() <= self.max_buffer_size
    }

    #[inline]
    pub fn touch(&mut self) {
        self.last_active = Instant::now();
    }

    #[inline]
    pub fn last_active(&self) -> Instant {
        self.last_active
    }

    /// Reset to initial state for pooling, returning oversize buffers to
    /// the buffer pool.
    pub(crate) fn recycle(&mut self, buffers: &BufferPool) {
        self.parser.reset();
        if self.parser.buffer_capacity() > self.initial_buffer_size * 2 {
            let replacement = buffers.acquire(self.initial_buffer_size);
            let old = self.parser.swap_buffer(replacement);
            buffers.release(old);
        }

        let mut write = self.write.lock();
        write.reset();
        if write.capacity() > self.initial_buffer_size * 2 {
            let replacement = buffers.acquire(self.initial_buffer_size);
            let old = write.swap_buffer(replacement);
            buffers.release(old);
        }
        drop(write);

        self.last_active = Instant::now();
    }
}
