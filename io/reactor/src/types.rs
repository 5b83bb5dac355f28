//! Poller event types.

/// Identifier for a connection within one worker's poller.
///
/// Slab indices are reused after a connection closes, so a `ConnId` is only
/// meaningful between the registration and close of a single connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ConnId(usize);

impl ConnId {
    #[inline]
    pub fn new(index: usize) -> Self {
        ConnId(index)
    }

    #[inline]
    pub fn as_usize(&self) -> usize {
        self.0
    }
}

/// A readiness event drained from the poller after a wait.
#[derive(Debug)]
pub enum Event {
    /// The connection has bytes to read (drain until `WouldBlock`).
    Readable(ConnId),
    /// The socket accepts writes again.
    Writable(ConnId),
    /// The peer closed its end.
    Closed(ConnId),
    /// The socket is in an error state.
    Error(ConnId),
    /// Another thread rang the poller's waker.
    Woken,
}
