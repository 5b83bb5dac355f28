//! Per-worker readiness poller.
//!
//! Wraps a mio `Poll` with a slab of connections and a waker so the
//! acceptor thread can nudge a worker when it queues a new connection.
//! Registration uses edge-triggered semantics: after a `Readable` event the
//! owner must `recv` until `WouldBlock`, and after `Writable` it must `send`
//! until the buffer drains or `WouldBlock`.

use mio::net::TcpStream;
use mio::{Events, Interest, Poll, Token, Waker};
use slab::Slab;
use std::io::{self, Read, Write};
use std::os::unix::io::{AsRawFd, RawFd};
use std::sync::Arc;
use std::time::Duration;

use crate::types::{ConnId, Event};

/// Token reserved for the cross-thread waker; connection tokens are slab
/// indices and stay far below this.
const WAKER_TOKEN: Token = Token(1 << 30);

struct Connection {
    stream: TcpStream,
    readable: bool,
    writable: bool,
}

/// A readiness poller owned by exactly one worker thread.
pub struct Poller {
    poll: Poll,
    events: Events,
    connections: Slab<Connection>,
    pending: Vec<Event>,
    waker: Arc<Waker>,
}

impl Poller {
    /// Create a poller with room for `max_events` events per wait.
    pub fn new(max_events: usize) -> io::Result<Self> {
        let poll = Poll::new()?;
        let waker = Arc::new(Waker::new(poll.registry(), WAKER_TOKEN)?);
        Ok(Poller {
            poll,
            events: Events::with_capacity(max_events.max(64)),
            connections: Slab::with_capacity(1024),
            pending: Vec::with_capacity(256),
            waker,
        })
    }

    /// Handle for waking this poller from another thread.
    pub fn waker(&self) -> Arc<Waker> {
        self.waker.clone()
    }

    /// Register a connection and return its id.
    ///
    /// The stream must already be non-blocking (mio streams always are).
    pub fn register(&mut self, mut stream: TcpStream) -> io::Result<ConnId> {
        let entry = self.connections.vacant_entry();
        let id = entry.key();

        self.poll.registry().register(
            &mut stream,
            Token(id),
            Interest::READABLE | Interest::WRITABLE,
        )?;

        entry.insert(Connection {
            stream,
            readable: false,
            writable: true,
        });

        Ok(ConnId::new(id))
    }

    /// Deregister and drop a connection. Closing the underlying socket
    /// happens on drop. Unknown ids are a no-op.
    pub fn close(&mut self, id: ConnId) -> io::Result<()> {
        if let Some(mut conn) = self.connections.try_remove(id.as_usize()) {
            self.poll.registry().deregister(&mut conn.stream)?;
        }
        Ok(())
    }

    /// Non-blocking write. `WouldBlock` clears the cached writable flag so
    /// callers stop retrying until the next `Writable` event.
    pub fn send(&mut self, id: ConnId, data: &[u8]) -> io::Result<usize> {
        let conn = self
            .connections
            .get_mut(id.as_usize())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

        if !conn.writable {
            return Err(io::Error::from(io::ErrorKind::WouldBlock));
        }

        match conn.stream.write(data) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                conn.writable = false;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Non-blocking read. Returns `Ok(0)` on orderly peer close.
    pub fn recv(&mut self, id: ConnId, buf: &mut [u8]) -> io::Result<usize> {
        let conn = self
            .connections
            .get_mut(id.as_usize())
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "connection not found"))?;

        match conn.stream.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => {
                conn.readable = false;
                Err(e)
            }
            Err(e) => Err(e),
        }
    }

    /// Wait for readiness, translating mio events into [`Event`]s. Returns
    /// the number of events collected; fetch them with [`drain_events`].
    ///
    /// [`drain_events`]: Poller::drain_events
    pub fn poll(&mut self, timeout: Option<Duration>) -> io::Result<usize> {
        self.pending.clear();
        self.poll.poll(&mut self.events, timeout)?;

        for event in self.events.iter() {
            let token = event.token();
            if token == WAKER_TOKEN {
                self.pending.push(Event::Woken);
                continue;
            }

            let index = token.0;
            let Some(conn) = self.connections.get_mut(index) else {
                continue;
            };
            let id = ConnId::new(index);

            if event.is_readable() {
                conn.readable = true;
                self.pending.push(Event::Readable(id));
            }
            if event.is_writable() {
                conn.writable = true;
                self.pending.push(Event::Writable(id));
            }
            if event.is_read_closed() || event.is_write_closed() {
                self.pending.push(Event::Closed(id));
            }
            if event.is_error() {
                self.pending.push(Event::Error(id));
            }
        }

        Ok(self.pending.len())
    }

    /// Take the events collected by the last [`poll`](Poller::poll).
    pub fn drain_events(&mut self) -> Vec<Event> {
        std::mem::take(&mut self.pending)
    }

    /// Number of registered connections.
    pub fn connection_count(&self) -> usize {
        self.connections.len()
    }

    /// Ids of every registered connection, for shutdown drains.
    pub fn connection_ids(&self) -> Vec<ConnId> {
        self.connections.iter().map(|(i, _)| ConnId::new(i)).collect()
    }

    /// OS handle of a connection, if registered.
    pub fn raw_fd(&self, id: ConnId) -> Option<RawFd> {
        self.connections
            .get(id.as_usize())
            .map(|c| c.stream.as_raw_fd())
    }
}
