//! Accept loop.
//!
//! A single thread owns the listening socket. Accepted sockets get
//! TCP_NODELAY and keep-alive, then go to the least-loaded worker (ties to
//! the lower worker id) over its channel, followed by a waker nudge. When
//! the connection limit is reached, new sockets are closed immediately.

use crossbeam_channel::Sender;
use mio::net::{TcpListener, TcpStream};
use mio::{Events, Interest, Poll, Token, Waker};
use std::io;
use std::os::unix::io::{AsRawFd, BorrowedFd};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::metrics::CONNECTIONS_REJECTED;

/// Maximum sockets accepted per readiness notification.
pub const ACCEPT_BATCH: usize = 128;

const LISTENER_TOKEN: Token = Token(0);
const ACCEPT_POLL_TIMEOUT: Duration = Duration::from_millis(100);

/// The acceptor's handle to one worker.
pub struct WorkerLink {
    pub tx: Sender<TcpStream>,
    pub waker: Arc<Waker>,
    /// Connections currently assigned to this worker (the acceptor bumps
    /// it on handoff; the worker decrements on close).
    pub load: Arc<AtomicUsize>,
}

/// Run the accept loop until `running` clears. A fatal listener error also
/// clears `running` so the rest of the server shuts down.
pub fn run_acceptor(
    mut listener: TcpListener,
    links: Vec<WorkerLink>,
    running: Arc<AtomicBool>,
    max_connections: usize,
) {
    let mut poll = match Poll::new() {
        Ok(poll) => poll,
        Err(e) => {
            tracing::error!(error = %e, "acceptor poll setup failed");
            running.store(false, Ordering::Release);
            return;
        }
    };
    if let Err(e) = poll
        .registry()
        .register(&mut listener, LISTENER_TOKEN, Interest::READABLE)
    {
        tracing::error!(error = %e, "acceptor listener registration failed");
        running.store(false, Ordering::Release);
        return;
    }

    let mut events = Events::with_capacity(16);
    // Set when a batch hit its cap with sockets still pending: readiness is
    // edge-style, so the leftover must be picked up without a new event.
    let mut backlog_pending = false;

    while running.load(Ordering::Acquire) {
        match poll.poll(&mut events, Some(ACCEPT_POLL_TIMEOUT)) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!(error = %e, "acceptor poll failed");
                running.store(false, Ordering::Release);
                return;
            }
        }

        let mut ready = backlog_pending;
        for event in events.iter() {
            if event.token() == LISTENER_TOKEN {
                ready = true;
            }
        }
        if ready {
            backlog_pending = !accept_batch(&listener, &links, max_connections);
        }
    }

    tracing::debug!("acceptor stopped");
}

/// Accept up to [`ACCEPT_BATCH`] sockets. Returns true when the pending
/// queue was fully drained.
fn accept_batch(listener: &TcpListener, links: &[WorkerLink], max_connections: usize) -> bool {
    for _ in 0..ACCEPT_BATCH {
        match listener.accept() {
            Ok((stream, peer)) => {
                let active: usize = links.iter().map(|l| l.load.load(Ordering::Relaxed)).sum();
                if active >= max_connections {
                    CONNECTIONS_REJECTED.increment();
                    tracing::debug!(%peer, "connection limit reached, closing");
                    drop(stream);
                    continue;
                }

                configure_socket(&stream);
                dispatch(stream, links);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => return true,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::warn!(error = %e, "accept failed");
                return true;
            }
        }
    }
    false
}

/// Hand a socket to the least-loaded worker.
fn dispatch(stream: TcpStream, links: &[WorkerLink]) {
    let mut best = 0usize;
    let mut best_load = usize::MAX;
    for (i, link) in links.iter().enumerate() {
        let load = link.load.load(Ordering::Relaxed);
        if load < best_load {
            best = i;
            best_load = load;
        }
    }

    let link = &links[best];
    link.load.fetch_add(1, Ordering::Relaxed);
    match link.tx.send(stream) {
        Ok(()) => {
            let _ = link.waker.wake();
        }
        Err(_) => {
            // Worker gone (shutdown race); the socket just closes.
            link.load.fetch_sub(1, Ordering::Relaxed);
        }
    }
}

fn configure_socket(stream: &TcpStream) {
    let _ = stream.set_nodelay(true);

    let fd = stream.as_raw_fd();
    // The fd stays owned by `stream`; SockRef only borrows it.
    let borrowed = unsafe { BorrowedFd::borrow_raw(fd) };
    let sock = socket2::SockRef::from(&borrowed);
    let keepalive = socket2::TcpKeepalive::new()
        .with_time(Duration::from_secs(60))
        .with_interval(Duration::from_secs(10));
    let _ = sock.set_tcp_keepalive(&keepalive);
}

#[cfg(test)]
mod tests {
    use super::*;
    use io_reactor::Poller;

    #[test]
    fn test_dispatch_picks_least_loaded_with_lowest_id_ties() {
        // Three links with loads 2, 1, 1 -> worker 1 wins the tie with 2.
        let pollers: Vec<Poller> = (0..3).map(|_| Poller::new(64).unwrap()).collect();
        let mut links = Vec::new();
        let mut rxs = Vec::new();
        for (i, poller) in pollers.iter().enumerate() {
            let (tx, rx) = crossbeam_channel::unbounded();
            rxs.push(rx);
            links.push(WorkerLink {
                tx,
                waker: poller.waker(),
                load: Arc::new(AtomicUsize::new(if i == 0 { 2 } else { 1 })),
            });
        }

        let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = std::net::TcpStream::connect(addr).unwrap();
        let (accepted, _) = listener.accept().unwrap();
        accepted.set_nonblocking(true).unwrap();

        dispatch(TcpStream::from_std(accepted), &links);

        assert_eq!(links[1].load.load(Ordering::Relaxed), 2);
        assert!(rxs[1].try_recv().is_ok());
        assert!(rxs[0].try_recv().is_err());
        assert!(rxs[2].try_recv().is_err());
        drop(client);
    }
}
