//! Worker thread: owns a poller and a disjoint set of connections.
//!
//! Events are drained after every wait; commands parsed from a connection
//! are executed synchronously, in arrival order, before the next event is
//! looked at. Reads and writes loop until `WouldBlock` (edge-triggered
//! semantics).

use crossbeam_channel::Receiver;
use io_reactor::{ConnId, Event, Poller};
use mio::net::TcpStream;
use protocol_resp::{reply, ParseError};
use std::io;
use std::os::unix::io::AsRawFd;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use crate::context::{ContextPool, PooledContext};
use crate::execute::{execute, ExecEnv};
use crate::metrics::{
    WorkerStats, CONNECTIONS_ACCEPTED, CONNECTIONS_ACTIVE, PROTOCOL_ERRORS,
};

/// Upper bound on one poller wait.
const POLL_TIMEOUT: Duration = Duration::from_millis(100);

pub struct WorkerContext {
    pub id: usize,
    pub poller: Poller,
    pub accept_rx: Receiver<TcpStream>,
    pub running: Arc<AtomicBool>,
    pub env: Arc<ExecEnv>,
    pub contexts: Arc<ContextPool>,
    pub load: Arc<AtomicUsize>,
    pub stats: Arc<Vec<WorkerStats>>,
    pub initial_buffer_size: usize,
    pub max_buffer_size: usize,
}

pub fn run_worker(ctx: WorkerContext) {
    let WorkerContext {
        id,
        mut poller,
        accept_rx,
        running,
        env,
        contexts,
        load,
        stats,
        initial_buffer_size,
        max_buffer_size,
    } = ctx;
    let stats = &stats[id];

    let mut connections: Vec<Option<PooledContext>> = Vec::with_capacity(1024);
    let mut recv_buf = vec![0u8; initial_buffer_size.clamp(4096, 64 * 1024)];
    // Connections whose last read hit the per-round cap: readiness is
    // edge-style, so their residual socket data gets no new event.
    let mut follow_ups: Vec<ConnId> = Vec::new();

    while running.load(Ordering::Acquire) {
        let timeout = if follow_ups.is_empty() {
            POLL_TIMEOUT
        } else {
            Duration::ZERO
        };
        match poller.poll(Some(timeout)) {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::error!(worker = id, error = %e, "poll failed");
                break;
            }
        }
        stats.inc_poll();

        for conn_id in std::mem::take(&mut follow_ups) {
            if handle_readable(
                &mut poller,
                &mut connections,
                conn_id,
                &mut recv_buf,
                &env,
                &load,
                stats,
                max_buffer_size,
            ) {
                follow_ups.push(conn_id);
            }
        }

        for event in poller.drain_events() {
            match event {
                Event::Woken => {
                    stats.inc_wakeup();
                    drain_accept_queue(
                        &mut poller,
                        &mut connections,
                        &accept_rx,
                        &contexts,
                        &env,
                        &load,
                        stats,
                    );
                }
                Event::Readable(conn_id) => {
                    if handle_readable(
                        &mut poller,
                        &mut connections,
                        conn_id,
                        &mut recv_buf,
                        &env,
                        &load,
                        stats,
                        max_buffer_size,
                    ) {
                        follow_ups.push(conn_id);
                    }
                }
                Event::Writable(conn_id) => {
                    if handle_writable(
                        &mut poller,
                        &mut connections,
                        conn_id,
                        &mut recv_buf,
                        &env,
                        &load,
                        stats,
                        max_buffer_size,
                    ) {
                        follow_ups.push(conn_id);
                    }
                }
                Event::Closed(conn_id) | Event::Error(conn_id) => {
                    close_connection(&mut poller, &mut connections, conn_id, &env, &load, stats);
                }
            }
        }
    }

    // Shutdown: drop every connection this worker owns.
    for id in poller.connection_ids() {
        close_connection(&mut poller, &mut connections, id, &env, &load, stats);
    }
    tracing::debug!(worker = id, "worker stopped");
}

/// Register connections queued by the acceptor.
fn drain_accept_queue(
    poller: &mut Poller,
    connections: &mut Vec<Option<PooledContext>>,
    accept_rx: &Receiver<TcpStream>,
    contexts: &Arc<ContextPool>,
    env: &Arc<ExecEnv>,
    load: &Arc<AtomicUsize>,
    stats: &WorkerStats,
) {
    while let Ok(stream) = accept_rx.try_recv() {
        let fd = stream.as_raw_fd();
        match poller.register(stream) {
            Ok(id) => {
                let idx = id.as_usize();
                if idx >= connections.len() {
                    connections.resize_with(idx + 1, || None);
                }
                connections[idx] = Some(contexts.acquire(fd));

                CONNECTIONS_ACCEPTED.increment();
                CONNECTIONS_ACTIVE.increment();
                env.shared.total_connections.fetch_add(1, Ordering::Relaxed);
                env.shared
                    .current_connections
                    .fetch_add(1, Ordering::Relaxed);
                stats.inc_open();
            }
            Err(e) => {
                // The acceptor counted this connection toward our load.
                load.fetch_sub(1, Ordering::Relaxed);
                tracing::warn!(error = %e, "failed to register connection");
            }
        }
    }
}

/// Drain the socket, feed the parser, execute completed commands and queue
/// replies.
///
/// Returns true when the per-round read cap was hit with socket data likely
/// remaining; the caller re-invokes on its next pass.
#[allow(clippy::too_many_arguments)]
fn handle_readable(
    poller: &mut Poller,
    connections: &mut [Option<PooledContext>],
    id: ConnId,
    recv_buf: &mut [u8],
    env: &Arc<ExecEnv>,
    load: &Arc<AtomicUsize>,
    stats: &WorkerStats,
    max_buffer_size: usize,
) -> bool {
    if connections
        .get(id.as_usize())
        .and_then(Option::as_ref)
        .is_none()
    {
        return false;
    }
    stats.inc_recv();

    let mut round = 0usize;
    let mut close = false;
    let mut capped = false;
    let mut paused = false;

    loop {
        let conn = match connections.get_mut(id.as_usize()).and_then(Option::as_mut) {
            Some(conn) => conn,
            None => return false,
        };

        // Backpressure: leave bytes in the kernel buffer until replies
        // drain; the writable path resumes reading.
        if !conn.should_read() {
            paused = true;
            break;
        }

        match poller.recv(id, recv_buf) {
            Ok(0) => {
                // Peer closed; drop silently.
                close = true;
                break;
            }
            Ok(n) => {
                stats.add_bytes_received(n as u64);
                conn.touch();

                match conn.feed(&recv_buf[..n]) {
                    Ok(commands) => {
                        if !commands.is_empty() {
                            stats.add_commands(commands.len() as u64);
                            let mut write = conn.write();
                            for command in &commands {
                                execute(command, env, write.buf_mut());
                            }
                        }
                    }
                    Err(ParseError::BufferOverflow) => {
                        PROTOCOL_ERRORS.increment();
                        reply::error(
                            conn.write().buf_mut(),
                            "ERR Protocol error: request exceeds buffer limit",
                        );
                        let _ = flush_writes(poller, connections, id, stats);
                        close = true;
                        break;
                    }
                    Err(e) => {
                        PROTOCOL_ERRORS.increment();
                        reply::error(conn.write().buf_mut(), &format!("ERR Protocol error: {}", e));
                    }
                }

                round += n;
                if round >= max_buffer_size {
                    capped = true;
                    break;
                }
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!(error = %e, "recv failed, dropping connection");
                close = true;
                break;
            }
        }
    }

    if !close && !flush_writes(poller, connections, id, stats) {
        close = true;
    }
    if close {
        close_connection(poller, connections, id, env, load, stats);
        return false;
    }
    if capped {
        return true;
    }
    // If reading paused on backpressure but the flush just drained the
    // queue, the residual socket data needs a follow-up (no new event will
    // announce it).
    paused
        && connections
            .get(id.as_usize())
            .and_then(Option::as_ref)
            .map(|c| c.should_read())
            .unwrap_or(false)
}

/// Drain pending replies after the socket became writable again, then
/// resume reading if backpressure had paused it. Returns true when a
/// resumed read hit its round cap (caller schedules a follow-up).
#[allow(clippy::too_many_arguments)]
fn handle_writable(
    poller: &mut Poller,
    connections: &mut [Option<PooledContext>],
    id: ConnId,
    recv_buf: &mut [u8],
    env: &Arc<ExecEnv>,
    load: &Arc<AtomicUsize>,
    stats: &WorkerStats,
    max_buffer_size: usize,
) -> bool {
    stats.inc_send();
    if !flush_writes(poller, connections, id, stats) {
        close_connection(poller, connections, id, env, load, stats);
        return false;
    }

    // Edge-triggered reads: data that arrived while reading was paused
    // produces no new readable event, so pick it up here.
    let resume = connections
        .get(id.as_usize())
        .and_then(Option::as_ref)
        .map(|c| c.should_read())
        .unwrap_or(false);
    if resume {
        return handle_readable(
            poller,
            connections,
            id,
            recv_buf,
            env,
            load,
            stats,
            max_buffer_size,
        );
    }
    false
}

/// Send as much pending reply data as the socket accepts. Returns false on
/// a fatal write error.
fn flush_writes(
    poller: &mut Poller,
    connections: &mut [Option<PooledContext>],
    id: ConnId,
    stats: &WorkerStats,
) -> bool {
    let conn = match connections.get(id.as_usize()).and_then(Option::as_ref) {
        Some(conn) => conn,
        None => return true,
    };

    let mut write = conn.write();
    while write.has_pending() {
        match poller.send(id, write.pending()) {
            Ok(0) => return false,
            Ok(n) => {
                write.advance(n);
                stats.add_bytes_sent(n as u64);
            }
            Err(e) if e.kind() == io::ErrorKind::WouldBlock => break,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => {
                tracing::debug!(error = %e, "send failed, dropping connection");
                return false;
            }
        }
    }
    true
}

/// Drop a connection: deregister, release its context to the pool, adjust
/// counters. Idempotent for already-dropped ids.
fn close_connection(
    poller: &mut Poller,
    connections: &mut [Option<PooledContext>],
    id: ConnId,
    env: &Arc<ExecEnv>,
    load: &Arc<AtomicUsize>,
    stats: &WorkerStats,
) {
    let Some(slot) = connections.get_mut(id.as_usize()) else {
        return;
    };
    if slot.take().is_none() {
        return;
    }
    let _ = poller.close(id);

    CONNECTIONS_ACTIVE.decrement();
    env.shared
        .current_connections
        .fetch_sub(1, Ordering::Relaxed);
    load.fetch_sub(1, Ordering::Relaxed);
    stats.inc_close();
}
