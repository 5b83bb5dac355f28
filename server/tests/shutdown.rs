//! Graceful shutdown and restart tests.

use server::{Config, Server};
use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

fn get_available_port() -> u16 {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap().port()
}

fn test_config(port: u16) -> Config {
    let mut config = Config::default();
    config.server.host = "127.0.0.1".to_string();
    config.server.port = port;
    config.thread_pool.read_threads = 1;
    config.store.shard_count = 4;
    config.store.bucket_per_shard = 2;
    config.store.cache_size = 100;
    config.store.adaptive_cache_sizing = false;
    config.adaptive_cache.min_capacity = 10;
    config
}

fn start_server(config: Config) -> (Arc<Server>, thread::JoinHandle<()>) {
    let server = Arc::new(Server::new(config).unwrap());
    let runner = server.clone();
    let handle = thread::spawn(move || {
        let _ = runner.run();
    });
    (server, handle)
}

fn wait_for_server(addr: SocketAddr, timeout: Duration) -> bool {
    let start = Instant::now();
    while start.elapsed() < timeout {
        if TcpStream::connect_timeout(&addr, Duration::from_millis(50)).is_ok() {
            return true;
        }
        thread::sleep(Duration::from_millis(20));
    }
    false
}

fn set_and_check(stream: &mut TcpStream, key: &str, value: &str) -> bool {
    let cmd = format!(
        "*3\r\n$3\r\nSET\r\n${}\r\n{}\r\n${}\r\n{}\r\n",
        key.len(),
        key,
        value.len(),
        value
    );
    if stream.write_all(cmd.as_bytes()).is_err() {
        return false;
    }
    let mut reply = [0u8; 16];
    stream
        .set_read_timeout(Some(Duration::from_secs(1)))
        .unwrap();
    match stream.read(&mut reply) {
        Ok(n) if n > 0 => reply[..n].starts_with(b"+OK"),
        _ => false,
    }
}

#[test]
fn test_server_stops_within_timeout() {
    let port = get_available_port();
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let (server, handle) = start_server(test_config(port));

    assert!(wait_for_server(addr, Duration::from_secs(5)));
    let mut conn = TcpStream::connect(addr).unwrap();
    assert!(set_and_check(&mut conn, "k", "v"), "SET should work before shutdown");
    drop(conn);

    server.stop();

    let start = Instant::now();
    while !handle.is_finished() && start.elapsed() < Duration::from_secs(5) {
        thread::sleep(Duration::from_millis(50));
    }
    assert!(handle.is_finished(), "server did not stop in time");
    let _ = handle.join();
}

#[test]
fn test_stop_before_connections() {
    let port = get_available_port();
    let (server, handle) = start_server(test_config(port));
    // Stop immediately; run() must still return promptly.
    server.stop();
    let start = Instant::now();
    while !handle.is_finished() && start.elapsed() < Duration::from_secs(5) {
        thread::sleep(Duration::from_millis(50));
    }
    assert!(handle.is_finished());
    let _ = handle.join();
}

#[test]
fn test_listener_closed_after_stop() {
    let port = get_available_port();
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let (server, handle) = start_server(test_config(port));
    assert!(wait_for_server(addr, Duration::from_secs(5)));

    server.stop();
    let _ = handle.join();

    // New connections must fail once the listener is gone.
    let refused = TcpStream::connect_timeout(&addr, Duration::from_millis(200)).is_err();
    assert!(refused, "listener still accepting after stop");
}

#[test]
fn test_persistence_survives_restart() {
    let dir = tempfile::tempdir().unwrap();

    let port = get_available_port();
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    let mut config = test_config(port);
    config.store.persist_path = dir.path().to_string_lossy().into_owned();

    {
        let (server, handle) = start_server(config.clone());
        assert!(wait_for_server(addr, Duration::from_secs(5)));
        let mut conn = TcpStream::connect(addr).unwrap();
        assert!(set_and_check(&mut conn, "durable", "value"));
        drop(conn);
        server.stop();
        let _ = handle.join();
    }

    // Restart on a fresh port with the same data directory.
    let port = get_available_port();
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    config.server.port = port;

    let (server, handle) = start_server(config);
    assert!(wait_for_server(addr, Duration::from_secs(5)));
    let mut conn = TcpStream::connect(addr).unwrap();
    conn.write_all(b"*2\r\n$3\r\nGET\r\n$7\r\ndurable\r\n").unwrap();
    let mut reply = [0u8; 64];
    conn.set_read_timeout(Some(Duration::from_secs(1))).unwrap();
    let n = conn.read(&mut reply).unwrap();
    assert_eq!(&reply[..n], b"$5\r\nvalue\r\n");

    drop(conn);
    server.stop();
    let _ = handle.join();
}
