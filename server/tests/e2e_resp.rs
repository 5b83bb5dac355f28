//! End-to-end RESP tests.
//!
//! Each test starts a real server on an ephemeral port and speaks raw RESP
//! bytes over a TcpStream.

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
    config.server.initial_buffer_size = 4096;
    config.server.max_buffer_size = 64 * 1024;
    config.thread_pool.read_threads = 2;
    config.store.shard_count = 8;
    config.store.bucket_per_shard = 4;
    config.store.cache_size = 1000;
    config.store.adaptive_cache_sizing = false;
    config.adaptive_cache.min_capacity = 10;
    config
}

fn start_test_server(config: Config) -> (Arc<Server>, thread::JoinHandle<()>) {
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

fn connect(port: u16) -> TcpStream {
    let addr: SocketAddr = format!("127.0.0.1:{}", port).parse().unwrap();
    assert!(
        wait_for_server(addr, Duration::from_secs(5)),
        "server failed to start"
    );
    let stream = TcpStream::connect(addr).expect("failed to connect");
    stream.set_nodelay(true).unwrap();
    stream
        .set_read_timeout(Some(Duration::from_secs(2)))
        .unwrap();
    stream
}

/// Read until `expected` bytes arrived (replies may come in pieces).
fn read_exactly(stream: &mut TcpStream, expected: usize) -> Vec<u8> {
    let mut out = Vec::with_capacity(expected);
    let mut buf = [0u8; 4096];
    while out.len() < expected {
        match stream.read(&mut buf) {
            Ok(0) => break,
            Ok(n) => out.extend_from_slice(&buf[..n]),
            Err(_) => break,
        }
    }
    out
}

fn send_command(stream: &mut TcpStream, cmd: &[u8], expected_reply_len: usize) -> Vec<u8> {
    stream.write_all(cmd).unwrap();
    stream.flush().unwrap();
    read_exactly(stream, expected_reply_len)
}

fn set_cmd(key: &str, value: &str) -> Vec<u8> {
    format!(
        "*3\r\n$3\r\nSET\r\n${}\r\n{}\r\n${}\r\n{}\r\n",
        key.len(),
        key,
        value.len(),
        value
    )
    .into_bytes()
}

fn get_cmd(key: &str) -> Vec<u8> {
    format!("*2\r\n$3\r\nGET\r\n${}\r\n{}\r\n", key.len(), key).into_bytes()
}

#[test]
fn test_set_get_round_trip() {
    let port = get_available_port();
    let (server, handle) = start_test_server(test_config(port));
    let mut conn = connect(port);

    let reply = send_command(&mut conn, &set_cmd("foo", "bar"), 5);
    assert_eq!(&reply, b"+OK\r\n");

    let reply = send_command(&mut conn, &get_cmd("foo"), 9);
    assert_eq!(&reply, b"$3\r\nbar\r\n");

    drop(conn);
    server.stop();
    let _ = handle.join();
}

#[test]
fn test_get_missing_returns_null() {
    let port = get_available_port();
    let (server, handle) = start_test_server(test_config(port));
    let mut conn = connect(port);

    let reply = send_command(&mut conn, b"*2\r\n$3\r\nGET\r\n$6\r\nabsent\r\n", 5);
    assert_eq!(&reply, b"$-1\r\n");

    drop(conn);
    server.stop();
    let _ = handle.join();
}

#[test]
fn test_pipelined_mset_mget_single_chunk() {
    let port = get_available_port();
    let (server, handle) = start_test_server(test_config(port));
    let mut conn = connect(port);

    let pipelined =
        b"*5\r\n$4\r\nMSET\r\n$1\r\na\r\n$1\r\n1\r\n$1\r\nb\r\n$1\r\n2\r\n*3\r\n$4\r\nMGET\r\n$1\r\na\r\n$1\r\nb\r\n";
    let expected = b"+OK\r\n*2\r\n$1\r\n1\r\n$1\r\n2\r\n";
    let reply = send_command(&mut conn, pipelined, expected.len());
    assert_eq!(&reply, expected);

    drop(conn);
    server.stop();
    let _ = handle.join();
}

#[test]
fn test_fragmented_input() {
    let port = get_available_port();
    let (server, handle) = start_test_server(test_config(port));
    let mut conn = connect(port);

    // Preload foo=bar.
    let reply = send_command(&mut conn, &set_cmd("foo", "bar"), 5);
    assert_eq!(&reply, b"+OK\r\n");

    // GET split across three writes mid-token.
    conn.write_all(b"*2\r\n$3\r\nGE").unwrap();
    conn.flush().unwrap();
    thread::sleep(Duration::from_millis(30));
    conn.write_all(b"T\r\n$3\r\nfoo").unwrap();
    conn.flush().unwrap();
    thread::sleep(Duration::from_millis(30));
    conn.write_all(b"\r\n").unwrap();
    conn.flush().unwrap();

    let reply = read_exactly(&mut conn, 9);
    assert_eq!(&reply, b"$3\r\nbar\r\n");

    drop(conn);
    server.stop();
    let _ = handle.join();
}

#[test]
fn test_wrong_arity_error() {
    let port = get_available_port();
    let (server, handle) = start_test_server(test_config(port));
    let mut conn = connect(port);

    let expected = b"-ERR wrong number of arguments for 'set' command\r\n";
    let reply = send_command(&mut conn, b"*2\r\n$3\r\nSET\r\n$1\r\nx\r\n", expected.len());
    assert_eq!(&reply[..], &expected[..]);

    drop(conn);
    server.stop();
    let _ = handle.join();
}

#[test]
fn test_unknown_command_error() {
    let port = get_available_port();
    let (server, handle) = start_test_server(test_config(port));
    let mut conn = connect(port);

    let expected = b"-ERR unknown command 'PING'\r\n";
    let reply = send_command(&mut conn, b"*1\r\n$4\r\nPING\r\n", expected.len());
    assert_eq!(&reply[..], &expected[..]);

    drop(conn);
    server.stop();
    let _ = handle.join();
}

#[test]
fn test_del() {
    let port = get_available_port();
    let (server, handle) = start_test_server(test_config(port));
    let mut conn = connect(port);

    send_command(&mut conn, &set_cmd("k", "v"), 5);
    let reply = send_command(&mut conn, b"*2\r\n$3\r\nDEL\r\n$1\r\nk\r\n", 4);
    assert_eq!(&reply, b":1\r\n");
    let reply = send_command(&mut conn, b"*2\r\n$3\r\nDEL\r\n$1\r\nk\r\n", 4);
    assert_eq!(&reply, b":0\r\n");
    let reply = send_command(&mut conn, &get_cmd("k"), 5);
    assert_eq!(&reply, b"$-1\r\n");

    drop(conn);
    server.stop();
    let _ = handle.join();
}

#[test]
fn test_info_bulk_length_is_exact() {
    let port = get_available_port();
    let (server, handle) = start_test_server(test_config(port));
    let mut conn = connect(port);

    send_command(&mut conn, &set_cmd("k", "v"), 5);

    conn.write_all(b"*1\r\n$4\r\nINFO\r\n").unwrap();
    conn.flush().unwrap();

    // Read the header line first.
    let mut header = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        conn.read_exact(&mut byte).unwrap();
        header.push(byte[0]);
        if header.ends_with(b"\r\n") {
            break;
        }
    }
    assert_eq!(header[0], b'$');
    let declared: usize = std::str::from_utf8(&header[1..header.len() - 2])
        .unwrap()
        .parse()
        .unwrap();

    let mut body = vec![0u8; declared + 2];
    conn.read_exact(&mut body).unwrap();
    assert_eq!(&body[declared..], b"\r\n");

    let text = std::str::from_utf8(&body[..declared]).unwrap();
    assert!(text.contains("# Server"));
    assert!(text.contains("# Cache"));
    assert!(text.contains("cmdstat_set:calls=1"));

    drop(conn);
    server.stop();
    let _ = handle.join();
}

#[test]
fn test_protocol_error_keeps_connection_usable() {
    let port = get_available_port();
    let (server, handle) = start_test_server(test_config(port));
    let mut conn = connect(port);

    // Unparseable array length: the server replies with a protocol error
    // and resets its parser, keeping the connection open.
    conn.write_all(b"*zz\r\n").unwrap();
    conn.flush().unwrap();
    let mut buf = [0u8; 256];
    let n = conn.read(&mut buf).unwrap();
    assert!(buf[..n].starts_with(b"-ERR Protocol error"));

    let reply = send_command(&mut conn, &set_cmd("x", "1"), 5);
    assert_eq!(&reply, b"+OK\r\n");

    drop(conn);
    server.stop();
    let _ = handle.join();
}

#[test]
fn test_pipelined_replies_in_order() {
    let port = get_available_port();
    let (server, handle) = start_test_server(test_config(port));
    let mut conn = connect(port);

    send_command(&mut conn, &set_cmd("key", "val"), 5);

    // 50 pipelined GETs; replies must come back in order, uninterleaved.
    let mut batch = Vec::new();
    for _ in 0..50 {
        batch.extend_from_slice(&get_cmd("key"));
    }
    conn.write_all(&batch).unwrap();
    conn.flush().unwrap();

    let expected_one = b"$3\r\nval\r\n";
    let reply = read_exactly(&mut conn, expected_one.len() * 50);
    assert_eq!(reply.len(), expected_one.len() * 50);
    for chunk in reply.chunks(expected_one.len()) {
        assert_eq!(chunk, expected_one);
    }

    drop(conn);
    server.stop();
    let _ = handle.join();
}

#[test]
fn test_concurrent_connections_are_isolated() {
    let port = get_available_port();
    let (server, handle) = start_test_server(test_config(port));

    let mut conns: Vec<TcpStream> = (0..4).map(|_| connect(port)).collect();

    for (i, conn) in conns.iter_mut().enumerate() {
        let reply = send_command(conn, &set_cmd(&format!("key-{}", i), &format!("val-{}", i)), 5);
        assert_eq!(&reply, b"+OK\r\n");
    }
    for (i, conn) in conns.iter_mut().enumerate() {
        let expected = format!("$5\r\nval-{}\r\n", i).into_bytes();
        let reply = send_command(conn, &get_cmd(&format!("key-{}", i)), expected.len());
        assert_eq!(reply, expected);
    }

    drop(conns);
    server.stop();
    let _ = handle.join();
}

#[test]
fn test_large_value_round_trip() {
    let port = get_available_port();
    let (server, handle) = start_test_server(test_config(port));
    let mut conn = connect(port);

    let value = "x".repeat(20_000);
    let reply = send_command(&mut conn, &set_cmd("big", &value), 5);
    assert_eq!(&reply, b"+OK\r\n");

    let expected = format!("${}\r\n{}\r\n", value.len(), value).into_bytes();
    let reply = send_command(&mut conn, &get_cmd("big"), expected.len());
    assert_eq!(reply, expected);

    drop(conn);
    server.stop();
    let _ = handle.join();
}
