//! Tests for Server
//!
//! End-to-end behavior over real TCP connections on ephemeral ports.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use mapkv::protocol::codec;
use mapkv::protocol::{decode_response, encode_request, MAX_KEY_LENGTH, MAX_VALUE_LENGTH};
use mapkv::stats::Stats;
use mapkv::{Client, Config, ErrorCode, Operation, Request, Response, Server};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;

// =============================================================================
// Helper Functions
// =============================================================================

struct RunningServer {
    _dir: TempDir,
    addr: SocketAddr,
    stats: Arc<Stats>,
    shutdown: CancellationToken,
    handle: Option<JoinHandle<mapkv::Result<()>>>,
}

impl RunningServer {
    fn stop(mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            handle.join().unwrap().unwrap();
        }
    }
}

impl Drop for RunningServer {
    fn drop(&mut self) {
        self.shutdown.cancel();
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

fn start_server(test: &str) -> RunningServer {
    let temp_dir = TempDir::new().unwrap();
    let config = Config::builder()
        .storage_path(temp_dir.path().join("storage.bin"))
        .lock_name(format!("mapkv-server-test-{}-{}", std::process::id(), test))
        .listen_addr("127.0.0.1:0")
        .worker_threads(2)
        .stats_interval_secs(1)
        .build();

    let server = Server::new(config).unwrap();
    let addr = server.local_addr();
    let stats = server.stats();
    let shutdown = server.shutdown_handle();
    let handle = thread::spawn(move || server.run());

    RunningServer {
        _dir: temp_dir,
        addr,
        stats,
        shutdown,
        handle: Some(handle),
    }
}

/// Send a request without client-side validation
fn raw_round_trip(stream: &mut TcpStream, request: &Request) -> Response {
    let payload = encode_request(request).unwrap();
    stream.write_all(&codec::frame(&payload)).unwrap();
    let body = codec::read_frame(stream).unwrap();
    decode_response(&body).unwrap()
}

// =============================================================================
// End-to-End Tests
// =============================================================================

#[test]
fn test_end_to_end_scenario() {
    let server = start_server("scenario");
    let mut client = Client::new();
    let addr = server.addr;

    let steps = [
        (Request::insert("user:1", "alice"), ErrorCode::None, ""),
        (
            Request::insert("user:1", "bob"),
            ErrorCode::InsertKeyAlreadyExists,
            "",
        ),
        (Request::get("user:1"), ErrorCode::None, "alice"),
        (Request::update("user:1", "bob"), ErrorCode::None, ""),
        (Request::get("user:1"), ErrorCode::None, "bob"),
        (Request::delete("user:1"), ErrorCode::None, ""),
        (Request::get("user:1"), ErrorCode::GetKeyNotFound, ""),
    ];

    for (request, error, value) in steps {
        let response = client.send(addr, &request).unwrap();
        assert_eq!(response.operation, request.operation, "{}", request);
        assert_eq!(response.error, error, "{}", request);
        assert_eq!(response.value, value.as_bytes(), "{}", request);
    }
    assert!(client.is_connected());

    let snapshot = server.stats.snapshot();
    assert_eq!(snapshot.total_items, 0);
    assert_eq!(snapshot.operation(Operation::Insert).successful, 1);
    assert_eq!(snapshot.operation(Operation::Insert).failed, 1);
    assert_eq!(snapshot.operation(Operation::Get).successful, 2);
    assert_eq!(snapshot.operation(Operation::Get).failed, 1);

    server.stop();
}

#[test]
fn test_many_clients_in_parallel() {
    let server = start_server("parallel");
    let addr = server.addr;

    let handles: Vec<_> = (0..8)
        .map(|t| {
            thread::spawn(move || {
                let mut client = Client::new();
                for i in 0..50 {
                    let key = format!("c{}-{}", t, i);
                    let response = client.send(addr, &Request::insert(key.clone(), "v")).unwrap();
                    assert_eq!(response.error, ErrorCode::None);
                    let response = client.send(addr, &Request::get(key)).unwrap();
                    assert_eq!(response.value, b"v");
                }
            })
        })
        .collect();

    for handle in handles {
        handle.join().unwrap();
    }
    assert_eq!(server.stats.total_items(), 400);

    server.stop();
}

#[test]
fn test_oversized_fields_rejected_by_server() {
    let server = start_server("oversized");
    let mut stream = TcpStream::connect(server.addr).unwrap();

    let response = raw_round_trip(
        &mut stream,
        &Request::insert(vec![b'k'; MAX_KEY_LENGTH + 1], "v"),
    );
    assert_eq!(response.error, ErrorCode::InvalidKeyLength);
    assert!(response.value.is_empty());

    // Same connection keeps working
    let response = raw_round_trip(&mut stream, &Request::get("missing"));
    assert_eq!(response.error, ErrorCode::GetKeyNotFound);

    let snapshot = server.stats.snapshot();
    assert_eq!(snapshot.operation(Operation::Insert).failed, 1);
    assert_eq!(snapshot.total_items, 0);

    // Values up to the limit pass validation; the wire caps them at 64 KiB
    assert!(MAX_VALUE_LENGTH > u16::MAX as usize);

    server.stop();
}

#[test]
fn test_bad_frame_drops_only_that_connection() {
    let server = start_server("badframe");
    let mut client = Client::new();
    client
        .send(server.addr, &Request::insert("keep", "me"))
        .unwrap();

    // Frame size far beyond any valid payload
    let mut bad = TcpStream::connect(server.addr).unwrap();
    bad.write_all(&codec::encode_frame_size(1 << 40)).unwrap();
    let mut rest = Vec::new();
    let read = bad.read_to_end(&mut rest);
    assert!(read.map(|n| n == 0).unwrap_or(true));

    // Existing connection and new ones are unaffected
    let response = client.send(server.addr, &Request::get("keep")).unwrap();
    assert_eq!(response.value, b"me");
    let mut fresh = Client::new();
    let response = fresh.send(server.addr, &Request::get("keep")).unwrap();
    assert_eq!(response.value, b"me");

    server.stop();
}

#[test]
fn test_data_survives_restart() {
    let temp_dir = TempDir::new().unwrap();
    let lock_name = format!("mapkv-server-test-{}-restart", std::process::id());
    let config = Config::builder()
        .storage_path(temp_dir.path().join("storage.bin"))
        .lock_name(lock_name)
        .listen_addr("127.0.0.1:0")
        .worker_threads(1)
        .build();

    for round in 0..2 {
        let server = Server::new(config.clone()).unwrap();
        let addr = server.local_addr();
        let shutdown = server.shutdown_handle();
        assert_eq!(server.stats().total_items(), round);
        let handle = thread::spawn(move || server.run());

        let mut client = Client::new();
        let key = format!("round{}", round);
        let response = client.send(addr, &Request::insert(key, "v")).unwrap();
        assert_eq!(response.error, ErrorCode::None);
        if round == 1 {
            let response = client.send(addr, &Request::get("round0")).unwrap();
            assert_eq!(response.value, b"v");
        }

        shutdown.cancel();
        handle.join().unwrap().unwrap();
    }
}
