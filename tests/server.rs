// Copyright 2026 The kvikk authors
//
// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
//     http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! End-to-end scenarios: a full server (reactor, agent pool, static
//! workers) over real sockets, with the resource roots pointed at scratch
//! directories.

use std::io::{Read, Write};
use std::net::{SocketAddr, TcpStream};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use tempfile::TempDir;

use kvikk::config::ServerConfig;
use kvikk::dynlib::ModuleLoader;
use kvikk::reactor::Reactor;
use kvikk::stats::Stats;
use kvikk::worker;

struct TestServer {
    addr: SocketAddr,
    static_dir: TempDir,
    _cgi_dir: TempDir,
}

fn start_server() -> TestServer {
    let static_dir = tempfile::tempdir().unwrap();
    let cgi_dir = tempfile::tempdir().unwrap();
    let config = Arc::new(ServerConfig {
        port: 0,
        worker_port: 0,
        worker_count: 2,
        static_root: static_dir.path().to_path_buf(),
        cgi_root: cgi_dir.path().to_path_buf(),
        caching: false,
        ..ServerConfig::default()
    });

    let loader = Arc::new(ModuleLoader::new(config.cgi_root.clone(), None));
    let worker_port = worker::spawn_agents(&config, loader).unwrap();
    let mut reactor =
        Reactor::new(Arc::clone(&config), worker_port, Arc::new(Stats::new())).unwrap();
    let addr = reactor.local_addr().unwrap();
    thread::spawn(move || reactor.run());

    TestServer {
        addr,
        static_dir,
        _cgi_dir: cgi_dir,
    }
}

/// Sends one request and reads the reply until the server closes.
fn get(addr: SocketAddr, target: &str) -> Vec<u8> {
    let mut conn = TcpStream::connect(addr).unwrap();
    conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    write!(conn, "GET {target} HTTP/1.0\r\n\r\n").unwrap();
    let mut reply = Vec::new();
    conn.read_to_end(&mut reply).unwrap();
    reply
}

#[test]
fn static_resource_is_served_with_200() {
    let server = start_server();
    std::fs::write(server.static_dir.path().join("hello.html"), b"HELLO").unwrap();

    let reply = get(server.addr, "/hello.html");
    assert_eq!(reply, b"HTTP/1.0 200 OK\r\n\r\nHELLO");
}

#[test]
fn missing_static_resource_yields_404() {
    let server = start_server();
    let reply = get(server.addr, "/missing.html");
    assert_eq!(reply, b"HTTP/1.0 404 Not Found\r\n\r\n");
}

#[test]
fn missing_module_yields_404_through_the_worker_pool() {
    let server = start_server();
    let reply = get(server.addr, "/cgi-bin/nope");
    assert_eq!(reply, b"HTTP/1.0 404 Not Found\r\n\r\n");
}

#[test]
fn unknown_resource_is_dropped_without_a_reply() {
    let server = start_server();
    let reply = get(server.addr, "/archive.zip");
    assert!(reply.is_empty());
}

#[test]
fn non_get_request_is_dropped() {
    let server = start_server();
    let mut conn = TcpStream::connect(server.addr).unwrap();
    conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    conn.write_all(b"POST /hello.html HTTP/1.0\r\n\r\n").unwrap();
    let mut reply = Vec::new();
    conn.read_to_end(&mut reply).unwrap();
    assert!(reply.is_empty());
}

#[test]
fn header_split_across_writes_still_dispatches() {
    let server = start_server();
    std::fs::write(server.static_dir.path().join("split.txt"), b"PARTS").unwrap();

    let mut conn = TcpStream::connect(server.addr).unwrap();
    conn.set_read_timeout(Some(Duration::from_secs(5))).unwrap();
    conn.write_all(b"GET /split.txt ").unwrap();
    conn.flush().unwrap();
    thread::sleep(Duration::from_millis(50));
    conn.write_all(b"HTTP/1.0\r\n\r\n").unwrap();

    let mut reply = Vec::new();
    conn.read_to_end(&mut reply).unwrap();
    assert_eq!(reply, b"HTTP/1.0 200 OK\r\n\r\nPARTS");
}

#[test]
fn concurrent_static_requests_all_complete() {
    let server = start_server();
    std::fs::write(server.static_dir.path().join("busy.txt"), b"BUSY").unwrap();

    let handles: Vec<_> = (0..32)
        .map(|_| {
            let addr = server.addr;
            thread::spawn(move || get(addr, "/busy.txt"))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), b"HTTP/1.0 200 OK\r\n\r\nBUSY");
    }
}

#[test]
fn concurrent_dynamic_requests_all_get_answers() {
    let server = start_server();
    let handles: Vec<_> = (0..32)
        .map(|_| {
            let addr = server.addr;
            thread::spawn(move || get(addr, "/cgi-bin/absent"))
        })
        .collect();
    for handle in handles {
        assert_eq!(handle.join().unwrap(), b"HTTP/1.0 404 Not Found\r\n\r\n");
    }
}
