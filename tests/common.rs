#![allow(dead_code)]

use anonftpd::{Config, Server};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

static COUNTER: AtomicU64 = AtomicU64::new(0);

/// A fresh, empty directory under the OS temp dir, unique per test.
pub fn unique_root() -> PathBuf {
    let n = COUNTER.fetch_add(1, Ordering::Relaxed);
    let dir = std::env::temp_dir().join(format!("anonftpd_test_{}_{n}", std::process::id()));
    std::fs::create_dir_all(&dir).unwrap();
    dir
}

/// Starts a server bound to an ephemeral loopback port with the given root,
/// spawns its accept loop, and returns it alongside the bound address.
pub async fn start_server(root: PathBuf) -> (Arc<Server>, std::net::SocketAddr) {
    start_server_with(Config::builder("127.0.0.1:0".parse().unwrap(), root).max_sessions(8)).await
}

pub async fn start_server_with(builder: anonftpd::config::ConfigBuilder) -> (Arc<Server>, std::net::SocketAddr) {
    let config = builder.build();
    let server = Arc::new(Server::init(config).await.unwrap());
    let addr = server.local_addr().unwrap();
    let serving = server.clone();
    tokio::spawn(async move { serving.serve().await });
    (server, addr)
}

/// Reads one reply (up to the next `\r\n`) and returns it without the terminator.
pub async fn read_reply(stream: &mut TcpStream) -> String {
    let mut buf = Vec::new();
    let mut byte = [0u8; 1];
    loop {
        let n = stream.read(&mut byte).await.unwrap();
        assert_ne!(n, 0, "connection closed while waiting for a reply");
        if byte[0] == b'\n' && buf.last() == Some(&b'\r') {
            buf.pop();
            return String::from_utf8_lossy(&buf).into_owned();
        }
        buf.push(byte[0]);
    }
}

/// Reads a multi-line reply block until the terminator line (`"CCC "` prefix,
/// not `"CCC-"`) is seen, returning every line including the terminator.
pub async fn read_multiline(stream: &mut TcpStream) -> Vec<String> {
    let mut lines = Vec::new();
    loop {
        let line = read_reply(stream).await;
        let is_terminator = line.len() >= 4 && line.as_bytes()[3] == b' ';
        lines.push(line);
        if is_terminator {
            return lines;
        }
    }
}

pub async fn send(stream: &mut TcpStream, line: &str) {
    stream.write_all(format!("{line}\r\n").as_bytes()).await.unwrap();
}

/// Connects, drains the greeting, and logs in as the anonymous user.
pub async fn connect_and_login(addr: std::net::SocketAddr) -> TcpStream {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let greeting = read_reply(&mut stream).await;
    assert!(greeting.starts_with("220"), "unexpected greeting: {greeting}");

    send(&mut stream, "USER anonymous").await;
    let r = read_reply(&mut stream).await;
    assert!(r.starts_with("331"), "unexpected USER reply: {r}");

    send(&mut stream, "PASS anon@example.com").await;
    let r = read_reply(&mut stream).await;
    assert!(r.starts_with("230"), "unexpected PASS reply: {r}");

    stream
}

/// Parses a `227 Entering Passive Mode (h1,h2,h3,h4,p1,p2).` reply into an address.
pub fn parse_pasv_reply(reply: &str) -> std::net::SocketAddr {
    let start = reply.find('(').unwrap() + 1;
    let end = reply.find(')').unwrap();
    let nums: Vec<u16> = reply[start..end].split(',').map(|s| s.parse().unwrap()).collect();
    let ip = std::net::Ipv4Addr::new(nums[0] as u8, nums[1] as u8, nums[2] as u8, nums[3] as u8);
    let port = (nums[4] << 8) | nums[5];
    std::net::SocketAddr::new(std::net::IpAddr::V4(ip), port)
}
