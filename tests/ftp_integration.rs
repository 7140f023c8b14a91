mod common;

use anonftpd::Config;
use common::*;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

#[tokio::test]
async fn anonymous_login_and_pwd() {
    let root = unique_root();
    let (_server, addr) = start_server(root.clone()).await;
    let mut stream = connect_and_login(addr).await;

    send(&mut stream, "PWD").await;
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("257"), "unexpected PWD reply: {reply}");
    assert!(reply.contains(&root.to_string_lossy().into_owned()));
}

#[tokio::test]
async fn list_over_pasv_shows_uploaded_file() {
    let root = unique_root();
    std::fs::write(root.join("hello.txt"), b"hi").unwrap();
    let (_server, addr) = start_server(root.clone()).await;
    let mut stream = connect_and_login(addr).await;

    send(&mut stream, "PASV").await;
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("227"), "unexpected PASV reply: {reply}");
    let data_addr = parse_pasv_reply(&reply);

    send(&mut stream, "LIST").await;
    let opening = read_reply(&mut stream).await;
    assert!(opening.starts_with("150"), "unexpected LIST opening reply: {opening}");

    let mut data = TcpStream::connect(data_addr).await.unwrap();
    let mut buf = Vec::new();
    data.read_to_end(&mut buf).await.unwrap();
    let listing = String::from_utf8_lossy(&buf);
    assert!(listing.contains("hello.txt"), "listing missing uploaded file: {listing}");

    let closing = read_reply(&mut stream).await;
    assert!(closing.starts_with("226"), "unexpected LIST closing reply: {closing}");
}

#[tokio::test]
async fn stor_then_retr_round_trips_file_contents() {
    let root = unique_root();
    let (_server, addr) = start_server(root.clone()).await;
    let mut stream = connect_and_login(addr).await;
    let payload = b"the quick brown fox jumps over the lazy dog".repeat(200);

    send(&mut stream, "PASV").await;
    let data_addr = parse_pasv_reply(&read_reply(&mut stream).await);
    send(&mut stream, "STOR upload.bin").await;
    assert!(read_reply(&mut stream).await.starts_with("150"));
    let mut data = TcpStream::connect(data_addr).await.unwrap();
    data.write_all(&payload).await.unwrap();
    drop(data);
    assert!(read_reply(&mut stream).await.starts_with("226"));

    send(&mut stream, "PASV").await;
    let data_addr = parse_pasv_reply(&read_reply(&mut stream).await);
    send(&mut stream, "RETR upload.bin").await;
    assert!(read_reply(&mut stream).await.starts_with("150"));
    let mut data = TcpStream::connect(data_addr).await.unwrap();
    let mut received = Vec::new();
    data.read_to_end(&mut received).await.unwrap();
    assert!(read_reply(&mut stream).await.starts_with("226"));

    assert_eq!(received, payload);
}

#[tokio::test]
async fn rest_then_retr_resumes_from_offset() {
    let root = unique_root();
    let payload = b"0123456789abcdefghij".to_vec();
    std::fs::write(root.join("resumable.bin"), &payload).unwrap();
    let (_server, addr) = start_server(root).await;
    let mut stream = connect_and_login(addr).await;

    send(&mut stream, "REST 10").await;
    assert!(read_reply(&mut stream).await.starts_with("350"));

    send(&mut stream, "PASV").await;
    let data_addr = parse_pasv_reply(&read_reply(&mut stream).await);
    send(&mut stream, "RETR resumable.bin").await;
    assert!(read_reply(&mut stream).await.starts_with("150"));

    let mut data = TcpStream::connect(data_addr).await.unwrap();
    let mut received = Vec::new();
    data.read_to_end(&mut received).await.unwrap();
    assert!(read_reply(&mut stream).await.starts_with("226"));

    assert_eq!(received, payload[10..]);
}

#[tokio::test]
async fn traversal_outside_root_is_rejected() {
    let root = unique_root();
    let (_server, addr) = start_server(root).await;
    let mut stream = connect_and_login(addr).await;

    send(&mut stream, "CWD ../../../../../../etc").await;
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("550"), "traversal should be rejected, got: {reply}");

    send(&mut stream, "RETR ../../../../../../etc/passwd").await;
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("550"), "traversal RETR should be rejected, got: {reply}");
}

#[tokio::test]
async fn port_with_spoofed_ip_is_rejected() {
    let root = unique_root();
    let (_server, addr) = start_server(root).await;
    let mut stream = connect_and_login(addr).await;

    send(&mut stream, "PORT 10,0,0,2,7,209").await;
    let reply = read_reply(&mut stream).await;
    assert!(reply.starts_with("501"), "spoofed PORT should be rejected, got: {reply}");
}

#[tokio::test]
async fn repeated_auth_failures_trigger_lockout() {
    let root = unique_root();
    let builder = Config::builder("127.0.0.1:0".parse().unwrap(), root).auth_delay(Duration::from_millis(5));
    let (_server, addr) = start_server_with(builder).await;
    let mut stream = TcpStream::connect(addr).await.unwrap();
    assert!(read_reply(&mut stream).await.starts_with("220"));

    for _ in 0..3 {
        send(&mut stream, "USER baduser").await;
        let reply = read_reply(&mut stream).await;
        assert!(reply.starts_with("530"), "unexpected USER reply during lockout buildup: {reply}");
    }

    // Connection should now be dropped by the server after the final attempt.
    let mut buf = [0u8; 16];
    let n = stream.read(&mut buf).await.unwrap();
    assert_eq!(n, 0, "server should close the connection after exceeding the auth attempt budget");
}

#[tokio::test]
async fn concurrent_sessions_each_round_trip_independently() {
    let root = unique_root();
    let (_server, addr) = start_server(root).await;

    let mut handles = Vec::new();
    for i in 0..4 {
        handles.push(tokio::spawn(async move {
            let mut stream = connect_and_login(addr).await;
            let name = format!("concurrent_{i}.bin");
            let payload = vec![i as u8; 4096];

            send(&mut stream, "PASV").await;
            let data_addr = parse_pasv_reply(&read_reply(&mut stream).await);
            send(&mut stream, &format!("STOR {name}")).await;
            assert!(read_reply(&mut stream).await.starts_with("150"));
            let mut data = TcpStream::connect(data_addr).await.unwrap();
            data.write_all(&payload).await.unwrap();
            drop(data);
            assert!(read_reply(&mut stream).await.starts_with("226"));

            send(&mut stream, "PASV").await;
            let data_addr = parse_pasv_reply(&read_reply(&mut stream).await);
            send(&mut stream, &format!("RETR {name}")).await;
            assert!(read_reply(&mut stream).await.starts_with("150"));
            let mut data = TcpStream::connect(data_addr).await.unwrap();
            let mut received = Vec::new();
            data.read_to_end(&mut received).await.unwrap();
            assert!(read_reply(&mut stream).await.starts_with("226"));
            assert_eq!(received, payload);
        }));
    }
    for h in handles {
        h.await.unwrap();
    }
}
