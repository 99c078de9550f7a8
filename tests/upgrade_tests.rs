//! # Connection-Level Tests
//!
//! Runs the gateway on a real socket against a raw TCP upstream:
//! - `Connection: Upgrade` requests are tunnelled in both directions after a 101
//! - a client that disconnects mid-request aborts the upstream request

use edge_gateway::core::config::SecretString;
use edge_gateway::{GatewayConfig, GatewayServer};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;

const WAIT: Duration = Duration::from_secs(5);

/// Serve the gateway on an ephemeral port with the courses upstream at `courses_addr`
async fn spawn_gateway(courses_addr: SocketAddr) -> SocketAddr {
    let mut config = GatewayConfig::default();
    config.gateway_secret = SecretString::new("gateway-secret");
    config.auth.jwt_secret = SecretString::new("jwt-secret");
    for service in &mut config.services {
        service.url = if service.name == "courses" {
            format!("http://{}", courses_addr)
        } else {
            "http://127.0.0.1:1".to_string()
        };
    }
    config.validate().unwrap();

    let router = GatewayServer::new(&config, None).unwrap().router().unwrap();
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .unwrap();
    });
    addr
}

/// Read until the end of an HTTP message head
async fn read_head<R: AsyncRead + Unpin>(stream: &mut R) -> String {
    let mut head = Vec::new();
    let mut byte = [0u8; 1];
    while !head.ends_with(b"\r\n\r\n") {
        let n = stream.read(&mut byte).await.unwrap();
        assert!(n > 0, "connection closed inside message head");
        head.push(byte[0]);
    }
    String::from_utf8(head).unwrap()
}

#[tokio::test]
async fn test_upgrade_is_tunnelled_both_ways() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let (head_tx, head_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = upstream.accept().await.unwrap();
        let head = read_head(&mut socket).await;
        let _ = head_tx.send(head);
        socket
            .write_all(b"HTTP/1.1 101 Switching Protocols\r\nConnection: upgrade\r\nUpgrade: echo\r\n\r\n")
            .await
            .unwrap();

        let mut buf = [0u8; 1024];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(n) => {
                    if socket.write_all(&buf[..n]).await.is_err() {
                        break;
                    }
                }
            }
        }
    });

    let gateway = spawn_gateway(upstream_addr).await;
    let mut client = TcpStream::connect(gateway).await.unwrap();
    client
        .write_all(
            b"GET /api/courses/list HTTP/1.1\r\nHost: gateway\r\nConnection: Upgrade\r\nUpgrade: echo\r\n\r\n",
        )
        .await
        .unwrap();

    let response = tokio::time::timeout(WAIT, read_head(&mut client)).await.unwrap();
    assert!(response.starts_with("HTTP/1.1 101"), "unexpected response: {}", response);

    let upstream_head = tokio::time::timeout(WAIT, head_rx).await.unwrap().unwrap();
    let upstream_head = upstream_head.to_ascii_lowercase();
    assert!(upstream_head.starts_with("get /list http/1.1"));
    assert!(upstream_head.contains("upgrade: echo"));
    assert!(upstream_head.contains("x-gateway-secret: gateway-secret"));

    for message in [&b"ping"[..], &b"second frame"[..]] {
        client.write_all(message).await.unwrap();
        let mut echoed = vec![0u8; message.len()];
        tokio::time::timeout(WAIT, client.read_exact(&mut echoed))
            .await
            .unwrap()
            .unwrap();
        assert_eq!(echoed, message);
    }
}

#[tokio::test]
async fn test_client_disconnect_aborts_upstream_request() {
    let upstream = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let upstream_addr = upstream.local_addr().unwrap();
    let (seen_tx, seen_rx) = oneshot::channel();
    let (closed_tx, closed_rx) = oneshot::channel();

    tokio::spawn(async move {
        let (mut socket, _) = upstream.accept().await.unwrap();
        read_head(&mut socket).await;
        let _ = seen_tx.send(());

        // Never answer; wait for the gateway to hang up
        let mut buf = [0u8; 256];
        loop {
            match socket.read(&mut buf).await {
                Ok(0) | Err(_) => break,
                Ok(_) => continue,
            }
        }
        let _ = closed_tx.send(());
    });

    let gateway = spawn_gateway(upstream_addr).await;
    let mut client = TcpStream::connect(gateway).await.unwrap();
    client
        .write_all(b"GET /api/courses/list HTTP/1.1\r\nHost: gateway\r\n\r\n")
        .await
        .unwrap();

    tokio::time::timeout(WAIT, seen_rx).await.unwrap().unwrap();
    drop(client);

    tokio::time::timeout(WAIT, closed_rx)
        .await
        .expect("upstream connection still open after client disconnect")
        .unwrap();
}
