//! HTTP transport against a bare TCP listener

use agent::client::{HttpTransport, RetryPolicy, Transport, TransportError};
use pulse_core::compress;
use pulse_core::security::{EncryptManager, SignManager};
use pulse_core::{Metric, MetricRecord};
use std::net::{IpAddr, Ipv4Addr};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

struct Captured {
    head: String,
    body: Vec<u8>,
}

impl Captured {
    fn header(&self, name: &str) -> Option<String> {
        self.head.lines().find_map(|line| {
            let (key, value) = line.split_once(':')?;
            key.trim()
                .eq_ignore_ascii_case(name)
                .then(|| value.trim().to_string())
        })
    }
}

/// Accept one connection, answer with `status`, return what was received
async fn serve_once(listener: &TcpListener, status: &'static str) -> Captured {
    let (mut socket, _) = listener.accept().await.unwrap();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    let head_end = loop {
        let n = socket.read(&mut chunk).await.unwrap();
        buf.extend_from_slice(&chunk[..n]);
        if let Some(pos) = buf.windows(4).position(|w| w == b"\r\n\r\n") {
            break pos + 4;
        }
    };

    let head = String::from_utf8_lossy(&buf[..head_end]).to_string();
    let length: usize = head
        .lines()
        .find_map(|l| {
            let (k, v) = l.split_once(':')?;
            k.eq_ignore_ascii_case("content-length")
                .then(|| v.trim().parse().ok())
                .flatten()
        })
        .unwrap_or(0);

    while buf.len() < head_end + length {
        let n = socket.read(&mut chunk).await.unwrap();
        buf.extend_from_slice(&chunk[..n]);
    }

    let response = format!("HTTP/1.1 {}\r\ncontent-length: 0\r\nconnection: close\r\n\r\n", status);
    socket.write_all(response.as_bytes()).await.unwrap();

    Captured {
        head,
        body: buf[head_end..head_end + length].to_vec(),
    }
}

async fn listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let address = listener.local_addr().unwrap().to_string();
    (listener, address)
}

#[tokio::test]
async fn test_batch_wire_format() {
    let (listener, address) = listener().await;
    let server = tokio::spawn(async move { serve_once(&listener, "200 OK").await });

    let transport = HttpTransport::new(
        &address,
        SignManager::new("secret"),
        EncryptManager::default(),
        IpAddr::V4(Ipv4Addr::new(10, 1, 2, 3)),
    )
    .unwrap();

    transport
        .send(&[Metric::gauge("Alloc", 12.5), Metric::counter("PollCount", 1)])
        .await
        .unwrap();

    let captured = server.await.unwrap();
    assert!(captured.head.starts_with("POST /updates/ HTTP/1.1"));
    assert_eq!(captured.header("content-encoding").as_deref(), Some("gzip"));
    assert_eq!(captured.header("accept-encoding").as_deref(), Some("gzip"));
    assert_eq!(
        captured.header("content-type").as_deref(),
        Some("application/json")
    );
    assert_eq!(captured.header("x-real-ip").as_deref(), Some("10.1.2.3"));

    let json = compress::decompress(&captured.body).unwrap();
    let records: Vec<MetricRecord> = serde_json::from_slice(&json).unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].value, Some(12.5));
    assert_eq!(records[1].delta, Some(1));

    let signature = captured.header("hashsha256").unwrap();
    assert!(SignManager::new("secret").verify(&json, &signature).is_ok());
}

#[tokio::test]
async fn test_client_error_is_not_retried() {
    let (listener, address) = listener().await;
    let server = tokio::spawn(async move { serve_once(&listener, "400 Bad Request").await });

    let transport = HttpTransport::new(
        &address,
        SignManager::default(),
        EncryptManager::default(),
        IpAddr::V4(Ipv4Addr::LOCALHOST),
    )
    .unwrap();

    // a retry would hit the dropped listener and fail with a connect error
    let result = transport.send(&[Metric::gauge("Alloc", 1.0)]).await;
    assert!(matches!(
        result,
        Err(TransportError::Status { status: 400, .. })
    ));
    server.await.unwrap();
}

#[tokio::test]
async fn test_server_error_is_retried() {
    let (listener, address) = listener().await;
    let server = tokio::spawn(async move {
        let first = serve_once(&listener, "503 Service Unavailable").await;
        let second = serve_once(&listener, "200 OK").await;
        (first, second)
    });

    let transport = HttpTransport::new(
        &address,
        SignManager::default(),
        EncryptManager::default(),
        IpAddr::V4(Ipv4Addr::LOCALHOST),
    )
    .unwrap()
    .with_retry(RetryPolicy {
        max_retries: 1,
        ..Default::default()
    });

    transport.send(&[Metric::gauge("Alloc", 1.0)]).await.unwrap();
    let (first, second) = server.await.unwrap();
    assert_eq!(first.body, second.body);
}

