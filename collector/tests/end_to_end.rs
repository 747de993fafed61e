//! Agent transports against running collector servers

use agent::client::{HttpTransport, RetryPolicy, RpcTransport, Transport, TransportError};
use collector::api::HttpApi;
use collector::backup::SyncBackup;
use collector::{rpc, Ingestor, MemoryRepository, Repository, SnapshotFile};
use ipnet::IpNet;
use pulse_core::security::{generate_key_pair, DecryptManager, EncryptManager, SignManager};
use pulse_core::Metric;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::oneshot;

const LOCAL: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

struct Collector {
    repo: Arc<dyn Repository>,
    ingestor: Arc<Ingestor>,
    _dir: tempfile::TempDir,
    snapshot: Arc<SnapshotFile>,
}

fn start_collector(key: &str, decryptor: DecryptManager) -> Collector {
    let dir = tempfile::tempdir().unwrap();
    let snapshot = Arc::new(SnapshotFile::new(dir.path().join("metrics.json")));
    let repo: Arc<dyn Repository> = Arc::new(MemoryRepository::new());
    let backup = Arc::new(SyncBackup::new(repo.clone(), snapshot.clone()));
    let ingestor = Arc::new(Ingestor::new(
        repo.clone(),
        backup,
        SignManager::new(key),
        decryptor,
    ));
    Collector {
        repo,
        ingestor,
        _dir: dir,
        snapshot,
    }
}

fn free_addr() -> SocketAddr {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    listener.local_addr().unwrap()
}

async fn wait_listening(addr: SocketAddr) {
    for _ in 0..100 {
        if tokio::net::TcpStream::connect(addr).await.is_ok() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("server at {addr} never came up");
}

fn start_rpc(ingestor: Arc<Ingestor>, subnet: Option<IpNet>) -> (SocketAddr, oneshot::Sender<()>) {
    let addr = free_addr();
    let (tx, rx) = oneshot::channel::<()>();
    tokio::spawn(rpc::serve(addr, ingestor, subnet, async move {
        let _ = rx.await;
    }));
    (addr, tx)
}

fn batch() -> Vec<Metric> {
    vec![
        Metric::gauge("Alloc", 0.1),
        Metric::counter("PollCount", 1),
        Metric::counter("PollCount", 2),
    ]
}

#[tokio::test(flavor = "multi_thread")]
async fn test_http_transport_signed_and_encrypted() {
    let pair = generate_key_pair(1024).unwrap();
    let keys = tempfile::tempdir().unwrap();
    std::fs::write(keys.path().join("private.pem"), &pair.private).unwrap();
    std::fs::write(keys.path().join("public.pem"), &pair.public).unwrap();
    let private = keys.path().join("private.pem");
    let public = keys.path().join("public.pem");

    let collector = start_collector(
        "secret",
        DecryptManager::from_pem_file(Some(private.as_path())).unwrap(),
    );
    let mut api = HttpApi::bind(
        "127.0.0.1:0",
        collector.ingestor.clone(),
        None,
        Duration::from_secs(1),
    )
    .unwrap();
    let addr = api.local_addrs()[0];
    let server = api.spawn().unwrap();

    let transport = HttpTransport::new(
        &addr.to_string(),
        SignManager::new("secret"),
        EncryptManager::from_pem_file(Some(public.as_path())).unwrap(),
        LOCAL,
    )
    .unwrap()
    .with_retry(RetryPolicy::none());
    transport.send(&batch()).await.unwrap();

    assert_eq!(collector.repo.get_gauge("Alloc").await.unwrap(), 0.1);
    assert_eq!(collector.repo.get_counter("PollCount").await.unwrap(), 3);
    assert_eq!(collector.snapshot.load().await.unwrap().len(), 2);

    api.stop().await;
    server.await.unwrap().unwrap();
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rpc_transport_typed_batch() {
    let collector = start_collector("secret", DecryptManager::default());
    let (addr, stop) = start_rpc(collector.ingestor.clone(), None);
    wait_listening(addr).await;

    let transport = RpcTransport::new(
        &addr.to_string(),
        SignManager::new("secret"),
        EncryptManager::default(),
        LOCAL,
    )
    .unwrap()
    .with_retry(RetryPolicy::none());
    transport.send(&batch()).await.unwrap();

    assert_eq!(collector.repo.get_gauge("Alloc").await.unwrap(), 0.1);
    assert_eq!(collector.repo.get_counter("PollCount").await.unwrap(), 3);
    let _ = stop.send(());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rpc_wrong_key_is_rejected() {
    let collector = start_collector("secret", DecryptManager::default());
    let (addr, stop) = start_rpc(collector.ingestor.clone(), None);
    wait_listening(addr).await;

    let transport = RpcTransport::new(
        &addr.to_string(),
        SignManager::new("other"),
        EncryptManager::default(),
        LOCAL,
    )
    .unwrap()
    .with_retry(RetryPolicy::none());

    match transport.send(&batch()).await {
        Err(TransportError::Rpc(status)) => {
            assert_eq!(status.code(), tonic::Code::FailedPrecondition)
        }
        other => panic!("expected a rejected call, got {other:?}"),
    }
    assert!(collector.repo.get_counter("PollCount").await.is_err());
    let _ = stop.send(());
}

#[tokio::test(flavor = "multi_thread")]
async fn test_rpc_untrusted_caller_is_rejected() {
    let collector = start_collector("", DecryptManager::default());
    let subnet: IpNet = "192.168.1.0/24".parse().unwrap();
    let (addr, stop) = start_rpc(collector.ingestor.clone(), Some(subnet));
    wait_listening(addr).await;

    let transport = RpcTransport::new(
        &addr.to_string(),
        SignManager::default(),
        EncryptManager::default(),
        IpAddr::V4(Ipv4Addr::new(10, 0, 0, 5)),
    )
    .unwrap()
    .with_retry(RetryPolicy::none());

    match transport.send(&batch()).await {
        Err(TransportError::Rpc(status)) => {
            assert_eq!(status.code(), tonic::Code::PermissionDenied)
        }
        other => panic!("expected a rejected call, got {other:?}"),
    }
    let (gauges, counters) = collector.repo.snapshot().await.unwrap();
    assert!(gauges.is_empty() && counters.is_empty());
    let _ = stop.send(());
}
