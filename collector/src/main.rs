use anyhow::{anyhow, Context, Result};
use clap::Parser;
use collector::api::HttpApi;
use collector::{
    restore, rpc, AsyncBackup, BackupCreator, CollectorArgs, CollectorConfig, Ingestor,
    MemoryRepository, Repository, SnapshotFile, SqliteRepository, SyncBackup,
};
use pulse_core::security::{DecryptManager, SignManager};
use pulse_core::{logging, shutdown};
use std::sync::Arc;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    let config = CollectorConfig::load(CollectorArgs::parse()).context("invalid configuration")?;
    logging::init_logging(&config.log_level);

    let repo: Arc<dyn Repository> = match config.database_path() {
        Some(path) => {
            Arc::new(SqliteRepository::open(path).context("failed to open database")?)
        }
        None => Arc::new(MemoryRepository::new()),
    };

    let file = Arc::new(SnapshotFile::new(&config.file_storage_path));
    if config.restore {
        if let Err(e) = restore(&file, repo.as_ref()).await {
            error!(error = %e, path = %file.path().display(), "Failed to restore snapshot, starting empty");
        }
    }

    let backup: Arc<dyn BackupCreator> = match config.store_interval() {
        None => Arc::new(SyncBackup::new(repo.clone(), file.clone())),
        Some(interval) => {
            let backup = AsyncBackup::new(repo.clone(), file.clone(), interval);
            backup.start();
            Arc::new(backup)
        }
    };

    let signer = SignManager::new(&config.key);
    let decryptor = DecryptManager::from_pem_file(config.crypto_key.as_deref())
        .context("failed to load private key")?;
    let subnet = config.trusted_subnet()?;

    info!(
        address = %config.address,
        address_rpc = %config.address_rpc,
        database = config.database_path().is_some(),
        store_interval = config.store_interval,
        signing = signer.is_enabled(),
        decryption = decryptor.is_enabled(),
        trusted_subnet = ?subnet,
        "Starting collector"
    );

    let ingestor = Arc::new(Ingestor::new(repo, backup.clone(), signer, decryptor));
    let grace = config.shutdown_grace();

    let mut http = HttpApi::bind(&config.address, ingestor.clone(), subnet, grace)
        .with_context(|| format!("failed to bind {}", config.address))?;
    let http_task = http.spawn();

    let rpc_addr = tokio::net::lookup_host(&config.address_rpc)
        .await?
        .next()
        .ok_or_else(|| anyhow!("cannot resolve {}", config.address_rpc))?;
    let (tx, mut rx) = shutdown::channel();
    let mut rpc_task = tokio::spawn(rpc::serve(rpc_addr, ingestor, subnet, async move {
        let _ = rx.changed().await;
    }));

    let mut rpc_done = false;
    tokio::select! {
        _ = shutdown::wait_for_signal() => {}
        result = &mut rpc_task => {
            rpc_done = true;
            match result {
                Ok(Ok(())) => warn!("RPC server exited"),
                Ok(Err(e)) => error!(error = %e, "RPC server failed"),
                Err(e) => error!(error = %e, "RPC server task panicked"),
            }
        }
    }

    let _ = tx.send(true);
    http.stop().await;
    if let Some(task) = http_task {
        match task.await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "HTTP server failed"),
            Err(e) => error!(error = %e, "HTTP server task panicked"),
        }
    }
    if !rpc_done && tokio::time::timeout(grace, rpc_task).await.is_err() {
        warn!("RPC calls still open after the grace period");
    }

    if let Err(e) = backup.stop().await {
        error!(error = %e, "Final snapshot failed");
    }

    info!("Collector stopped");
    Ok(())
}
