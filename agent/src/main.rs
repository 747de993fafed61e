use agent::client::ip::outbound_ip;
use agent::{build_transport, AgentArgs, AgentConfig, RateLimiter, Scheduler, StatsCollector};
use anyhow::{Context, Result};
use clap::Parser;
use pulse_core::security::{EncryptManager, SignManager};
use pulse_core::{logging, shutdown};
use std::sync::Arc;
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    let config = AgentConfig::load(AgentArgs::parse()).context("invalid configuration")?;
    logging::init_logging(&config.log_level);

    let signer = SignManager::new(&config.key);
    let encryptor = EncryptManager::from_pem_file(config.crypto_key.as_deref())
        .context("failed to load public key")?;
    let real_ip = outbound_ip();

    info!(
        address = %config.address,
        address_rpc = %config.address_rpc,
        transport = ?config.transport,
        signing = signer.is_enabled(),
        encryption = encryptor.is_enabled(),
        real_ip = %real_ip,
        "Starting agent"
    );

    let transport = build_transport(&config, signer, encryptor, real_ip)
        .context("failed to build transport")?;
    let limiter = RateLimiter::new(config.rate_limit);
    let (tx, rx) = shutdown::channel();

    let handle = Scheduler::new(
        Arc::new(StatsCollector::new()),
        transport,
        limiter,
        config.poll_interval(),
        config.report_interval(),
    )
    .spawn(rx);

    shutdown::wait_for_signal().await;
    let _ = tx.send(true);
    handle.join().await;

    info!("Agent stopped");
    Ok(())
}
