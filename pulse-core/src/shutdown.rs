//! Shutdown signal handling
//!
//! Signal handlers feed one `watch` channel. Every long-running task holds a
//! receiver and stops once the value flips to `true`.

use tokio::sync::watch;
use tracing::{error, info};

/// What triggered the shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// Ctrl+C or SIGINT
    Interrupt,
    /// SIGTERM
    Terminate,
    /// SIGQUIT
    Quit,
}

/// Sender half owned by the binary, receivers handed to every task
pub fn channel() -> (watch::Sender<bool>, watch::Receiver<bool>) {
    watch::channel(false)
}

/// Resolve on the first termination signal
pub async fn wait_for_signal() -> ShutdownSignal {
    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};

        let mut terminate = match signal(SignalKind::terminate()) {
            Ok(s) => Some(s),
            Err(e) => {
                error!("Failed to register SIGTERM handler: {}", e);
                None
            }
        };
        let mut quit = match signal(SignalKind::quit()) {
            Ok(s) => Some(s),
            Err(e) => {
                error!("Failed to register SIGQUIT handler: {}", e);
                None
            }
        };

        let signal = tokio::select! {
            _ = tokio::signal::ctrl_c() => ShutdownSignal::Interrupt,
            Some(_) = recv(&mut terminate) => ShutdownSignal::Terminate,
            Some(_) = recv(&mut quit) => ShutdownSignal::Quit,
        };
        info!(?signal, "Shutdown signal received");
        signal
    }

    #[cfg(not(unix))]
    {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!("Failed to listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
        info!("Ctrl+C received");
        ShutdownSignal::Interrupt
    }
}

#[cfg(unix)]
async fn recv(signal: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match signal {
        Some(s) => s.recv().await,
        None => std::future::pending().await,
    }
}
