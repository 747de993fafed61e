//! Sampling and forwarding loops
//!
//! Two independent tasks: one samples statistics at the poll interval and
//! reports a `PollCount` tick, the other forwards the full snapshot at the
//! report interval. Both watch one shutdown channel, and every send holds a
//! rate limiter slot for its whole duration.

use crate::client::Transport;
use crate::limiter::{RateLimiter, SendPermit};
use crate::stats::{StatsSource, POLL_COUNT};
use pulse_core::Metric;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

struct Inner {
    source: Arc<dyn StatsSource>,
    transport: Arc<dyn Transport>,
    limiter: RateLimiter,
}

pub struct Scheduler {
    inner: Arc<Inner>,
    poll_interval: Duration,
    report_interval: Duration,
}

/// Handles of the running loops
pub struct SchedulerHandle {
    poll: JoinHandle<()>,
    report: JoinHandle<()>,
}

impl SchedulerHandle {
    /// Wait for both loops to exit
    pub async fn join(self) {
        if let Err(e) = self.poll.await {
            error!(error = %e, "Poll loop panicked");
        }
        if let Err(e) = self.report.await {
            error!(error = %e, "Report loop panicked");
        }
    }
}

/// Wait for the next tick. `false` means shutdown was requested.
async fn next_tick(ticker: &mut tokio::time::Interval, shutdown: &mut watch::Receiver<bool>) -> bool {
    if *shutdown.borrow() {
        return false;
    }

    tokio::select! {
        biased;
        res = shutdown.changed() => res.is_ok() && !*shutdown.borrow(),
        _ = ticker.tick() => true,
    }
}

impl Inner {
    /// Acquire a send slot unless shutdown comes first
    async fn permit(&self, shutdown: &mut watch::Receiver<bool>) -> Option<SendPermit> {
        tokio::select! {
            biased;
            _ = shutdown.changed() => None,
            permit = self.limiter.acquire() => match permit {
                Ok(permit) => Some(permit),
                Err(e) => {
                    warn!(error = %e, "No send slot");
                    None
                }
            },
        }
    }

    async fn send(&self, what: &str, metrics: &[Metric], shutdown: &mut watch::Receiver<bool>) {
        let Some(_permit) = self.permit(shutdown).await else {
            debug!(what, "Send abandoned");
            return;
        };

        match self.transport.send(metrics).await {
            Ok(()) => debug!(what, count = metrics.len(), "Sent"),
            Err(e) => error!(what, error = %e, "Failed to send metrics"),
        }
    }
}

impl Scheduler {
    pub fn new(
        source: Arc<dyn StatsSource>,
        transport: Arc<dyn Transport>,
        limiter: RateLimiter,
        poll_interval: Duration,
        report_interval: Duration,
    ) -> Self {
        Self {
            inner: Arc::new(Inner {
                source,
                transport,
                limiter,
            }),
            poll_interval,
            report_interval,
        }
    }

    /// Start both loops
    pub fn spawn(self, shutdown: watch::Receiver<bool>) -> SchedulerHandle {
        info!(
            poll_interval = ?self.poll_interval,
            report_interval = ?self.report_interval,
            rate_limit = self.inner.limiter.limit(),
            "Starting scheduler"
        );

        let poll = tokio::spawn(Self::poll_loop(
            self.inner.clone(),
            self.poll_interval,
            shutdown.clone(),
        ));
        let report = tokio::spawn(Self::report_loop(
            self.inner,
            self.report_interval,
            shutdown,
        ));

        SchedulerHandle { poll, report }
    }

    fn ticker(period: Duration) -> tokio::time::Interval {
        // first tick after one full period
        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        ticker
    }

    async fn poll_loop(inner: Arc<Inner>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = Self::ticker(period);
        while next_tick(&mut ticker, &mut shutdown).await {
            inner.source.sample();
            inner
                .send("poll count", &[Metric::counter(POLL_COUNT, 1)], &mut shutdown)
                .await;
        }
        info!("Poll loop stopped");
    }

    async fn report_loop(inner: Arc<Inner>, period: Duration, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = Self::ticker(period);
        while next_tick(&mut ticker, &mut shutdown).await {
            let metrics = inner.source.snapshot();
            inner.send("report", &metrics, &mut shutdown).await;
        }
        info!("Report loop stopped");
    }
}
