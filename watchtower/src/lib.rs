//! `RegionMonitor` probes a remote region's health endpoint on a fixed interval
//! and publishes the region's liveness on a watch channel.
//!
//! A region is considered down only after a configurable number of consecutive
//! failed probes; a single successful probe restores it. The monitor stops
//! probing when it is dropped.

mod probe;
mod stats;

pub use probe::{HealthCheck, HttpHealthChecker};

use log::{debug, info, warn};
use stats::MonitorStats;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, timeout};
use tokio_util::sync::CancellationToken;

/// Configuration for a region monitor
#[derive(Debug, Clone)]
pub struct RegionMonitorOptions {
    /// How often to probe the region's health endpoint
    pub probe_interval: Duration,
    /// How many consecutive failed probes before the region is reported down
    pub failure_threshold: u32,
    /// How long to wait before the first probe
    pub initial_delay: Duration,
}

impl Default for RegionMonitorOptions {
    fn default() -> Self {
        Self {
            probe_interval: Duration::from_secs(5),
            failure_threshold: 3,
            initial_delay: Duration::ZERO,
        }
    }
}

/// Monitors one region's health endpoint and reports liveness transitions.
#[derive(Debug)]
pub struct RegionMonitor {
    /// Region name, used for logging only
    region: String,
    /// Cancellation token to stop the probe loop
    shutdown_token: CancellationToken,
    /// Probe statistics
    stats: Arc<MonitorStats>,
    /// Sender half of the liveness channel
    health_tx: watch::Sender<bool>,
    /// Receiver kept so `is_healthy` works without a subscription
    health_rx: watch::Receiver<bool>,
}

impl RegionMonitor {
    /// Starts probing a region with default options.
    ///
    /// The region starts out healthy; it is only reported down after
    /// `failure_threshold` consecutive probe failures.
    pub fn start<H: HealthCheck>(region: impl Into<String>, checker: H) -> Self {
        Self::start_with_opt(region, checker, RegionMonitorOptions::default())
    }

    /// Starts probing a region with custom options.
    pub fn start_with_opt<H: HealthCheck>(
        region: impl Into<String>,
        checker: H,
        opt: RegionMonitorOptions,
    ) -> Self {
        let (health_tx, health_rx) = watch::channel(true);
        let mut monitor = Self {
            region: region.into(),
            shutdown_token: CancellationToken::new(),
            stats: Arc::new(MonitorStats::default()),
            health_tx,
            health_rx,
        };
        monitor.spawn(checker, opt);
        monitor
    }

    fn spawn<H: HealthCheck>(&mut self, checker: H, opt: RegionMonitorOptions) {
        let region = self.region.clone();
        let shutdown_token = self.shutdown_token.clone();
        let stats = Arc::clone(&self.stats);
        let health_tx = self.health_tx.clone();

        tokio::spawn(async move {
            tokio::time::sleep(opt.initial_delay).await;
            info!(
                "Starting health probes for region '{}' every {:?} (threshold: {})",
                region, opt.probe_interval, opt.failure_threshold
            );

            let mut probe_interval = interval(opt.probe_interval);
            let mut consecutive_failures = 0u32;

            loop {
                tokio::select! {
                    _ = shutdown_token.cancelled() => {
                        info!("Region monitor for '{}' shutting down", region);
                        break;
                    }
                    _ = probe_interval.tick() => {
                        stats.increment_probes();
                    }
                }

                match checker.check_health().await {
                    Ok(_) => {
                        if consecutive_failures >= opt.failure_threshold {
                            info!(
                                "Region '{}' recovered after {} failed probes",
                                region, consecutive_failures
                            );
                            stats.increment_transitions();
                        }
                        consecutive_failures = 0;
                        send_health(&health_tx, &region, true);
                    }
                    Err(e) => {
                        stats.increment_failed_probes();
                        consecutive_failures += 1;
                        warn!(
                            "Health probe for region '{}' failed: {} (consecutive failures: {})",
                            region, e, consecutive_failures
                        );
                        if consecutive_failures == opt.failure_threshold {
                            warn!(
                                "Region '{}' is down after {} consecutive failed probes",
                                region, consecutive_failures
                            );
                            stats.increment_transitions();
                        }
                        if consecutive_failures >= opt.failure_threshold {
                            send_health(&health_tx, &region, false);
                        }
                    }
                }
            }
        });
    }

    /// The name of the monitored region.
    pub fn region(&self) -> &str {
        &self.region
    }

    /// Whether the region is currently considered healthy.
    pub fn is_healthy(&self) -> bool {
        *self.health_rx.borrow()
    }

    /// Subscribe to liveness changes of this region.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.health_tx.subscribe()
    }

    /// Wait until the region becomes healthy or the timeout elapses.
    pub async fn wait_for_healthy(
        &self,
        wait_timeout: Duration,
    ) -> Result<(), tokio::time::error::Elapsed> {
        let mut receiver = self.health_rx.clone();
        timeout(wait_timeout, async move {
            loop {
                if *receiver.borrow_and_update() {
                    return;
                }
                if receiver.changed().await.is_err() {
                    return;
                }
            }
        })
        .await
    }

    /// Total number of probes performed.
    pub fn probes(&self) -> usize {
        self.stats.probes()
    }

    /// Total number of failed probes.
    pub fn failed_probes(&self) -> usize {
        self.stats.failed_probes()
    }

    /// Number of up/down transitions observed.
    pub fn transitions(&self) -> usize {
        self.stats.transitions()
    }
}

impl Drop for RegionMonitor {
    fn drop(&mut self) {
        debug!("Region monitor for '{}' dropping", self.region);
        self.shutdown_token.cancel();
    }
}

fn send_health(tx: &watch::Sender<bool>, region: &str, healthy: bool) {
    // send_if_modified avoids waking subscribers on every probe
    let changed = tx.send_if_modified(|current| {
        if *current != healthy {
            *current = healthy;
            true
        } else {
            false
        }
    });
    if changed {
        debug!("Region '{}' liveness changed to {}", region, healthy);
    }
}
