use std::sync::Arc;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::{self, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use super::prober::Probe;
use super::types::ProbeResult;
use crate::config::SiteTarget;

/// Spawns one checking task per site and fans results into a shared channel.
pub struct Scheduler {
    prober: Arc<dyn Probe>,
    result_tx: mpsc::Sender<ProbeResult>,
    shutdown: CancellationToken,
}

impl Scheduler {
    pub fn new(
        prober: Arc<dyn Probe>,
        result_tx: mpsc::Sender<ProbeResult>,
        shutdown: CancellationToken,
    ) -> Self {
        Self { prober, result_tx, shutdown }
    }

    /// Spawn the periodic checking task for one site.
    ///
    /// The first check runs after one full interval. Checks are sequential
    /// per site: a tick that comes due while the previous check is still in
    /// flight is skipped, never queued.
    pub fn spawn_site(&self, site: SiteTarget) -> JoinHandle<()> {
        let prober = self.prober.clone();
        let result_tx = self.result_tx.clone();
        let shutdown = self.shutdown.clone();

        tokio::spawn(async move {
            let interval_seconds = site.effective_interval_seconds();
            if interval_seconds != site.interval_seconds {
                warn!(
                    url = %site.url,
                    configured = site.interval_seconds,
                    effective = interval_seconds,
                    "check interval clamped"
                );
            }

            let period = site.effective_interval();
            let mut timer = time::interval_at(Instant::now() + period, period);
            timer.set_missed_tick_behavior(MissedTickBehavior::Skip);

            loop {
                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    _ = timer.tick() => {}
                }

                let result = tokio::select! {
                    _ = shutdown.cancelled() => break,
                    result = prober.probe(&site) => result,
                };

                if let Some(error) = &result.error {
                    warn!(url = %site.url, error = %error, "probe failed");
                }

                tokio::select! {
                    _ = shutdown.cancelled() => break,
                    sent = result_tx.send(result) => {
                        // The consumer is gone; nothing left to report to.
                        if sent.is_err() {
                            break;
                        }
                    }
                }
            }

            debug!(url = %site.url, "site schedule stopped");
        })
    }

    /// Spawn checking tasks for every configured site.
    pub fn spawn_sites(&self, sites: Vec<SiteTarget>) -> Vec<JoinHandle<()>> {
        sites.into_iter().map(|site| self.spawn_site(site)).collect()
    }
}
