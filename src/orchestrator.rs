use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::batcher::Batcher;
use crate::config::{BatcherConfig, Config, SiteTarget};
use crate::database::{self, BatchSink, LibsqlSink};
use crate::monitoring::{HttpProber, Probe, ProbeResult, Scheduler};
use crate::pool::ConnectionPool;

/// Coordinates the pipeline: site schedules feeding the shared result
/// channel, the batching loop, and shutdown.
pub struct Orchestrator;

impl Orchestrator {
    /// Initialize persistence and run the pipeline until cancelled.
    ///
    /// Errors raised here happen before any scheduling begins and are fatal.
    pub async fn start(
        config: Config,
        pool: ConnectionPool,
        shutdown: CancellationToken,
    ) -> Result<()> {
        let conn = pool.get().await.context("connecting to database")?;
        database::initialize_database(&conn)
            .await
            .context("initializing database schema")?;
        drop(conn);

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http.timeout_seconds))
            .build()
            .context("building http client")?;
        let prober: Arc<dyn Probe> = Arc::new(HttpProber::new(client));
        let sink: Arc<dyn BatchSink> = Arc::new(LibsqlSink::new(pool));

        info!(
            sites = config.sites.len(),
            batch_size = config.batcher.batch_size,
            "starting monitoring pipeline"
        );

        Self::run(config.sites, config.batcher, prober, sink, shutdown).await;

        info!("shutdown complete");
        Ok(())
    }

    /// Wire schedulers, the result channel, and the batching loop; return
    /// once everything has stopped.
    async fn run(
        sites: Vec<SiteTarget>,
        batcher_config: BatcherConfig,
        prober: Arc<dyn Probe>,
        sink: Arc<dyn BatchSink>,
        shutdown: CancellationToken,
    ) {
        // Capacity of one: a producer is never more than one result ahead of
        // the batching loop, which throttles probing to consumer speed.
        let (result_tx, result_rx) = mpsc::channel::<ProbeResult>(1);

        let scheduler = Scheduler::new(prober, result_tx, shutdown.clone());
        let handles = scheduler.spawn_sites(sites);
        // The site tasks now hold the only senders; once the last one stops
        // the channel closes and the batching loop drains out.
        drop(scheduler);

        let batcher = Batcher::new(batcher_config.batch_size);
        batcher.run(shutdown, result_rx, sink).await;

        for handle in handles {
            let _ = handle.await;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use async_trait::async_trait;

    use super::*;

    struct StaticProbe;

    #[async_trait]
    impl Probe for StaticProbe {
        async fn probe(&self, site: &SiteTarget) -> ProbeResult {
            ProbeResult::new(&site.url).completed(Duration::from_millis(10), 200, false)
        }
    }

    struct CountingSink {
        batches: AtomicUsize,
        rows: AtomicUsize,
    }

    #[async_trait]
    impl BatchSink for CountingSink {
        async fn write_batch(&self, batch: &[ProbeResult]) -> Result<usize> {
            self.batches.fetch_add(1, Ordering::SeqCst);
            self.rows.fetch_add(batch.len(), Ordering::SeqCst);
            Ok(batch.len())
        }
    }

    fn site(url: &str) -> SiteTarget {
        SiteTarget {
            url: url.to_string(),
            pattern: None,
            interval_seconds: 5,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn pipeline_flushes_batches_and_stops_on_cancel() {
        let sink = Arc::new(CountingSink {
            batches: AtomicUsize::new(0),
            rows: AtomicUsize::new(0),
        });
        let shutdown = CancellationToken::new();

        let run = tokio::spawn(Orchestrator::run(
            vec![site("http://a.example/"), site("http://b.example/")],
            BatcherConfig { batch_size: 4 },
            Arc::new(StaticProbe),
            sink.clone(),
            shutdown.clone(),
        ));

        // Two sites ticking every 5s fill a batch of four within two ticks.
        tokio::time::sleep(Duration::from_secs(11)).await;

        tokio::time::timeout(Duration::from_secs(5), async {
            while sink.batches.load(Ordering::SeqCst) == 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        run.await.unwrap();

        assert!(sink.batches.load(Ordering::SeqCst) >= 1);
        assert_eq!(sink.rows.load(Ordering::SeqCst) % 4, 0);
    }

    #[tokio::test]
    async fn cancelled_pipeline_returns_without_writes() {
        let sink = Arc::new(CountingSink {
            batches: AtomicUsize::new(0),
            rows: AtomicUsize::new(0),
        });
        let shutdown = CancellationToken::new();
        shutdown.cancel();

        Orchestrator::run(
            vec![site("http://a.example/")],
            BatcherConfig { batch_size: 4 },
            Arc::new(StaticProbe),
            sink.clone(),
            shutdown,
        )
        .await;

        assert_eq!(sink.batches.load(Ordering::SeqCst), 0);
    }
}
