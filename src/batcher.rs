use std::mem;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::database::BatchSink;
use crate::monitoring::ProbeResult;

/// Accumulates probe results into size-bounded batches.
///
/// Exactly one batch is live at a time. `add` appends to it under the lock;
/// `detach` swaps it for a fresh empty one and hands the full batch to the
/// caller, which becomes its sole owner.
pub struct Batcher {
    live: Mutex<Vec<ProbeResult>>,
    batch_size: usize,
}

impl Batcher {
    pub fn new(batch_size: usize) -> Self {
        Self {
            live: Mutex::new(Vec::with_capacity(batch_size)),
            batch_size,
        }
    }

    /// Append one result to the live batch and report its new length.
    pub fn add(&self, result: ProbeResult) -> usize {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        live.push(result);
        live.len()
    }

    /// Swap the live batch for an empty one and take ownership of the old.
    pub fn detach(&self) -> Vec<ProbeResult> {
        let mut live = self.live.lock().unwrap_or_else(PoisonError::into_inner);
        mem::replace(&mut *live, Vec::with_capacity(self.batch_size))
    }

    fn live_len(&self) -> usize {
        self.live.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Receive results until cancelled or the channel closes, flushing a
    /// detached batch to the sink whenever the live batch reaches the
    /// configured size.
    ///
    /// Each flush runs as its own task; write concurrency is bounded by the
    /// sink's connection pool. Results still live at cancellation are
    /// discarded.
    pub async fn run(
        &self,
        shutdown: CancellationToken,
        mut results: mpsc::Receiver<ProbeResult>,
        sink: Arc<dyn BatchSink>,
    ) {
        loop {
            let received = tokio::select! {
                _ = shutdown.cancelled() => {
                    let discarded = self.live_len();
                    if discarded > 0 {
                        info!(discarded, "shutting down, discarding unflushed results");
                    }
                    return;
                }
                received = results.recv() => received,
            };

            let Some(result) = received else {
                // Every scheduler has stopped; nothing more will arrive.
                debug!("result channel closed");
                return;
            };

            debug!(
                url = %result.url,
                duration_ms = result.duration.as_millis() as u64,
                status_code = result.status_code,
                pattern_matched = result.pattern_matched,
                "result received"
            );

            // The length observed here may already overshoot the threshold
            // when other writers append concurrently; the batch is flushed
            // whole either way.
            if self.add(result) >= self.batch_size {
                let batch = self.detach();
                let sink = sink.clone();
                tokio::spawn(async move {
                    let rows = batch.len();
                    if let Err(error) = sink.write_batch(&batch).await {
                        error!(rows, error = %error, "batch write failed, batch dropped");
                    }
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::thread;
    use std::time::Duration;

    use async_trait::async_trait;

    use super::*;

    fn result(url: &str) -> ProbeResult {
        ProbeResult::new(url).completed(Duration::from_millis(25), 200, false)
    }

    #[test]
    fn concurrent_adds_lose_nothing() {
        let batcher = Arc::new(Batcher::new(16));

        let handles: Vec<_> = (0..8)
            .map(|_| {
                let batcher = batcher.clone();
                thread::spawn(move || {
                    for _ in 0..50 {
                        batcher.add(result("http://a.example/"));
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(batcher.detach().len(), 400);
    }

    #[test]
    fn detach_leaves_a_fresh_empty_batch() {
        let batcher = Batcher::new(4);
        batcher.add(result("http://a.example/"));
        batcher.add(result("http://b.example/"));

        let detached = batcher.detach();
        assert_eq!(detached.len(), 2);

        // Later adds start from an empty batch and never land in the
        // detached one.
        assert_eq!(batcher.add(result("http://c.example/")), 1);
        assert_eq!(detached.len(), 2);
        assert_eq!(detached[0].url, "http://a.example/");
    }

    struct RecordingSink {
        batches: mpsc::UnboundedSender<Vec<ProbeResult>>,
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn write_batch(&self, batch: &[ProbeResult]) -> anyhow::Result<usize> {
            let _ = self.batches.send(batch.to_vec());
            Ok(batch.len())
        }
    }

    #[tokio::test]
    async fn flushes_detached_batches_at_threshold() {
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();
        let sink = Arc::new(RecordingSink { batches: batch_tx });
        let batcher = Arc::new(Batcher::new(2));
        let (result_tx, result_rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();

        let loop_handle = tokio::spawn({
            let batcher = batcher.clone();
            let shutdown = shutdown.clone();
            async move { batcher.run(shutdown, result_rx, sink).await }
        });

        for i in 0..5 {
            result_tx
                .send(result(&format!("http://site{i}.example/")))
                .await
                .unwrap();
        }

        let first = batch_rx.recv().await.unwrap();
        let second = batch_rx.recv().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first[0].url, "http://site0.example/");
        assert_eq!(first[1].url, "http://site1.example/");
        assert_eq!(second.len(), 2);

        // The fifth result stays in the live batch.
        tokio::time::timeout(Duration::from_secs(1), async {
            while batcher.live_len() != 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        loop_handle.await.unwrap();
    }

    #[tokio::test]
    async fn cancellation_discards_partial_batch() {
        let (batch_tx, mut batch_rx) = mpsc::unbounded_channel();
        let sink = Arc::new(RecordingSink { batches: batch_tx });
        let batcher = Arc::new(Batcher::new(10));
        let (result_tx, result_rx) = mpsc::channel(1);
        let shutdown = CancellationToken::new();

        let loop_handle = tokio::spawn({
            let batcher = batcher.clone();
            let shutdown = shutdown.clone();
            async move { batcher.run(shutdown, result_rx, sink).await }
        });

        result_tx.send(result("http://a.example/")).await.unwrap();
        tokio::time::timeout(Duration::from_secs(1), async {
            while batcher.live_len() != 1 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();

        shutdown.cancel();
        loop_handle.await.unwrap();

        // Nothing was flushed for the under-threshold batch.
        assert!(batch_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn closed_channel_stops_the_loop() {
        let (batch_tx, _batch_rx) = mpsc::unbounded_channel();
        let sink = Arc::new(RecordingSink { batches: batch_tx });
        let batcher = Batcher::new(10);
        let (result_tx, result_rx) = mpsc::channel::<ProbeResult>(1);
        let shutdown = CancellationToken::new();

        drop(result_tx);
        batcher.run(shutdown, result_rx, sink).await;
    }
}
