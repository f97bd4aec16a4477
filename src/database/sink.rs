use std::time::UNIX_EPOCH;

use anyhow::{Context, Result};
use async_trait::async_trait;
use tracing::error;

use crate::monitoring::ProbeResult;
use crate::pool::ConnectionPool;

const INSERT_RESULT_SQL: &str = "INSERT INTO probe_results \
    (ts_ms, url, duration_ms, status_code, pattern_matched, error) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

/// Destination for detached batches.
#[async_trait]
pub trait BatchSink: Send + Sync {
    /// Persist one batch, returning how many rows were written.
    ///
    /// An error means the whole batch was lost; `Ok` may still be short of
    /// `batch.len()` when individual rows were rejected.
    async fn write_batch(&self, batch: &[ProbeResult]) -> Result<usize>;
}

/// Writes batches to the libsql database, one transaction per batch.
pub struct LibsqlSink {
    pool: ConnectionPool,
}

impl LibsqlSink {
    pub fn new(pool: ConnectionPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl BatchSink for LibsqlSink {
    async fn write_batch(&self, batch: &[ProbeResult]) -> Result<usize> {
        let conn = self.pool.get().await.context("checking out connection")?;

        let tx = conn.transaction().await.context("beginning transaction")?;

        let mut stmt = match tx.prepare(INSERT_RESULT_SQL).await {
            Ok(stmt) => stmt,
            Err(error) => {
                let _ = tx.rollback().await;
                return Err(error).context("preparing insert statement");
            }
        };

        let mut written = 0usize;
        for result in batch {
            let ts_ms = result
                .timestamp
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as i64;

            let row = libsql::params![
                ts_ms,
                result.url.as_str(),
                result.duration.as_millis() as i64,
                result.status_code as i64,
                if result.pattern_matched { 1_i64 } else { 0_i64 },
                result.error.clone().unwrap_or_default(),
            ];

            // A rejected row is logged and skipped; the rest of the batch
            // still commits.
            match stmt.execute(row).await {
                Ok(_) => written += 1,
                Err(error) => {
                    error!(url = %result.url, error = %error, "failed to insert result row");
                }
            }
            stmt.reset();
        }

        tx.commit().await.context("committing batch")?;

        Ok(written)
    }
}
