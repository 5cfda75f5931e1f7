//! # Batch Processor
//!
//! The single background worker that turns queued write requests into
//! grouped storage writes. It runs on a dedicated thread (hosted by a
//! current-thread Tokio runtime for its timers) and owns the flush cadence.
//!
//! ## Why Batch?
//!
//! SQLite throughput is bounded by commits: each transaction pays for a WAL
//! sync. Grouping many requests into one multi-row statement per collection
//! amortizes that cost:
//!
//! ```text
//! Without batching:                With batching:
//! ┌──────────────────────────┐     ┌────────────────────────────────┐
//! │ req1 → BEGIN → COMMIT    │     │ BEGIN                          │
//! │ req2 → BEGIN → COMMIT    │     │   INSERT .. VALUES (..),(..),..│
//! │ req3 → BEGIN → COMMIT    │     │ COMMIT                         │
//! │ N commits                │     │ 1 commit                       │
//! └──────────────────────────┘     └────────────────────────────────┘
//! ```
//!
//! ## Flush Cycle
//!
//! 1. Drain the priority queue into the in-memory batch.
//! 2. Flush when the batch reaches `max_batch_size`, or `max_batch_wait`
//!    has elapsed with at least one pending item.
//! 3. Group the batch by target collection; each group gets one pooled
//!    connection and one grouped upsert inside one transaction.
//! 4. Invoke every item's callback with its outcome, store outcomes in the
//!    write cache, record one performance sample for the whole flush.
//!
//! A failing group fails only its own items; other groups in the same
//! flush proceed. Nothing a flush does can crash the loop: group errors
//! become failed outcomes, and panics (from callbacks or otherwise) are
//! caught and logged.
//!
//! Request lifecycle: `queued → in-flight → {persisted | failed}`. The
//! engine never retries; callers resubmit with an incremented `attempt`.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::time::{Duration, Instant};

use rusqlite::types::Value;
use tokio::time::timeout;
use tracing::{debug, error, warn};

use crate::cache::WriteCache;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::metrics::MetricsRecorder;
use crate::pool::ConnectionPool;
use crate::queue::BatchQueue;
use crate::types::{
    current_time_ms, Collection, PayloadHash, PerformanceSample, WriteOutcome, WriteRequest,
};

// Columns per row in the grouped upsert. SQLite bounds host parameters per
// statement (999 in older builds), so large groups are chunked.
const COLUMNS_PER_ROW: usize = 5;
const MAX_ROWS_PER_STATEMENT: usize = 150;

// =============================================================================
// Batch Processor
// =============================================================================

/// Drains the queue and executes grouped flushes.
pub(crate) struct BatchProcessor {
    pool: Arc<ConnectionPool>,
    cache: Arc<WriteCache>,
    queue: Arc<BatchQueue>,
    metrics: Arc<MetricsRecorder>,
    config: EngineConfig,
}

/// One row of a grouped upsert, precomputed before touching the store.
struct PendingRow {
    hash: PayloadHash,
    json: String,
    attempt: u32,
}

impl BatchProcessor {
    pub(crate) fn new(
        pool: Arc<ConnectionPool>,
        cache: Arc<WriteCache>,
        queue: Arc<BatchQueue>,
        metrics: Arc<MetricsRecorder>,
        config: EngineConfig,
    ) -> Self {
        Self {
            pool,
            cache,
            queue,
            metrics,
            config,
        }
    }

    /// The worker loop. Runs until the queue is closed and fully drained.
    pub(crate) async fn run(self) {
        let max_batch = self.config.batch.max_batch_size;
        let max_wait = self.config.batch.max_batch_wait;
        let sweep_interval = self.config.cache.sweep_interval;

        let mut batch: Vec<WriteRequest> = Vec::with_capacity(max_batch);
        let mut batch_started: Option<Instant> = None;
        let mut last_sweep = Instant::now();

        debug!("batch processor started");

        loop {
            if batch.len() < max_batch {
                let want = max_batch - batch.len();
                let moved = self.queue.drain_into(&mut batch, want);
                if moved > 0 && batch_started.is_none() {
                    batch_started = Some(Instant::now());
                }
            }

            let deadline_reached = batch_started.is_some_and(|t| t.elapsed() >= max_wait);
            if batch.len() >= max_batch || (!batch.is_empty() && deadline_reached) {
                self.flush_guarded(std::mem::take(&mut batch));
                batch_started = None;
                continue;
            }

            if self.queue.is_closed() {
                // Shutdown: flush whatever is pending without waiting out
                // the deadline, then keep draining until empty.
                if !batch.is_empty() {
                    self.flush_guarded(std::mem::take(&mut batch));
                    batch_started = None;
                }
                if self.queue.is_empty() {
                    break;
                }
                continue;
            }

            if last_sweep.elapsed() >= sweep_interval {
                self.cache.sweep_expired();
                last_sweep = Instant::now();
            }

            let wait = match batch_started {
                Some(started) => max_wait.saturating_sub(started.elapsed()),
                None => sweep_interval.saturating_sub(last_sweep.elapsed()),
            }
            .max(Duration::from_millis(1));

            // Woken early by a push or close; the timeout enforces the
            // flush deadline and the sweep cadence.
            let _ = timeout(wait, self.queue.wait()).await;
        }

        debug!("batch processor stopped");
    }

    /// Runs one flush, absorbing panics so the loop survives.
    fn flush_guarded(&self, batch: Vec<WriteRequest>) {
        let result = catch_unwind(AssertUnwindSafe(|| self.flush(batch)));
        if result.is_err() {
            error!("flush panicked; continuing with next cycle");
        }
    }

    /// Flushes one batch: group by collection, execute each group, record
    /// the sample, then deliver outcomes.
    ///
    /// The sample is recorded and outcomes are cached before any callback
    /// runs, so a caller observing its callback sees the flush already
    /// reflected in `metrics()` and in the cache.
    fn flush(&self, batch: Vec<WriteRequest>) {
        let flush_start = Instant::now();
        let item_count = batch.len();
        let mut success_count = 0usize;
        let mut failure_count = 0usize;

        let mut groups: HashMap<Collection, Vec<WriteRequest>> = HashMap::new();
        for request in batch {
            groups
                .entry(request.collection.clone())
                .or_default()
                .push(request);
        }

        let mut executed: Vec<(Vec<WriteRequest>, Result<()>, Duration)> =
            Vec::with_capacity(groups.len());
        for (collection, requests) in groups {
            let group_start = Instant::now();
            let result = self.execute_group(&collection, &requests);
            let elapsed = group_start.elapsed();

            match &result {
                Ok(()) => success_count += requests.len(),
                Err(e) => {
                    failure_count += requests.len();
                    warn!(
                        collection = collection.as_str(),
                        items = requests.len(),
                        error = %e,
                        "flush group failed"
                    );
                }
            }
            executed.push((requests, result, elapsed));
        }

        self.metrics.record(PerformanceSample {
            duration: flush_start.elapsed(),
            item_count,
            success_count,
            failure_count,
        });

        for (requests, result, elapsed) in executed {
            for mut request in requests {
                let hash = PayloadHash::of(&request.payload);
                let outcome = match &result {
                    Ok(()) => WriteOutcome::success(hash, elapsed, request.attempt),
                    Err(e) => WriteOutcome::failure(e.to_string(), elapsed, request.attempt),
                };

                self.cache.put(hash, outcome.clone());

                if let Some(callback) = request.callback.take() {
                    if catch_unwind(AssertUnwindSafe(|| callback(&outcome))).is_err() {
                        warn!("write callback panicked");
                    }
                }
            }
        }
    }

    /// Executes one collection group: acquire a connection, ensure the
    /// table, run the grouped upsert in one transaction.
    fn execute_group(&self, collection: &Collection, requests: &[WriteRequest]) -> Result<()> {
        if !collection.is_valid_identifier() {
            return Err(Error::InvalidCollection(collection.as_str().to_string()));
        }

        let rows = requests
            .iter()
            .map(|request| {
                let json = serde_json::to_string(&request.payload).map_err(|e| {
                    Error::BatchExecutionFailed {
                        collection: collection.as_str().to_string(),
                        reason: format!("payload serialization failed: {e}"),
                    }
                })?;
                Ok(PendingRow {
                    hash: PayloadHash::of(&request.payload),
                    json,
                    attempt: request.attempt,
                })
            })
            .collect::<Result<Vec<_>>>()?;

        let conn = self.pool.acquire(self.config.pool.acquire_timeout)?;

        conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS \"{collection}\" (
                payload_hash TEXT PRIMARY KEY,
                payload      TEXT NOT NULL,
                attempt      INTEGER NOT NULL DEFAULT 0,
                created_ms   INTEGER NOT NULL,
                updated_ms   INTEGER NOT NULL
            )"
        ))
        .map_err(|e| Error::BatchExecutionFailed {
            collection: collection.as_str().to_string(),
            reason: e.to_string(),
        })?;

        // Raw SQL transaction management: the guard derefs to &Connection,
        // and rusqlite's Transaction type needs &mut.
        conn.execute("BEGIN IMMEDIATE", [])
            .map_err(|e| Error::BatchExecutionFailed {
                collection: collection.as_str().to_string(),
                reason: e.to_string(),
            })?;

        match self.insert_rows(&conn, collection, &rows) {
            Ok(()) => {
                conn.execute("COMMIT", [])
                    .map_err(|e| Error::BatchExecutionFailed {
                        collection: collection.as_str().to_string(),
                        reason: e.to_string(),
                    })?;
                Ok(())
            }
            Err(e) => {
                let _ = conn.execute("ROLLBACK", []);
                Err(Error::BatchExecutionFailed {
                    collection: collection.as_str().to_string(),
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Runs the grouped multi-row upsert, chunked to respect SQLite's host
    /// parameter limit.
    fn insert_rows(
        &self,
        conn: &rusqlite::Connection,
        collection: &Collection,
        rows: &[PendingRow],
    ) -> rusqlite::Result<()> {
        let now_ms = current_time_ms() as i64;

        for chunk in rows.chunks(MAX_ROWS_PER_STATEMENT) {
            let placeholders = vec!["(?, ?, ?, ?, ?)"; chunk.len()].join(", ");
            let sql = format!(
                "INSERT INTO \"{collection}\" \
                 (payload_hash, payload, attempt, created_ms, updated_ms) \
                 VALUES {placeholders} \
                 ON CONFLICT(payload_hash) DO UPDATE SET \
                 payload = excluded.payload, \
                 attempt = excluded.attempt, \
                 updated_ms = excluded.updated_ms"
            );

            let mut values: Vec<Value> = Vec::with_capacity(chunk.len() * COLUMNS_PER_ROW);
            for row in chunk {
                values.push(Value::Text(row.hash.to_string()));
                values.push(Value::Text(row.json.clone()));
                values.push(Value::Integer(i64::from(row.attempt)));
                values.push(Value::Integer(now_ms));
                values.push(Value::Integer(now_ms));
            }

            conn.execute(&sql, rusqlite::params_from_iter(values))?;
        }

        Ok(())
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::PoolConfig;
    use crate::types::{FieldValue, Payload};

    fn payload(pairs: &[(&str, FieldValue)]) -> Payload {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.clone()))
            .collect()
    }

    fn test_processor(dir: &tempfile::TempDir) -> BatchProcessor {
        let config = EngineConfig {
            pool: PoolConfig {
                min_connections: 1,
                max_connections: 2,
                acquire_timeout: Duration::from_secs(1),
            },
            ..EngineConfig::default()
        };
        let pool =
            Arc::new(ConnectionPool::open(dir.path().join("proc.db"), config.pool.clone()).unwrap());
        BatchProcessor::new(
            pool,
            Arc::new(WriteCache::new(config.cache.clone())),
            Arc::new(BatchQueue::new()),
            Arc::new(MetricsRecorder::new(config.metrics_ring_capacity)),
            config,
        )
    }

    fn row_count(processor: &BatchProcessor, table: &str) -> i64 {
        let conn = processor.pool.acquire(Duration::from_secs(1)).unwrap();
        conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
            row.get(0)
        })
        .unwrap()
    }

    #[test]
    fn test_execute_group_creates_table_and_inserts() {
        let dir = tempfile::TempDir::new().unwrap();
        let processor = test_processor(&dir);

        let requests = vec![
            WriteRequest::new("events", payload(&[("a", FieldValue::Integer(1))])),
            WriteRequest::new("events", payload(&[("a", FieldValue::Integer(2))])),
        ];
        processor
            .execute_group(&Collection::new("events"), &requests)
            .unwrap();

        assert_eq!(row_count(&processor, "events"), 2);
    }

    #[test]
    fn test_execute_group_upserts_identical_payloads() {
        let dir = tempfile::TempDir::new().unwrap();
        let processor = test_processor(&dir);

        let requests = vec![WriteRequest::new(
            "events",
            payload(&[("a", FieldValue::Integer(1))]),
        )];
        let collection = Collection::new("events");
        processor.execute_group(&collection, &requests).unwrap();
        processor.execute_group(&collection, &requests).unwrap();

        // Same payload hash upserts onto the same row.
        assert_eq!(row_count(&processor, "events"), 1);
    }

    #[test]
    fn test_execute_group_rejects_invalid_collection() {
        let dir = tempfile::TempDir::new().unwrap();
        let processor = test_processor(&dir);

        let requests = vec![WriteRequest::new(
            "bad name!",
            payload(&[("a", FieldValue::Integer(1))]),
        )];
        let err = processor
            .execute_group(&Collection::new("bad name!"), &requests)
            .unwrap_err();
        assert!(matches!(err, Error::InvalidCollection(_)));
    }

    #[test]
    fn test_flush_partial_failure_isolates_groups() {
        let dir = tempfile::TempDir::new().unwrap();
        let processor = test_processor(&dir);

        let batch = vec![
            WriteRequest::new("events", payload(&[("a", FieldValue::Integer(1))])),
            WriteRequest::new("events", payload(&[("a", FieldValue::Integer(2))])),
            WriteRequest::new("bad name!", payload(&[("a", FieldValue::Integer(3))])),
        ];
        processor.flush(batch);

        assert_eq!(row_count(&processor, "events"), 2);

        let metrics = processor.metrics.snapshot(0, 0, processor.cache.stats());
        assert_eq!(metrics.successful_writes, 2);
        assert_eq!(metrics.failed_writes, 1);
    }

    #[test]
    fn test_flush_stores_outcomes_in_cache() {
        let dir = tempfile::TempDir::new().unwrap();
        let processor = test_processor(&dir);

        let p = payload(&[("a", FieldValue::Integer(1))]);
        let hash = PayloadHash::of(&p);
        processor.flush(vec![WriteRequest::new("events", p)]);

        let cached = processor.cache.get(hash).expect("outcome cached");
        assert!(cached.success);
        assert_eq!(cached.record_id.as_deref(), Some(hash.to_string().as_str()));
    }

    #[test]
    fn test_flush_survives_panicking_callback() {
        let dir = tempfile::TempDir::new().unwrap();
        let processor = test_processor(&dir);

        let request = WriteRequest::new("events", payload(&[("a", FieldValue::Integer(1))]))
            .with_callback(Box::new(|_| panic!("callback bug")));
        processor.flush_guarded(vec![request]);

        // The row landed and metrics recorded despite the panic.
        assert_eq!(row_count(&processor, "events"), 1);
        let metrics = processor.metrics.snapshot(0, 0, processor.cache.stats());
        assert_eq!(metrics.successful_writes, 1);
    }

    #[test]
    fn test_large_group_chunks_statements() {
        let dir = tempfile::TempDir::new().unwrap();
        let processor = test_processor(&dir);

        let requests: Vec<WriteRequest> = (0..(MAX_ROWS_PER_STATEMENT + 20) as i64)
            .map(|i| WriteRequest::new("events", payload(&[("i", FieldValue::Integer(i))])))
            .collect();
        processor
            .execute_group(&Collection::new("events"), &requests)
            .unwrap();

        assert_eq!(
            row_count(&processor, "events"),
            (MAX_ROWS_PER_STATEMENT + 20) as i64
        );
    }
}
