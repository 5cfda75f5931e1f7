//! # Write Engine Facade
//!
//! The public entry point. A [`WriteEngine`] owns the pool, cache, queue,
//! metrics recorder, optimizer, and the background worker thread, and
//! exposes the five public operations: `write`, `write_batch`, `metrics`,
//! `recommendations`, `shutdown`.
//!
//! ## Contract
//!
//! - `write` returning `true` means *accepted for asynchronous processing*,
//!   not persisted. Persistence (or failure) is delivered through the
//!   request's callback after the flush. On a cache hit the cached outcome
//!   is replayed synchronously and nothing is enqueued.
//! - Producers never block on storage I/O: `write` touches only the
//!   in-memory cache and queue.
//! - Storage errors never surface synchronously. The only synchronous
//!   failure is `Error::InvalidConfig` from [`WriteEngine::open`].
//!
//! ## Example
//!
//! ```rust,no_run
//! use floodgate::{EngineConfig, FieldValue, Payload, WriteEngine};
//!
//! fn main() -> floodgate::Result<()> {
//!     let engine = WriteEngine::open("ingest.db", EngineConfig::default())?;
//!
//!     let mut payload = Payload::new();
//!     payload.insert("draw_id".to_string(), FieldValue::from("2024120101"));
//!     payload.insert("source".to_string(), FieldValue::from("api"));
//!
//!     let accepted = engine.write(payload, "draws", 5, None);
//!     assert!(accepted);
//!
//!     println!("{}", serde_json::to_string(&engine.metrics()).unwrap());
//!     engine.shutdown(true);
//!     Ok(())
//! }
//! ```

use std::path::Path;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;
use std::time::Duration;

use tracing::{debug, warn};

use crate::cache::WriteCache;
use crate::config::EngineConfig;
use crate::error::{Error, Result};
use crate::metrics::{MetricsRecorder, PerformanceMetrics};
use crate::optimizer::{OptimizationReport, Optimizer};
use crate::pool::ConnectionPool;
use crate::processor::BatchProcessor;
use crate::queue::BatchQueue;
use crate::types::{Collection, Payload, PayloadHash, WriteCallback, WriteOutcome, WriteRequest};

// =============================================================================
// Worker Handle
// =============================================================================

/// The background worker thread plus its completion signal.
///
/// The sender half lives on the worker thread; when the thread finishes,
/// the channel disconnects, so `recv_timeout` doubles as a bounded join.
struct WorkerHandle {
    thread: JoinHandle<()>,
    done_rx: mpsc::Receiver<()>,
}

// =============================================================================
// Write Engine
// =============================================================================

/// Buffered write engine over an embedded SQLite store.
///
/// All methods take `&self`; share the engine across producer threads with
/// an `Arc`.
pub struct WriteEngine {
    pool: Arc<ConnectionPool>,
    cache: Arc<WriteCache>,
    queue: Arc<BatchQueue>,
    metrics: Arc<MetricsRecorder>,
    optimizer: Optimizer,
    shutdown_timeout: Duration,
    worker: Mutex<Option<WorkerHandle>>,
}

impl std::fmt::Debug for WriteEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteEngine")
            .field("shutdown_timeout", &self.shutdown_timeout)
            .finish_non_exhaustive()
    }
}

impl WriteEngine {
    /// Opens the engine against the database at `path`.
    ///
    /// Validates the configuration, pre-warms the connection pool, and
    /// starts the background worker.
    ///
    /// # Errors
    ///
    /// - `Error::InvalidConfig` for programmer errors in `config`
    /// - `Error::ConnectionCreateFailed` if the store is unreachable
    pub fn open(path: impl AsRef<Path>, config: EngineConfig) -> Result<Self> {
        config.validate()?;

        let pool = Arc::new(ConnectionPool::open(path, config.pool.clone())?);
        let cache = Arc::new(WriteCache::new(config.cache.clone()));
        let queue = Arc::new(BatchQueue::new());
        let metrics = Arc::new(MetricsRecorder::new(config.metrics_ring_capacity));
        let optimizer = Optimizer::new(config.optimizer.clone(), config.pool.max_connections);
        let shutdown_timeout = config.shutdown_timeout;

        let processor = BatchProcessor::new(
            Arc::clone(&pool),
            Arc::clone(&cache),
            Arc::clone(&queue),
            Arc::clone(&metrics),
            config,
        );

        let (done_tx, done_rx) = mpsc::channel();
        let thread = std::thread::Builder::new()
            .name("floodgate-flush".to_string())
            .spawn(move || {
                let rt = tokio::runtime::Builder::new_current_thread()
                    .enable_time()
                    .build()
                    .expect("failed to build flush runtime");
                rt.block_on(processor.run());
                let _ = done_tx.send(());
            })
            .map_err(|e| Error::Worker(format!("failed to spawn flush thread: {e}")))?;

        debug!("write engine started");

        Ok(Self {
            pool,
            cache,
            queue,
            metrics,
            optimizer,
            shutdown_timeout,
            worker: Mutex::new(Some(WorkerHandle { thread, done_rx })),
        })
    }

    /// Submits a fully-built request. The fundamental write operation;
    /// `write` and `write_batch` are conveniences over it.
    ///
    /// Returns `true` once the request is accepted: either replayed from
    /// the cache (callback fired synchronously) or enqueued for the next
    /// flush. Returns `false` only after shutdown, in which case the
    /// callback is still invoked, with a failed outcome.
    pub fn submit(&self, mut request: WriteRequest) -> bool {
        if self.queue.is_closed() {
            return Self::reject(request);
        }

        let hash = PayloadHash::of(&request.payload);
        if let Some(outcome) = self.cache.get(hash) {
            if let Some(callback) = request.callback.take() {
                callback(&outcome);
            }
            return true;
        }

        match self.queue.push(request) {
            Ok(()) => true,
            Err(rejected) => Self::reject(rejected),
        }
    }

    fn reject(mut request: WriteRequest) -> bool {
        if let Some(callback) = request.callback.take() {
            let outcome = WriteOutcome::failure(
                Error::EngineClosed.to_string(),
                Duration::ZERO,
                request.attempt,
            );
            callback(&outcome);
        }
        false
    }

    /// Accepts one payload for asynchronous persistence into `collection`.
    ///
    /// On a cache hit the previous outcome for this exact payload is
    /// replayed synchronously through `callback` and nothing is enqueued.
    pub fn write(
        &self,
        payload: Payload,
        collection: impl Into<Collection>,
        priority: u8,
        callback: Option<WriteCallback>,
    ) -> bool {
        let mut request = WriteRequest::new(collection, payload).with_priority(priority);
        request.callback = callback;
        self.submit(request)
    }

    /// Accepts many payloads for the same collection and priority.
    ///
    /// Returns one acceptance flag per payload, in order.
    pub fn write_batch(
        &self,
        payloads: Vec<Payload>,
        collection: impl Into<Collection>,
        priority: u8,
    ) -> Vec<bool> {
        let collection = collection.into();
        payloads
            .into_iter()
            .map(|payload| self.write(payload, collection.clone(), priority, None))
            .collect()
    }

    /// A consistent point-in-time snapshot of engine performance.
    pub fn metrics(&self) -> PerformanceMetrics {
        self.metrics.snapshot(
            self.queue.len(),
            self.pool.live_connections(),
            self.cache.stats(),
        )
    }

    /// Tuning recommendations and the optimization score for the current
    /// metrics snapshot. Advisory only.
    pub fn recommendations(&self) -> OptimizationReport {
        self.optimizer.analyze(&self.metrics())
    }

    /// Stops accepting writes, optionally drains, then closes the pool.
    ///
    /// With `drain = true` the call blocks until the queue empties and the
    /// worker exits, bounded by the configured `shutdown_timeout`. The
    /// worker flushes every remaining request either way, so each accepted
    /// request still gets its callback. Idempotent: repeat calls are no-ops.
    pub fn shutdown(&self, drain: bool) {
        let handle = self
            .worker
            .lock()
            .expect("engine worker mutex poisoned")
            .take();

        self.queue.close();

        if let Some(handle) = handle {
            if drain {
                match handle.done_rx.recv_timeout(self.shutdown_timeout) {
                    Ok(()) | Err(RecvTimeoutError::Disconnected) => {
                        let _ = handle.thread.join();
                    }
                    Err(RecvTimeoutError::Timeout) => {
                        warn!(
                            timeout = ?self.shutdown_timeout,
                            "shutdown timed out waiting for drain; detaching worker"
                        );
                    }
                }
            }
            // drain = false: the worker still drains the closed queue on
            // its own; we just don't wait for it.
        }

        self.pool.close_all();
        debug!("write engine stopped");
    }
}

// =============================================================================
// Tests
// =============================================================================
