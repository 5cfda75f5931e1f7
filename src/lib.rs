//! # Floodgate - Buffered Write Engine
//!
//! Floodgate accepts a continuous stream of write requests, deduplicates
//! them through a short-lived content-addressed cache, groups them into
//! priority-ordered batches, and flushes the batches through a bounded pool
//! of SQLite connections, while tracking rolling performance metrics and
//! emitting tuning recommendations.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                     Producers (any thread)                      │
//! │                  write / write_batch / submit                   │
//! └───────────────┬─────────────────────────────┬───────────────────┘
//!                 │ cache hit: replay outcome   │ miss: enqueue
//!                 ▼                             ▼
//!        ┌─────────────────┐          ┌──────────────────────┐
//!        │   WriteCache    │          │      BatchQueue      │
//!        │ (TTL + LRU by   │          │ (priority desc,      │
//!        │  content hash)  │          │  arrival asc)        │
//!        └─────────────────┘          └──────────┬───────────┘
//!                 ▲                              │
//!                 │ store outcomes              ▼
//!        ┌────────┴──────────────────────────────────────────┐
//!        │              BatchProcessor (1 thread)            │
//!        │   accumulate → group by collection → flush each   │
//!        │   group through one pooled connection             │
//!        └────────┬─────────────────────────────┬────────────┘
//!                 │                             │
//!                 ▼                             ▼
//!        ┌─────────────────┐          ┌──────────────────────┐
//!        │ MetricsRecorder │          │    ConnectionPool    │
//!        │  → Optimizer    │          │  (bounded, RAII)     │
//!        └─────────────────┘          └──────────┬───────────┘
//!                                                ▼
//!                                        ┌─────────────┐
//!                                        │   SQLite    │
//!                                        │    (WAL)    │
//!                                        └─────────────┘
//! ```
//!
//! ## Core Invariants
//!
//! 1. **Bounded borrows**: the pool never lends more connections than its
//!    configured maximum.
//! 2. **At-most-once flush**: a request is flushed once; retries are the
//!    caller's, carried in the `attempt` count and made idempotent by the
//!    payload-hash upsert key.
//! 3. **TTL honesty**: a cache entry past its TTL is never returned as a
//!    hit.
//! 4. **Exactly-once callback**: every accepted request triggers its
//!    callback exactly once, from the cache replay or from the flush.
//! 5. **Non-blocking producers**: `write` never touches storage; all
//!    storage failure arrives asynchronously through callbacks.
//!
//! ## Module Organization
//!
//! - [`config`]: the engine's entire tuning surface, validated up front
//! - [`error`]: the crate-wide error enum
//! - [`types`]: payloads, hashes, requests, outcomes
//! - [`pool`]: bounded connection pool with RAII guards
//! - [`cache`]: TTL + byte-budget LRU of write outcomes
//! - [`queue`]: priority intake queue
//! - [`metrics`]: rolling performance statistics
//! - [`optimizer`]: advisory tuning rules and score
//! - [`engine`]: the public facade

pub mod cache;
pub mod config;
pub mod engine;
pub mod error;
pub mod metrics;
pub mod optimizer;
pub mod pool;
pub mod queue;
pub mod types;

mod processor;

pub use cache::{CacheStats, WriteCache};
pub use config::{BatchConfig, CacheConfig, EngineConfig, OptimizerConfig, PoolConfig};
pub use engine::WriteEngine;
pub use error::{Error, Result};
pub use metrics::{MetricsRecorder, PerformanceMetrics};
pub use optimizer::{OptimizationReport, Optimizer, Recommendation, TuningRule};
pub use pool::{ConnectionPool, PooledConnection};
pub use queue::BatchQueue;
pub use types::{
    Collection, FieldValue, Payload, PayloadHash, PerformanceSample, Scalar, WriteCallback,
    WriteOutcome, WriteRequest, DEFAULT_PRIORITY,
};
