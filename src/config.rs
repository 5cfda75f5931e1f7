//! # Engine Configuration
//!
//! All tuning knobs live in one [`EngineConfig`] passed to
//! [`WriteEngine::open`](crate::engine::WriteEngine::open). There is no
//! ambient global state and no live reconfiguration: the configuration is
//! validated once, up front, and an invalid one fails construction with
//! [`Error::InvalidConfig`](crate::error::Error::InvalidConfig).
//!
//! Defaults are tuned for a steady ingestion workload (hundreds of writes
//! per second against a local file): a small pre-warmed pool, one-second
//! flush latency bound, and a cache window wide enough to absorb upstream
//! re-fetches of the same records.

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

// =============================================================================
// Pool
// =============================================================================

/// Connection pool sizing and acquire behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Connections opened eagerly at engine construction.
    pub min_connections: usize,

    /// Hard ceiling on live connections (idle + borrowed).
    pub max_connections: usize,

    /// How long a flush group waits for a connection before failing with
    /// `PoolExhausted`.
    pub acquire_timeout: Duration,
}

impl Default for PoolConfig {
    fn default() -> Self {
        Self {
            min_connections: 2,
            max_connections: 10,
            acquire_timeout: Duration::from_secs(5),
        }
    }
}

// =============================================================================
// Cache
// =============================================================================

/// Write cache budget and expiry policy.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CacheConfig {
    /// Total byte budget; least-recently-used entries are evicted when an
    /// insert would exceed it.
    pub byte_budget: usize,

    /// Time-to-live for successful outcomes.
    pub ttl: Duration,

    /// Time-to-live for failed outcomes. Kept shorter than `ttl` so a
    /// transient failure stops short-circuiting retries quickly.
    pub failure_ttl: Duration,

    /// How often the background worker scans for TTL-expired entries.
    pub sweep_interval: Duration,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            byte_budget: 1024 * 1024,
            ttl: Duration::from_secs(300),
            failure_ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
        }
    }
}

// =============================================================================
// Batching
// =============================================================================

/// Flush cadence for the batch processor.
///
/// A flush is triggered by whichever comes first: the accumulated batch
/// reaches `max_batch_size`, or `max_batch_wait` elapses with at least one
/// pending item. Shorter wait = lower latency, longer = higher throughput.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchConfig {
    /// Maximum items per flush.
    pub max_batch_size: usize,

    /// Maximum time an item waits in an under-full batch.
    pub max_batch_wait: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            max_batch_size: 100,
            max_batch_wait: Duration::from_secs(1),
        }
    }
}

// =============================================================================
// Optimizer
// =============================================================================

/// Thresholds and score weights for the advisory optimizer.
///
/// The weights are tunable defaults, not a contract: they shape the single
/// operator-facing score but have no feedback effect on engine behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OptimizerConfig {
    /// Average flush duration above this recommends a larger batch size.
    pub slow_flush_threshold: Duration,

    /// Queue depth above this recommends more worker/connection concurrency.
    pub queue_depth_threshold: usize,

    /// `failed / total` ratio above this recommends investigating
    /// connectivity or data quality.
    pub failure_ratio_threshold: f64,

    /// Live connections at or above this fraction of the pool maximum
    /// recommends raising the pool ceiling.
    pub pool_pressure_ratio: f64,

    /// Duration at which normalized flush-duration pressure saturates at 1.0.
    pub duration_norm: Duration,

    /// Queue depth at which normalized queue pressure saturates at 1.0.
    pub queue_depth_norm: usize,

    /// Score weight of the success ratio.
    pub success_weight: f64,

    /// Score weight of (1 - duration pressure).
    pub duration_weight: f64,

    /// Score weight of (1 - queue pressure).
    pub queue_weight: f64,
}

impl Default for OptimizerConfig {
    fn default() -> Self {
        Self {
            slow_flush_threshold: Duration::from_millis(100),
            queue_depth_threshold: 100,
            failure_ratio_threshold: 0.05,
            pool_pressure_ratio: 0.8,
            duration_norm: Duration::from_millis(500),
            queue_depth_norm: 500,
            success_weight: 0.5,
            duration_weight: 0.3,
            queue_weight: 0.2,
        }
    }
}

// =============================================================================
// Engine
// =============================================================================

/// Top-level engine configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Connection pool settings.
    pub pool: PoolConfig,

    /// Write cache settings.
    pub cache: CacheConfig,

    /// Batch accumulation settings.
    pub batch: BatchConfig,

    /// Optimizer thresholds and weights.
    pub optimizer: OptimizerConfig,

    /// Capacity of the rolling ring of per-flush performance samples.
    pub metrics_ring_capacity: usize,

    /// Upper bound on how long `shutdown(drain = true)` blocks waiting for
    /// the queue to empty and the worker to finish.
    pub shutdown_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            pool: PoolConfig::default(),
            cache: CacheConfig::default(),
            batch: BatchConfig::default(),
            optimizer: OptimizerConfig::default(),
            metrics_ring_capacity: 1000,
            shutdown_timeout: Duration::from_secs(5),
        }
    }
}

impl EngineConfig {
    /// Checks the configuration for programmer errors.
    ///
    /// Called by `WriteEngine::open`; the engine never starts with a
    /// configuration that fails here.
    pub fn validate(&self) -> Result<()> {
        if self.pool.max_connections == 0 {
            return Err(Error::InvalidConfig(
                "pool.max_connections must be at least 1".to_string(),
            ));
        }
        if self.pool.min_connections > self.pool.max_connections {
            return Err(Error::InvalidConfig(format!(
                "pool.min_connections ({}) exceeds pool.max_connections ({})",
                self.pool.min_connections, self.pool.max_connections
            )));
        }
        if self.batch.max_batch_size == 0 {
            return Err(Error::InvalidConfig(
                "batch.max_batch_size must be at least 1".to_string(),
            ));
        }
        if self.metrics_ring_capacity == 0 {
            return Err(Error::InvalidConfig(
                "metrics_ring_capacity must be at least 1".to_string(),
            ));
        }
        if self.cache.failure_ttl > self.cache.ttl {
            return Err(Error::InvalidConfig(format!(
                "cache.failure_ttl ({:?}) exceeds cache.ttl ({:?})",
                self.cache.failure_ttl, self.cache.ttl
            )));
        }
        if !(0.0..=1.0).contains(&self.optimizer.failure_ratio_threshold) {
            return Err(Error::InvalidConfig(
                "optimizer.failure_ratio_threshold must be in [0, 1]".to_string(),
            ));
        }
        if !(0.0..=1.0).contains(&self.optimizer.pool_pressure_ratio) {
            return Err(Error::InvalidConfig(
                "optimizer.pool_pressure_ratio must be in [0, 1]".to_string(),
            ));
        }
        let weight_sum = self.optimizer.success_weight
            + self.optimizer.duration_weight
            + self.optimizer.queue_weight;
        if weight_sum <= 0.0 {
            return Err(Error::InvalidConfig(
                "optimizer score weights must sum to a positive value".to_string(),
            ));
        }
        Ok(())
    }
}

impl PoolConfig {
    /// Pool with a single connection and the given acquire timeout.
    pub fn single(acquire_timeout: Duration) -> Self {
        Self {
            min_connections: 0,
            max_connections: 1,
            acquire_timeout,
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
