//! # Metrics Recorder
//!
//! Rolling performance statistics with O(1) updates and bounded memory.
//! Every flush contributes one [`PerformanceSample`]; samples live in a
//! fixed-capacity ring where the oldest entry is overwritten once the ring
//! is full, never individually deleted.
//!
//! [`MetricsRecorder::snapshot`] produces a [`PerformanceMetrics`] value: a
//! plain data structure with stable field names, `Serialize`-able for the
//! downstream report generators and sync jobs that consume it. Consumers
//! never hold a lock; synchronization is internal to the recorder.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::time::Duration;

use serde::Serialize;

use crate::cache::CacheStats;
use crate::types::PerformanceSample;

// =============================================================================
// Snapshot Type
// =============================================================================

/// A consistent point-in-time view of engine performance.
///
/// Plain data, no methods beyond construction: report generators serialize
/// this to JSON/Markdown, and sync jobs read it to decide on throttling.
#[derive(Debug, Clone, Serialize)]
pub struct PerformanceMetrics {
    /// Flush-attributed writes (successes + failures). Cache hits are not
    /// counted here; they appear in `cache_hit_rate`.
    pub total_writes: u64,

    /// Writes persisted.
    pub successful_writes: u64,

    /// Writes that failed in a flush.
    pub failed_writes: u64,

    /// `failed_writes / total_writes`; 0 when nothing was written.
    pub error_rate: f64,

    /// Moving average flush duration over the sample ring.
    pub average_flush_duration: Duration,

    /// Longest flush duration in the sample ring.
    pub peak_flush_duration: Duration,

    /// Items per second over the sample ring.
    pub throughput_per_second: f64,

    /// Requests currently waiting in the batch queue.
    pub queue_depth: usize,

    /// Pooled connections currently in existence.
    pub live_connections: usize,

    /// Cache hits as a fraction of all cache lookups.
    pub cache_hit_rate: f64,
}

// =============================================================================
// Recorder
// =============================================================================

struct RecorderInner {
    samples: VecDeque<PerformanceSample>,
    successful: u64,
    failed: u64,
}

/// Accumulates per-flush samples and running totals.
pub struct MetricsRecorder {
    inner: Mutex<RecorderInner>,
    ring_capacity: usize,
}

impl MetricsRecorder {
    /// Creates a recorder whose sample ring holds `ring_capacity` flushes.
    pub fn new(ring_capacity: usize) -> Self {
        Self {
            inner: Mutex::new(RecorderInner {
                samples: VecDeque::with_capacity(ring_capacity),
                successful: 0,
                failed: 0,
            }),
            ring_capacity,
        }
    }

    /// Records one flush's sample, overwriting the oldest once the ring is
    /// full.
    pub fn record(&self, sample: PerformanceSample) {
        let mut inner = self.inner.lock().expect("metrics mutex poisoned");
        if inner.samples.len() == self.ring_capacity {
            inner.samples.pop_front();
        }
        inner.samples.push_back(sample);
        inner.successful += sample.success_count as u64;
        inner.failed += sample.failure_count as u64;
    }

    /// Produces a consistent snapshot.
    ///
    /// `queue_depth`, `live_connections`, and the cache counters are gauges
    /// owned by other components; the facade reads them at snapshot time and
    /// passes them in.
    pub fn snapshot(
        &self,
        queue_depth: usize,
        live_connections: usize,
        cache: CacheStats,
    ) -> PerformanceMetrics {
        let inner = self.inner.lock().expect("metrics mutex poisoned");

        let total = inner.successful + inner.failed;
        let error_rate = if total == 0 {
            0.0
        } else {
            inner.failed as f64 / total as f64
        };

        let ring_duration: Duration = inner.samples.iter().map(|s| s.duration).sum();
        let ring_items: usize = inner.samples.iter().map(|s| s.item_count).sum();

        let average_flush_duration = if inner.samples.is_empty() {
            Duration::ZERO
        } else {
            ring_duration / inner.samples.len() as u32
        };
        let peak_flush_duration = inner
            .samples
            .iter()
            .map(|s| s.duration)
            .max()
            .unwrap_or(Duration::ZERO);
        let throughput_per_second = if ring_duration.is_zero() {
            0.0
        } else {
            ring_items as f64 / ring_duration.as_secs_f64()
        };

        PerformanceMetrics {
            total_writes: total,
            successful_writes: inner.successful,
            failed_writes: inner.failed,
            error_rate,
            average_flush_duration,
            peak_flush_duration,
            throughput_per_second,
            queue_depth,
            live_connections,
            cache_hit_rate: cache.hit_rate(),
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
