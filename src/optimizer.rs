//! # Tuning Optimizer
//!
//! Translates a [`PerformanceMetrics`] snapshot into a short, explainable
//! list of recommendations plus a single bounded score for operator-facing
//! reports. Purely advisory: the optimizer never mutates configuration and
//! has no feedback effect on engine behavior.
//!
//! Four rules are evaluated independently; each may fire:
//!
//! | Signal | Recommendation |
//! |--------|----------------|
//! | average flush duration above threshold | increase batch size |
//! | queue depth above threshold | increase worker/connection concurrency |
//! | failure ratio above threshold | investigate connectivity / data quality |
//! | live connections near the pool maximum | raise the pool ceiling |
//!
//! The score combines success ratio, normalized flush duration, and queue
//! pressure. Every input is clamped to [0, 1] before weighting, so the
//! result is in [0, 100] by construction.

use serde::Serialize;

use crate::config::OptimizerConfig;
use crate::metrics::PerformanceMetrics;

// =============================================================================
// Report Types
// =============================================================================

/// Machine-readable tag for which rule produced a recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum TuningRule {
    /// Flushes are slow on average; batching more per flush amortizes cost.
    IncreaseBatchSize,
    /// The queue is backing up; more flush concurrency would help.
    IncreaseConcurrency,
    /// Failure ratio is sustained above threshold.
    InvestigateFailures,
    /// The pool runs close to its ceiling.
    RaisePoolCeiling,
}

/// One actionable, explainable tuning suggestion.
#[derive(Debug, Clone, Serialize)]
pub struct Recommendation {
    /// Which rule fired.
    pub rule: TuningRule,
    /// Human-readable explanation with the observed value and threshold.
    pub message: String,
}

/// The optimizer's full output: the snapshot it judged, the suggestions,
/// and the bounded score. Plain data for report serialization.
#[derive(Debug, Clone, Serialize)]
pub struct OptimizationReport {
    /// The metrics snapshot the recommendations are based on.
    pub metrics: PerformanceMetrics,
    /// Zero or more suggestions, at most one per rule.
    pub recommendations: Vec<Recommendation>,
    /// Composite health score in [0, 100]; higher is better.
    pub optimization_score: f64,
}

// =============================================================================
// Optimizer
// =============================================================================

/// Evaluates tuning rules against metrics snapshots.
pub struct Optimizer {
    config: OptimizerConfig,
    pool_max: usize,
}

fn clamp01(value: f64) -> f64 {
    value.clamp(0.0, 1.0)
}

impl Optimizer {
    /// Creates an optimizer. `pool_max` is the pool ceiling the pressure
    /// rule compares against.
    pub fn new(config: OptimizerConfig, pool_max: usize) -> Self {
        Self { config, pool_max }
    }

    /// Produces recommendations and the score for one snapshot.
    pub fn analyze(&self, metrics: &PerformanceMetrics) -> OptimizationReport {
        let mut recommendations = Vec::new();

        if metrics.average_flush_duration > self.config.slow_flush_threshold {
            recommendations.push(Recommendation {
                rule: TuningRule::IncreaseBatchSize,
                message: format!(
                    "average flush duration {:?} exceeds {:?}; increase max_batch_size to amortize per-flush cost",
                    metrics.average_flush_duration, self.config.slow_flush_threshold
                ),
            });
        }

        if metrics.queue_depth > self.config.queue_depth_threshold {
            recommendations.push(Recommendation {
                rule: TuningRule::IncreaseConcurrency,
                message: format!(
                    "queue depth {} exceeds {}; increase worker or connection concurrency",
                    metrics.queue_depth, self.config.queue_depth_threshold
                ),
            });
        }

        if metrics.total_writes > 0 && metrics.error_rate > self.config.failure_ratio_threshold {
            recommendations.push(Recommendation {
                rule: TuningRule::InvestigateFailures,
                message: format!(
                    "failure ratio {:.1}% exceeds {:.1}%; investigate connectivity and data quality",
                    metrics.error_rate * 100.0,
                    self.config.failure_ratio_threshold * 100.0
                ),
            });
        }

        let pressure_floor =
            (self.pool_max as f64 * self.config.pool_pressure_ratio).ceil() as usize;
        if self.pool_max > 0 && metrics.live_connections >= pressure_floor.max(1) {
            recommendations.push(Recommendation {
                rule: TuningRule::RaisePoolCeiling,
                message: format!(
                    "{} of {} pooled connections live; raise max_connections",
                    metrics.live_connections, self.pool_max
                ),
            });
        }

        OptimizationReport {
            optimization_score: self.score(metrics),
            recommendations,
            metrics: metrics.clone(),
        }
    }

    /// Weighted health score in [0, 100]. Inputs are clamped before the
    /// combination, so no final clamp is needed.
    fn score(&self, metrics: &PerformanceMetrics) -> f64 {
        let success = if metrics.total_writes == 0 {
            1.0
        } else {
            clamp01(metrics.successful_writes as f64 / metrics.total_writes as f64)
        };

        let duration_pressure = clamp01(
            metrics.average_flush_duration.as_secs_f64()
                / self.config.duration_norm.as_secs_f64().max(f64::EPSILON),
        );

        let queue_pressure = clamp01(
            metrics.queue_depth as f64 / (self.config.queue_depth_norm.max(1)) as f64,
        );

        let weight_sum =
            self.config.success_weight + self.config.duration_weight + self.config.queue_weight;

        let combined = self.config.success_weight * success
            + self.config.duration_weight * (1.0 - duration_pressure)
            + self.config.queue_weight * (1.0 - queue_pressure);

        100.0 * combined / weight_sum
    }
}

// =============================================================================
// Tests
// =============================================================================
