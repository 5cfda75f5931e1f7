//! # Error Handling for Floodgate
//!
//! This module defines the error types used throughout the engine. We use a
//! single error enum ([`Error`]) to represent all failure modes, which keeps
//! function signatures and caller-side matching simple.
//!
//! ## Error Categories
//!
//! | Category | Examples | Typical Response |
//! |----------|----------|------------------|
//! | Capacity | Pool exhausted | Retry with backoff, or fail the group |
//! | Backend | Connection creation, grouped statement | Failed outcome per item, worker continues |
//! | Programmer | Invalid configuration | Fix the configuration; fails at construction |
//! | Lifecycle | Engine closed | Stop submitting |
//!
//! Producer-facing calls never raise storage errors synchronously: anything
//! that happens during a flush is delivered through the per-request callback
//! as a failed [`WriteOutcome`](crate::types::WriteOutcome). The only
//! synchronous failure is [`Error::InvalidConfig`] at construction time.

use std::time::Duration;

use thiserror::Error;

// =============================================================================
// Error Type
// =============================================================================

/// All errors that can occur in floodgate operations.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Capacity Errors (recoverable by retry or backoff)
    // =========================================================================

    /// No pooled connection became available within the acquire timeout.
    ///
    /// The pool is at its configured maximum and every connection stayed
    /// borrowed for the whole wait. The group that needed the connection is
    /// failed; other groups in the same flush proceed independently.
    #[error("connection pool exhausted: no connection available within {waited:?}")]
    PoolExhausted {
        /// How long the caller waited before giving up.
        waited: Duration,
    },

    // =========================================================================
    // Backend Errors (surface as failed outcomes, never crash the worker)
    // =========================================================================

    /// Opening or configuring a new storage connection failed.
    ///
    /// The failed attempt does not count against the pool's live-connection
    /// budget, so pool bookkeeping stays consistent.
    #[error("failed to create storage connection: {0}")]
    ConnectionCreateFailed(#[source] rusqlite::Error),

    /// The grouped insert/upsert for one collection failed.
    ///
    /// Every item in the affected group receives a failed outcome carrying
    /// this message; other collection groups in the same flush are untouched.
    #[error("batch execution failed for collection '{collection}': {reason}")]
    BatchExecutionFailed {
        /// The collection whose grouped statement failed.
        collection: String,
        /// Description of the underlying failure.
        reason: String,
    },

    /// A collection name failed identifier validation at flush time.
    ///
    /// Collection names become table names, so they are restricted to
    /// `[A-Za-z_][A-Za-z0-9_]*`. Validation happens at flush (not submit)
    /// so the failure reaches the caller asynchronously like any other
    /// storage failure.
    #[error("invalid collection name '{0}': must match [A-Za-z_][A-Za-z0-9_]*")]
    InvalidCollection(String),

    /// SQLite operation failed inside the flush path.
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    // =========================================================================
    // Programmer Errors (fail fast at construction)
    // =========================================================================

    /// The engine configuration is invalid (e.g. max pool size below min).
    ///
    /// This is the only error producers can observe synchronously, and only
    /// from [`WriteEngine::open`](crate::engine::WriteEngine::open).
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================

    /// The background worker thread could not be spawned.
    #[error("worker thread error: {0}")]
    Worker(String),

    /// The engine has been shut down and no longer accepts work.
    #[error("write engine is shut down")]
    EngineClosed,
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// A `Result` type alias using [`Error`] as the error type.
pub type Result<T> = std::result::Result<T, Error>;

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Error messages appear in logs and failed outcomes; keep them readable.
    #[test]
    fn test_error_display() {
        let exhausted = Error::PoolExhausted {
            waited: Duration::from_millis(100),
        };
        assert_eq!(
            exhausted.to_string(),
            "connection pool exhausted: no connection available within 100ms"
        );

        let batch = Error::BatchExecutionFailed {
            collection: "events".to_string(),
            reason: "constraint violated".to_string(),
        };
        assert_eq!(
            batch.to_string(),
            "batch execution failed for collection 'events': constraint violated"
        );

        let bad_name = Error::InvalidCollection("bad name!".to_string());
        assert!(bad_name.to_string().contains("bad name!"));
    }

    /// `#[from]` on `Error::Sqlite` lets `?` convert rusqlite errors.
    #[test]
    fn test_sqlite_error_conversion() {
        let sqlite_err = rusqlite::Error::InvalidParameterName("test".to_string());
        let our_err: Error = sqlite_err.into();
        assert!(matches!(our_err, Error::Sqlite(_)));
        assert!(our_err.to_string().contains("sqlite error"));
    }
}
