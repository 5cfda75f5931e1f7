//! # Domain Types for Floodgate
//!
//! This module defines the value types that flow through the engine:
//! payloads and their field values, content hashes, collections, write
//! requests and their outcomes, and the per-flush performance sample.
//!
//! ## Design Philosophy: Newtypes for Safety
//!
//! Identifiers and hashes are wrapped in single-field structs rather than
//! passed around as bare strings and integers. A [`PayloadHash`] cannot be
//! confused with a row count, and a [`Collection`] cannot be confused with
//! an arbitrary string, which matters because collection names end up as
//! table names.
//!
//! ## Payload Normalization
//!
//! A payload is an ordered mapping (`BTreeMap`) of field name to
//! [`FieldValue`]. The BTreeMap keeps keys sorted, so two payloads with the
//! same fields in different insertion orders are byte-identical once
//! encoded, and hash to the same [`PayloadHash`]. That hash is both the
//! cache key and the idempotent upsert key at the storage layer.

use std::collections::BTreeMap;
use std::fmt;
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use xxhash_rust::xxh3::Xxh3;

// =============================================================================
// Field Values
// =============================================================================

/// A scalar payload value: the closed union every target column type can
/// represent without reflection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Scalar {
    /// UTF-8 text.
    Text(String),
    /// Signed 64-bit integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// Boolean.
    Bool(bool),
    /// Explicit null.
    Null,
}

/// A payload field value: a scalar or a flat array of scalars.
///
/// Arrays cannot nest. The closed union keeps the wire and storage
/// representation (canonical JSON) unambiguous.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum FieldValue {
    /// UTF-8 text.
    Text(String),
    /// Signed 64-bit integer.
    Integer(i64),
    /// 64-bit float.
    Real(f64),
    /// Boolean.
    Bool(bool),
    /// Explicit null.
    Null,
    /// Flat array of scalars.
    Array(Vec<Scalar>),
}

impl From<&str> for FieldValue {
    fn from(s: &str) -> Self {
        Self::Text(s.to_string())
    }
}

impl From<String> for FieldValue {
    fn from(s: String) -> Self {
        Self::Text(s)
    }
}

impl From<i64> for FieldValue {
    fn from(v: i64) -> Self {
        Self::Integer(v)
    }
}

impl From<f64> for FieldValue {
    fn from(v: f64) -> Self {
        Self::Real(v)
    }
}

impl From<bool> for FieldValue {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

/// An ordered field-name-to-value mapping. Sorted key order is the
/// normalization the content hash depends on.
pub type Payload = BTreeMap<String, FieldValue>;

// =============================================================================
// Payload Hashing
// =============================================================================

// Tag bytes for the canonical encoding. Distinct tags keep e.g. the text
// "1" and the integer 1 from colliding.
const TAG_TEXT: u8 = 1;
const TAG_INTEGER: u8 = 2;
const TAG_REAL: u8 = 3;
const TAG_BOOL: u8 = 4;
const TAG_NULL: u8 = 5;
const TAG_ARRAY: u8 = 6;

/// A stable XXH3-64 content hash of a normalized payload.
///
/// The encoding is length-prefixed and tagged, so it is unambiguous, and it
/// walks the BTreeMap in key order, so insertion order never affects the
/// hash. XXH3 is formally specified: the same payload produces the same
/// hash across runs, platforms, and versions, which makes the hash safe to
/// persist as an upsert key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PayloadHash(u64);

impl PayloadHash {
    /// Computes the content hash of a payload.
    pub fn of(payload: &Payload) -> Self {
        let mut hasher = Xxh3::new();
        for (key, value) in payload {
            hasher.update(&(key.len() as u32).to_le_bytes());
            hasher.update(key.as_bytes());
            hash_field(&mut hasher, value);
        }
        Self(hasher.digest())
    }

    /// Creates a PayloadHash from a raw value (e.g. read back from storage).
    pub fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the raw hash value.
    pub fn as_raw(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for PayloadHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

fn hash_scalar(hasher: &mut Xxh3, scalar: &Scalar) {
    match scalar {
        Scalar::Text(s) => {
            hasher.update(&[TAG_TEXT]);
            hasher.update(&(s.len() as u32).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        Scalar::Integer(v) => {
            hasher.update(&[TAG_INTEGER]);
            hasher.update(&v.to_le_bytes());
        }
        Scalar::Real(v) => {
            hasher.update(&[TAG_REAL]);
            hasher.update(&v.to_bits().to_le_bytes());
        }
        Scalar::Bool(v) => {
            hasher.update(&[TAG_BOOL, u8::from(*v)]);
        }
        Scalar::Null => hasher.update(&[TAG_NULL]),
    }
}

fn hash_field(hasher: &mut Xxh3, value: &FieldValue) {
    match value {
        FieldValue::Text(s) => {
            hasher.update(&[TAG_TEXT]);
            hasher.update(&(s.len() as u32).to_le_bytes());
            hasher.update(s.as_bytes());
        }
        FieldValue::Integer(v) => {
            hasher.update(&[TAG_INTEGER]);
            hasher.update(&v.to_le_bytes());
        }
        FieldValue::Real(v) => {
            hasher.update(&[TAG_REAL]);
            hasher.update(&v.to_bits().to_le_bytes());
        }
        FieldValue::Bool(v) => {
            hasher.update(&[TAG_BOOL, u8::from(*v)]);
        }
        FieldValue::Null => hasher.update(&[TAG_NULL]),
        FieldValue::Array(items) => {
            hasher.update(&[TAG_ARRAY]);
            hasher.update(&(items.len() as u32).to_le_bytes());
            for item in items {
                hash_scalar(hasher, item);
            }
        }
    }
}

// =============================================================================
// Collections
// =============================================================================

/// The name of a target collection (a table in the embedded store).
///
/// Names are validated at flush time, not at submission: an invalid name
/// fails its flush group asynchronously through the callback, like any
/// other storage failure.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Collection(String);

impl Collection {
    /// Creates a collection name.
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    /// Returns the string representation.
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// True if the name is usable as a table identifier:
    /// `[A-Za-z_][A-Za-z0-9_]*`.
    pub fn is_valid_identifier(&self) -> bool {
        let mut chars = self.0.chars();
        match chars.next() {
            Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
            _ => return false,
        }
        chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
    }
}

impl fmt::Display for Collection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Collection {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for Collection {
    fn from(s: String) -> Self {
        Self(s)
    }
}

// =============================================================================
// Write Requests and Outcomes
// =============================================================================

/// Default priority assigned by the convenience write methods.
pub const DEFAULT_PRIORITY: u8 = 1;

/// Callback invoked exactly once per accepted write request, either
/// synchronously (cache hit) or from the background worker (after flush).
pub type WriteCallback = Box<dyn FnOnce(&WriteOutcome) + Send>;

/// A single write request, used once: queued, consumed by one flush.
pub struct WriteRequest {
    /// Target collection.
    pub collection: Collection,

    /// The structured payload to persist.
    pub payload: Payload,

    /// Scheduling priority; higher values are serviced first.
    pub priority: u8,

    /// Caller-maintained resubmission count. The engine never retries on
    /// its own; callers that resubmit after a failure increment this, and
    /// it is echoed back as `WriteOutcome::retry_count`.
    pub attempt: u32,

    /// Completion callback, if any.
    pub callback: Option<WriteCallback>,

    /// When the request was created.
    pub created_at: Instant,
}

impl WriteRequest {
    /// Creates a request with default priority and no callback.
    pub fn new(collection: impl Into<Collection>, payload: Payload) -> Self {
        Self {
            collection: collection.into(),
            payload,
            priority: DEFAULT_PRIORITY,
            attempt: 0,
            callback: None,
            created_at: Instant::now(),
        }
    }

    /// Sets the priority (builder pattern).
    pub fn with_priority(mut self, priority: u8) -> Self {
        self.priority = priority;
        self
    }

    /// Sets the resubmission count (builder pattern).
    pub fn with_attempt(mut self, attempt: u32) -> Self {
        self.attempt = attempt;
        self
    }

    /// Sets the completion callback (builder pattern).
    pub fn with_callback(mut self, callback: WriteCallback) -> Self {
        self.callback = Some(callback);
        self
    }
}

impl fmt::Debug for WriteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WriteRequest")
            .field("collection", &self.collection)
            .field("priority", &self.priority)
            .field("attempt", &self.attempt)
            .field("fields", &self.payload.len())
            .field("has_callback", &self.callback.is_some())
            .finish()
    }
}

/// The result of flushing (or short-circuiting) one write request.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct WriteOutcome {
    /// Whether the write was persisted.
    pub success: bool,

    /// Identifier assigned on success: the payload hash, which is also the
    /// upsert key of the stored row.
    pub record_id: Option<String>,

    /// Error description on failure.
    pub error: Option<String>,

    /// How long the flush that carried this request took.
    pub elapsed: Duration,

    /// Echo of the request's `attempt` field.
    pub retry_count: u32,
}

impl WriteOutcome {
    /// Builds a success outcome.
    pub fn success(record_id: PayloadHash, elapsed: Duration, retry_count: u32) -> Self {
        Self {
            success: true,
            record_id: Some(record_id.to_string()),
            error: None,
            elapsed,
            retry_count,
        }
    }

    /// Builds a failure outcome.
    pub fn failure(error: impl Into<String>, elapsed: Duration, retry_count: u32) -> Self {
        Self {
            success: false,
            record_id: None,
            error: Some(error.into()),
            elapsed,
            retry_count,
        }
    }
}

// =============================================================================
// Performance Samples
// =============================================================================

/// One flush's contribution to the rolling metrics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PerformanceSample {
    /// Wall-clock duration of the whole flush.
    pub duration: Duration,

    /// Items in the flushed batch.
    pub item_count: usize,

    /// Items persisted.
    pub success_count: usize,

    /// Items failed.
    pub failure_count: usize,
}

// =============================================================================
// Time Helpers
// =============================================================================

/// Current wall-clock time as Unix milliseconds, for row timestamps.
pub(crate) fn current_time_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// =============================================================================
// Tests
// =============================================================================
