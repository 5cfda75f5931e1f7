//! # Bounded Connection Pool
//!
//! This module provides exclusive, short-lived access to a bounded number of
//! SQLite connections. Connections are created lazily up to a configured
//! maximum, reused through an idle set, and handed out as RAII guards so
//! release happens on every exit path.
//!
//! ```text
//! acquire(timeout)                      release (guard drop)
//!       │                                      ▲
//!       ▼                                      │
//! ┌───────────────────────────────────────────────────────┐
//! │                 Mutex<PoolState>                      │
//! │                                                       │
//! │   idle: [conn, conn]      live: 4      max: 10        │
//! │                                                       │
//! │   idle non-empty  → pop and lend                      │
//! │   live < max      → create, lend                      │
//! │   otherwise       → Condvar wait (bounded by timeout) │
//! └───────────────────────────────────────────────────────┘
//! ```
//!
//! ## Durability Configuration
//!
//! Every connection is configured once at creation for concurrent-writer
//! friendly durability: WAL journaling, `synchronous = NORMAL`, a larger
//! page cache, and in-memory temp storage. WAL lets readers see a
//! consistent snapshot while a writer commits, and NORMAL syncs the WAL on
//! commit without an fsync per write.
//!
//! ## Invariant
//!
//! The number of simultaneously borrowed connections never exceeds
//! `max_connections`. A failed creation attempt does not count against the
//! live budget.

use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use rusqlite::Connection;

use crate::config::PoolConfig;
use crate::error::{Error, Result};

// =============================================================================
// Pool State
// =============================================================================

struct PoolState {
    /// Connections not currently lent out.
    idle: Vec<Connection>,

    /// Total connections in existence (idle + borrowed).
    live: usize,

    /// Set by `close_all`; acquires fail afterwards.
    closed: bool,
}

// =============================================================================
// Connection Pool
// =============================================================================

/// A bounded pool of reusable SQLite connections.
pub struct ConnectionPool {
    path: PathBuf,
    config: PoolConfig,
    state: Mutex<PoolState>,
    available: Condvar,
}

impl ConnectionPool {
    /// Opens a pool against the database at `path`, pre-warming
    /// `min_connections` connections.
    ///
    /// # Errors
    ///
    /// `Error::ConnectionCreateFailed` if the backend is unreachable while
    /// pre-warming; the database file is created if it does not exist.
    pub fn open(path: impl AsRef<Path>, config: PoolConfig) -> Result<Self> {
        let pool = Self {
            path: path.as_ref().to_path_buf(),
            config,
            state: Mutex::new(PoolState {
                idle: Vec::new(),
                live: 0,
                closed: false,
            }),
            available: Condvar::new(),
        };

        for _ in 0..pool.config.min_connections {
            let conn = pool.create_connection()?;
            let mut state = pool.state.lock().expect("pool mutex poisoned");
            state.idle.push(conn);
            state.live += 1;
        }

        Ok(pool)
    }

    /// Opens a new connection and applies the one-time durability pragmas.
    fn create_connection(&self) -> Result<Connection> {
        let conn = Connection::open(&self.path).map_err(Error::ConnectionCreateFailed)?;

        // WAL mode: readers don't block the writer and vice versa.
        conn.execute_batch("PRAGMA journal_mode = WAL")
            .map_err(Error::ConnectionCreateFailed)?;
        // Sync the WAL on commit, not on every write.
        conn.execute_batch("PRAGMA synchronous = NORMAL")
            .map_err(Error::ConnectionCreateFailed)?;
        conn.execute_batch("PRAGMA cache_size = 10000")
            .map_err(Error::ConnectionCreateFailed)?;
        conn.execute_batch("PRAGMA temp_store = MEMORY")
            .map_err(Error::ConnectionCreateFailed)?;

        Ok(conn)
    }

    /// Borrows a connection, blocking up to `timeout` when the pool is
    /// saturated.
    ///
    /// Resolution order: an idle connection is returned immediately; below
    /// the maximum a new one is created; otherwise the caller waits for a
    /// release. The returned guard gives the connection back on drop.
    ///
    /// # Errors
    ///
    /// - `Error::PoolExhausted` if no connection frees up within `timeout`
    /// - `Error::ConnectionCreateFailed` if lazy creation fails
    /// - `Error::EngineClosed` if the pool has been closed
    pub fn acquire(&self, timeout: Duration) -> Result<PooledConnection<'_>> {
        let deadline = Instant::now() + timeout;
        let mut state = self.state.lock().expect("pool mutex poisoned");

        loop {
            if state.closed {
                return Err(Error::EngineClosed);
            }

            if let Some(conn) = state.idle.pop() {
                return Ok(PooledConnection {
                    pool: self,
                    conn: Some(conn),
                });
            }

            if state.live < self.config.max_connections {
                // Reserve the slot before creating so concurrent acquirers
                // can't overshoot the maximum, then create outside the lock.
                state.live += 1;
                drop(state);

                match self.create_connection() {
                    Ok(conn) => {
                        return Ok(PooledConnection {
                            pool: self,
                            conn: Some(conn),
                        });
                    }
                    Err(e) => {
                        let mut state = self.state.lock().expect("pool mutex poisoned");
                        state.live -= 1;
                        drop(state);
                        self.available.notify_one();
                        return Err(e);
                    }
                }
            }

            let remaining = match deadline.checked_duration_since(Instant::now()) {
                Some(d) if !d.is_zero() => d,
                _ => return Err(Error::PoolExhausted { waited: timeout }),
            };

            let (guard, wait_result) = self
                .available
                .wait_timeout(state, remaining)
                .expect("pool mutex poisoned");
            state = guard;

            if wait_result.timed_out() && state.idle.is_empty() && !state.closed {
                return Err(Error::PoolExhausted { waited: timeout });
            }
        }
    }

    /// Returns a connection to the idle set. Called from the guard's Drop.
    fn release(&self, conn: Connection) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        if state.closed {
            // Late return after close_all: drop instead of pooling.
            state.live -= 1;
            drop(state);
            drop(conn);
        } else {
            state.idle.push(conn);
            drop(state);
            self.available.notify_one();
        }
    }

    /// Closes every idle connection and refuses further acquires.
    ///
    /// Borrowed connections are closed as their guards drop. Idempotent;
    /// used only at engine shutdown.
    pub fn close_all(&self) {
        let mut state = self.state.lock().expect("pool mutex poisoned");
        state.closed = true;
        let drained: Vec<Connection> = state.idle.drain(..).collect();
        state.live -= drained.len();
        drop(state);
        drop(drained);
        self.available.notify_all();
    }

    /// Current number of live connections (idle + borrowed).
    pub fn live_connections(&self) -> usize {
        self.state.lock().expect("pool mutex poisoned").live
    }

    /// The configured maximum, exposed for the optimizer's pool-pressure rule.
    pub fn max_connections(&self) -> usize {
        self.config.max_connections
    }
}

// =============================================================================
// Pooled Connection Guard
// =============================================================================

/// An exclusive borrow of one pooled connection.
///
/// Dereferences to [`rusqlite::Connection`]. Dropping the guard returns the
/// connection to the pool on every exit path, including panics inside a
/// flush.
pub struct PooledConnection<'a> {
    pool: &'a ConnectionPool,
    conn: Option<Connection>,
}

impl std::fmt::Debug for PooledConnection<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PooledConnection")
            .field("has_conn", &self.conn.is_some())
            .finish()
    }
}

impl Deref for PooledConnection<'_> {
    type Target = Connection;

    fn deref(&self) -> &Connection {
        self.conn.as_ref().expect("connection taken before drop")
    }
}

impl Drop for PooledConnection<'_> {
    fn drop(&mut self) {
        if let Some(conn) = self.conn.take() {
            self.pool.release(conn);
        }
    }
}

// =============================================================================
// Tests
// =============================================================================
