#![allow(dead_code)]

use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use floodgate::{
    EngineConfig, FieldValue, Payload, PoolConfig, WriteCallback, WriteEngine, WriteOutcome,
};

/// Opens an engine on a fresh temp-dir database.
///
/// The TempDir must outlive the engine; the path is returned so tests can
/// open their own verification connections.
pub fn temp_engine(config: EngineConfig) -> (tempfile::TempDir, PathBuf, WriteEngine) {
    let dir = tempfile::TempDir::new().expect("create temp dir");
    let path = dir.path().join("floodgate.db");
    let engine = WriteEngine::open(&path, config).expect("open engine");
    (dir, path, engine)
}

/// Config tuned for fast tests: tiny pool, short flush deadline.
pub fn fast_config() -> EngineConfig {
    let mut config = EngineConfig::default();
    config.pool = PoolConfig {
        min_connections: 1,
        max_connections: 2,
        acquire_timeout: Duration::from_secs(1),
    };
    config.batch.max_batch_wait = Duration::from_millis(20);
    config
}

/// One-field integer payload.
pub fn payload(field: &str, value: i64) -> Payload {
    let mut p = Payload::new();
    p.insert(field.to_string(), FieldValue::Integer(value));
    p
}

/// Shared sink collecting callback outcomes across threads.
pub type OutcomeSink = Arc<Mutex<Vec<WriteOutcome>>>;

pub fn outcome_sink() -> OutcomeSink {
    Arc::new(Mutex::new(Vec::new()))
}

/// A callback that records its outcome into the sink.
pub fn recording(sink: &OutcomeSink) -> WriteCallback {
    let sink = Arc::clone(sink);
    Box::new(move |outcome: &WriteOutcome| {
        sink.lock().expect("sink poisoned").push(outcome.clone());
    })
}

pub fn outcomes(sink: &OutcomeSink) -> Vec<WriteOutcome> {
    sink.lock().expect("sink poisoned").clone()
}

/// Polls `f` until it yields a value or the timeout elapses.
pub fn eventually<T>(
    timeout: Duration,
    interval: Duration,
    mut f: impl FnMut() -> Option<T>,
) -> T {
    let start = Instant::now();
    loop {
        if let Some(v) = f() {
            return v;
        }
        if start.elapsed() > timeout {
            panic!("condition not met within {:?}", timeout);
        }
        std::thread::sleep(interval);
    }
}

/// Waits until the sink holds at least `count` outcomes.
pub fn wait_for_outcomes(sink: &OutcomeSink, count: usize) -> Vec<WriteOutcome> {
    eventually(Duration::from_secs(5), Duration::from_millis(5), || {
        let held = outcomes(sink);
        (held.len() >= count).then_some(held)
    })
}

/// Counts rows in a collection table via a direct connection.
pub fn row_count(path: &std::path::Path, table: &str) -> i64 {
    let conn = rusqlite::Connection::open(path).expect("open verification connection");
    conn.query_row(&format!("SELECT COUNT(*) FROM \"{table}\""), [], |row| {
        row.get(0)
    })
    .expect("count rows")
}
