//! Pool saturation fails closed: a bounded wait and a typed error, never a
//! hang, and never more borrows than the configured maximum.

mod common;

use std::sync::Arc;
use std::time::{Duration, Instant};

use floodgate::{ConnectionPool, Error, PoolConfig};

#[test]
fn saturated_pool_times_out_quickly() {
    let dir = tempfile::TempDir::new().unwrap();
    let pool = Arc::new(
        ConnectionPool::open(
            dir.path().join("pool.db"),
            PoolConfig::single(Duration::from_millis(100)),
        )
        .unwrap(),
    );

    let held = pool.acquire(Duration::from_millis(100)).unwrap();

    let contender = Arc::clone(&pool);
    let waiter = std::thread::spawn(move || {
        let start = Instant::now();
        let result = contender.acquire(Duration::from_millis(100)).map(|_| ());
        (result, start.elapsed())
    });

    let (result, waited) = waiter.join().unwrap();
    assert!(matches!(result, Err(Error::PoolExhausted { .. })));
    assert!(waited >= Duration::from_millis(100));
    assert!(waited < Duration::from_secs(1), "timed out, did not hang");

    drop(held);
}

#[test]
fn released_connection_satisfies_waiter() {
    let dir = tempfile::TempDir::new().unwrap();
    let pool = Arc::new(
        ConnectionPool::open(
            dir.path().join("pool.db"),
            PoolConfig::single(Duration::from_secs(5)),
        )
        .unwrap(),
    );

    let held = pool.acquire(Duration::from_millis(100)).unwrap();

    let contender = Arc::clone(&pool);
    let waiter = std::thread::spawn(move || contender.acquire(Duration::from_secs(5)).is_ok());

    std::thread::sleep(Duration::from_millis(50));
    drop(held);

    assert!(waiter.join().unwrap());
    assert_eq!(pool.live_connections(), 1, "reused, not recreated");
}

#[test]
fn engine_survives_pool_pressure() {
    // One connection, many collections per flush: groups contend for the
    // single connection sequentially and all still land.
    let mut config = common::fast_config();
    config.pool = PoolConfig::single(Duration::from_secs(2));
    config.batch.max_batch_size = 8;
    config.batch.max_batch_wait = Duration::from_millis(20);

    let (_dir, path, engine) = common::temp_engine(config);
    let sink = common::outcome_sink();

    for i in 0..8 {
        let collection = format!("stream_{}", i % 4);
        engine.write(
            common::payload("value", i),
            collection,
            1,
            Some(common::recording(&sink)),
        );
    }

    let outcomes = common::wait_for_outcomes(&sink, 8);
    assert!(outcomes.iter().all(|o| o.success));

    engine.shutdown(true);
    for i in 0..4 {
        assert_eq!(common::row_count(&path, &format!("stream_{i}")), 2);
    }
}
