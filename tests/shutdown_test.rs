//! Shutdown semantics: idempotent, drains the queue, and every accepted
//! request still gets exactly one callback.

mod common;

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use common::*;

#[test]
fn shutdown_twice_is_a_no_op() {
    let (_dir, _path, engine) = temp_engine(fast_config());
    engine.write(payload("a", 1), "events", 1, None);

    engine.shutdown(true);
    engine.shutdown(true);
    engine.shutdown(false);
}

#[test]
fn drain_flushes_pending_requests_before_stopping() {
    let mut config = fast_config();
    // Deadline far away and batch far from full: only the shutdown drain
    // can flush these.
    config.batch.max_batch_size = 1000;
    config.batch.max_batch_wait = Duration::from_secs(60);

    let (_dir, path, engine) = temp_engine(config);
    let sink = outcome_sink();

    for i in 0..5 {
        assert!(engine.write(payload("a", i), "events", 1, Some(recording(&sink))));
    }

    engine.shutdown(true);

    let drained = outcomes(&sink);
    assert_eq!(drained.len(), 5, "every accepted request got its callback");
    assert!(drained.iter().all(|o| o.success));
    assert_eq!(row_count(&path, "events"), 5);
}

#[test]
fn exactly_one_callback_per_request_across_shutdown() {
    let mut config = fast_config();
    config.batch.max_batch_size = 4;

    let (_dir, _path, engine) = temp_engine(config);
    let calls = Arc::new(AtomicUsize::new(0));

    for i in 0..10 {
        let calls = Arc::clone(&calls);
        engine.write(
            payload("a", i),
            "events",
            1,
            Some(Box::new(move |_| {
                calls.fetch_add(1, Ordering::SeqCst);
            })),
        );
    }

    engine.shutdown(true);
    assert_eq!(calls.load(Ordering::SeqCst), 10);
}

#[test]
fn writes_after_shutdown_are_rejected() {
    let (_dir, _path, engine) = temp_engine(fast_config());
    engine.shutdown(true);

    let sink = outcome_sink();
    let accepted = engine.write(payload("a", 1), "events", 1, Some(recording(&sink)));
    assert!(!accepted);

    let rejected = outcomes(&sink);
    assert_eq!(rejected.len(), 1);
    assert!(!rejected[0].success);
    assert!(rejected[0]
        .error
        .as_deref()
        .unwrap_or_default()
        .contains("shut down"));
}
