//! Delivery semantics, manager lifecycle, and configuration handover.

use anyhow::Result;
use quern::{
    EcSqlParams, EcSqlRequest, QueryConfig, QueryManager, QueryQuota, QueryStatus, QueryStore,
};
use quern_test_utils::{MemoryStoreBuilder, Script};
use serde_json::json;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{mpsc, Arc};
use std::thread;
use std::time::Duration;

fn fast_store() -> Arc<dyn QueryStore> {
    MemoryStoreBuilder::new()
        .statement(
            "SELECT N FROM ts.Fast",
            Script::new(&[("N", "int")], vec![vec![json!(1)], vec![json!(2)]]),
        )
        .statement(
            "SELECT N FROM ts.Slow",
            Script::new(&[("N", "int")], (0..10).map(|i| vec![json!(i)]).collect())
                .with_row_cost(Duration::from_millis(100)),
        )
        .build()
}

#[test]
fn test_future_and_callback_forms_agree() -> Result<()> {
    let manager = QueryManager::new(fast_store(), QueryConfig::default());

    let via_future = manager
        .enqueue(EcSqlRequest::new("SELECT N FROM ts.Fast", EcSqlParams::new()))
        .get();

    let (tx, rx) = mpsc::channel();
    manager.enqueue_with_callback(
        EcSqlRequest::new("SELECT N FROM ts.Fast", EcSqlParams::new()),
        move |response| {
            let _ = tx.send(response);
        },
    );
    let via_callback = rx.recv_timeout(Duration::from_secs(5))?;

    assert_eq!(via_future.status(), QueryStatus::Done);
    assert_eq!(via_callback.status(), via_future.status());
    assert_eq!(
        via_callback.rows().unwrap().row_count(),
        via_future.rows().unwrap().row_count()
    );
    assert_eq!(
        via_callback.rows().unwrap().rows,
        via_future.rows().unwrap().rows
    );
    Ok(())
}

#[test]
fn test_callback_runs_on_a_worker_thread() -> Result<()> {
    let manager = QueryManager::new(fast_store(), QueryConfig::default());
    let caller = thread::current().id();

    let (tx, rx) = mpsc::channel();
    manager.enqueue_with_callback(
        EcSqlRequest::new("SELECT N FROM ts.Fast", EcSqlParams::new()),
        move |response| {
            let _ = tx.send((thread::current().id(), response.status()));
        },
    );

    let (callback_thread, status) = rx.recv_timeout(Duration::from_secs(5))?;
    assert_eq!(status, QueryStatus::Done);
    assert_ne!(callback_thread, caller, "callback must run on the pool");
    Ok(())
}

#[test]
fn test_exactly_one_terminal_response_per_request() {
    let manager = QueryManager::new(
        fast_store(),
        QueryConfig::default().with_worker_threads(4),
    );
    let delivered = Arc::new(AtomicUsize::new(0));

    let mut futures = Vec::new();
    for i in 0..50 {
        if i % 2 == 0 {
            futures.push(manager.enqueue(EcSqlRequest::new(
                "SELECT N FROM ts.Fast",
                EcSqlParams::new(),
            )));
        } else {
            let delivered = Arc::clone(&delivered);
            manager.enqueue_with_callback(
                EcSqlRequest::new("SELECT N FROM ts.Fast", EcSqlParams::new()),
                move |response| {
                    assert_eq!(response.status(), QueryStatus::Done);
                    delivered.fetch_add(1, Ordering::SeqCst);
                },
            );
        }
    }

    let mut ids = Vec::new();
    for future in &futures {
        let response = future.get();
        assert_eq!(response.status(), QueryStatus::Done);
        ids.push(response.id());
    }
    ids.sort_unstable();
    ids.dedup();
    assert_eq!(ids.len(), futures.len(), "ids are process-unique");

    // All callbacks land eventually.
    let deadline = std::time::Instant::now() + Duration::from_secs(5);
    while delivered.load(Ordering::SeqCst) < 25 && std::time::Instant::now() < deadline {
        thread::sleep(Duration::from_millis(10));
    }
    assert_eq!(delivered.load(Ordering::SeqCst), 25);
}

#[test]
fn test_future_get_is_repeatable_and_cross_thread() {
    let manager = QueryManager::new(fast_store(), QueryConfig::default());
    let future = manager.enqueue(EcSqlRequest::new(
        "SELECT N FROM ts.Fast",
        EcSqlParams::new(),
    ));

    let from_here = future.get();
    let clone = future.clone();
    let from_there = thread::spawn(move || clone.get()).join().unwrap();

    assert!(Arc::ptr_eq(&from_here, &from_there));
    assert_eq!(future.get().id(), from_here.id());
}

#[test]
fn test_release_drains_pending_requests_as_cancel() {
    let store = fast_store();
    let manager = QueryManager::instance(&store);
    assert!(Arc::ptr_eq(&manager, &QueryManager::instance(&store)));

    manager.reset_config(QueryConfig::default().with_worker_threads(1));

    // Occupy the only worker, then stack up requests behind it.
    let running = manager.enqueue(EcSqlRequest::new(
        "SELECT N FROM ts.Slow",
        EcSqlParams::new(),
    ));
    thread::sleep(Duration::from_millis(150));
    let pending: Vec<_> = (0..5)
        .map(|_| {
            manager.enqueue(EcSqlRequest::new(
                "SELECT N FROM ts.Fast",
                EcSqlParams::new(),
            ))
        })
        .collect();

    QueryManager::release(&store);

    // The in-flight request finished; everything still queued cancelled.
    assert_eq!(running.get().status(), QueryStatus::Done);
    for future in pending {
        assert_eq!(future.get().status(), QueryStatus::Cancel);
    }

    // Enqueue after teardown resolves Cancel instead of hanging.
    let late = manager.enqueue(EcSqlRequest::new(
        "SELECT N FROM ts.Fast",
        EcSqlParams::new(),
    ));
    assert_eq!(late.get().status(), QueryStatus::Cancel);
}

#[test]
fn test_config_reset_applies_to_later_requests_only() {
    let rows = (0..4)
        .map(|i| vec![json!(format!("{}{}", i, "x".repeat(400)))])
        .collect();
    let store = MemoryStoreBuilder::new()
        .statement(
            "SELECT Chunk FROM ts.Payload",
            Script::new(&[("Chunk", "string")], rows),
        )
        .build();
    let manager = QueryManager::new(store, QueryConfig::default());

    let before = manager
        .enqueue(EcSqlRequest::new(
            "SELECT Chunk FROM ts.Payload",
            EcSqlParams::new(),
        ))
        .get();
    assert_eq!(before.status(), QueryStatus::Done);

    let tightened = QueryConfig::default()
        .with_quota(QueryQuota::new(Duration::from_secs(10), 1000));
    manager.reset_config(tightened);
    assert_eq!(manager.config(), tightened);

    let after = manager
        .enqueue(EcSqlRequest::new(
            "SELECT Chunk FROM ts.Payload",
            EcSqlParams::new(),
        ))
        .get();
    assert_eq!(after.status(), QueryStatus::Partial);
}

#[test]
fn test_pool_grows_on_config_reset() {
    let manager = QueryManager::new(
        fast_store(),
        QueryConfig::default().with_worker_threads(1),
    );
    manager.reset_config(QueryConfig::default().with_worker_threads(3));

    // Three slow scans complete in roughly one scan's time when the pool
    // really grew; generously bounded to stay robust on slow machines.
    let started = std::time::Instant::now();
    let futures: Vec<_> = (0..3)
        .map(|_| {
            manager.enqueue(EcSqlRequest::new(
                "SELECT N FROM ts.Slow",
                EcSqlParams::new(),
            ))
        })
        .collect();
    for future in futures {
        assert_eq!(future.get().status(), QueryStatus::Done);
    }
    assert!(started.elapsed() < Duration::from_secs(3));
}
