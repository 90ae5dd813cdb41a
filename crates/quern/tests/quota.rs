//! Quota enforcement: Partial on progress, Timeout on none.

use quern::{
    EcSqlParams, EcSqlRequest, QueryConfig, QueryManager, QueryQuota, QueryStatus, QueryStore,
};
use quern_test_utils::{MemoryStoreBuilder, Script};
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;

fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

fn manager_for(store: Arc<dyn QueryStore>, quota: QueryQuota) -> Arc<QueryManager> {
    QueryManager::new(
        store,
        QueryConfig::default()
            .with_quota(quota)
            .with_worker_threads(2),
    )
}

/// Four rows of ~400 serialized bytes each; cumulative size crosses a
/// 1000-byte budget at the third row.
fn growing_rows_store() -> Arc<dyn QueryStore> {
    let rows = (0..4)
        .map(|i| vec![json!(format!("{}{}", i, "x".repeat(400)))])
        .collect();
    MemoryStoreBuilder::new()
        .statement(
            "SELECT Chunk FROM ts.Payload",
            Script::new(&[("Chunk", "string")], rows),
        )
        .build()
}

#[test]
fn test_memory_budget_truncates_to_partial() {
    init_tracing();
    let manager = manager_for(
        growing_rows_store(),
        QueryQuota::new(Duration::from_secs(10), 1000),
    );

    let response = manager
        .enqueue(EcSqlRequest::new(
            "SELECT Chunk FROM ts.Payload",
            EcSqlParams::new(),
        ))
        .get();

    assert_eq!(response.status(), QueryStatus::Partial);
    let rows = response.rows().expect("partial payload carries rows");
    assert!(rows.row_count() >= 1);
    assert!(rows.row_count() < 4, "payload must be a strict prefix");
    assert!(response.stats().mem_used() > 1000);

    // The prefix preserves execution order.
    for (i, row) in rows.rows.iter().enumerate() {
        let cell = row[0].as_str().unwrap();
        assert!(cell.starts_with(&i.to_string()));
    }
}

#[test]
fn test_time_budget_truncates_to_partial() {
    init_tracing();
    let rows = (0..10).map(|i| vec![json!(i)]).collect();
    let store = MemoryStoreBuilder::new()
        .statement(
            "SELECT N FROM ts.Slow",
            Script::new(&[("N", "int")], rows).with_row_cost(Duration::from_millis(500)),
        )
        .build();
    let manager = manager_for(store, QueryQuota::new(Duration::from_secs(1), 1_000_000));

    let response = manager
        .enqueue(EcSqlRequest::new("SELECT N FROM ts.Slow", EcSqlParams::new()))
        .get();

    assert_eq!(response.status(), QueryStatus::Partial);
    let rows = response.rows().unwrap();
    assert!(rows.row_count() >= 1);
    assert!(rows.row_count() < 10, "time budget must stop the scan early");
}

#[test]
fn test_delay_exceeding_budget_is_timeout() {
    init_tracing();
    let store = MemoryStoreBuilder::new()
        .statement(
            "SELECT N FROM ts.Quick",
            Script::new(&[("N", "int")], vec![vec![json!(1)]]),
        )
        .build();
    let manager = manager_for(store, QueryQuota::new(Duration::from_millis(500), 1024));

    let response = manager
        .enqueue(
            EcSqlRequest::new("SELECT N FROM ts.Quick", EcSqlParams::new())
                .with_delay(Duration::from_millis(2000)),
        )
        .get();

    assert_eq!(response.status(), QueryStatus::Timeout);
    assert!(response.rows().is_none(), "timeout carries no payload");
    assert!(response.stats().total_time() >= Duration::from_millis(2000));
}

#[test]
fn test_delay_within_budget_completes() {
    init_tracing();
    let store = MemoryStoreBuilder::new()
        .statement(
            "SELECT N FROM ts.Quick",
            Script::new(&[("N", "int")], vec![vec![json!(1)]]),
        )
        .build();
    let manager = manager_for(store, QueryQuota::default());

    let delay = Duration::from_millis(500);
    let response = manager
        .enqueue(
            EcSqlRequest::new("SELECT N FROM ts.Quick", EcSqlParams::new()).with_delay(delay),
        )
        .get();

    assert_eq!(response.status(), QueryStatus::Done);
    assert_eq!(response.rows().unwrap().row_count(), 1);
    assert!(response.stats().total_time() > delay);
}

#[test]
fn test_ignore_delay_bypasses_injected_delay() {
    init_tracing();
    let store = MemoryStoreBuilder::new()
        .statement(
            "SELECT N FROM ts.Quick",
            Script::new(&[("N", "int")], vec![vec![json!(1)]]),
        )
        .build();
    let manager = QueryManager::new(
        store,
        QueryConfig::default()
            .with_quota(QueryQuota::new(Duration::from_secs(2), 1024))
            .with_ignore_delay(true),
    );

    let response = manager
        .enqueue(
            EcSqlRequest::new("SELECT N FROM ts.Quick", EcSqlParams::new())
                .with_delay(Duration::from_secs(30)),
        )
        .get();

    assert_eq!(response.status(), QueryStatus::Done);
    assert!(response.stats().total_time() < Duration::from_secs(2));
}

#[test]
fn test_empty_result_is_done_with_columns() {
    init_tracing();
    let store = MemoryStoreBuilder::new()
        .statement(
            "SELECT N FROM ts.Nothing",
            Script::new(&[("N", "int")], Vec::new()),
        )
        .build();
    let manager = manager_for(store, QueryQuota::default());

    let response = manager
        .enqueue(EcSqlRequest::new(
            "SELECT N FROM ts.Nothing",
            EcSqlParams::new(),
        ))
        .get();

    assert_eq!(response.status(), QueryStatus::Done);
    let rows = response.rows().unwrap();
    assert!(rows.is_empty());
    assert_eq!(rows.columns.len(), 1);
    assert_eq!(rows.columns[0].name, "N");
}

#[test]
fn test_bad_statement_errors_without_killing_the_pool() {
    init_tracing();
    let store = MemoryStoreBuilder::new()
        .statement(
            "SELECT N FROM ts.Quick",
            Script::new(&[("N", "int")], vec![vec![json!(1)]]),
        )
        .build();
    let manager = manager_for(store, QueryQuota::default());

    let failed = manager
        .enqueue(EcSqlRequest::new("SELEKT oops", EcSqlParams::new()))
        .get();
    assert_eq!(failed.status(), QueryStatus::Error);
    assert!(failed.error_message().unwrap().contains("SELEKT oops"));

    // The pool keeps serving after a bad request.
    let ok = manager
        .enqueue(EcSqlRequest::new("SELECT N FROM ts.Quick", EcSqlParams::new()))
        .get();
    assert_eq!(ok.status(), QueryStatus::Done);
}
