//! Key-value integration tests

use std::time::Duration;

use crate::{credentials, redis_connections_lock, skip_if_not_enabled, target};
use infra_probe::metrics::metrics;
use infra_probe::probe::{self, ProbeResult};
use infra_probe::{with_connection, BackendKind, ConnectOptions, ConnectionError};

fn redis_closed() -> u64 {
    metrics()
        .connections_closed_total
        .with_label_values(&["redis"])
        .get()
}

#[tokio::test]
async fn test_redis_operations_all_passed() {
    skip_if_not_enabled!();
    let _redis = redis_connections_lock().await;

    let result = with_connection(
        &target(BackendKind::KeyValue),
        &credentials(),
        &ConnectOptions::default(),
        |conn| Box::pin(probe::run(conn)),
    )
    .await
    .expect("Redis operations should run");

    assert!(matches!(result, ProbeResult::KeyValue(_)));
    assert!(result.all_passed(), "failed: {:?}", result.failed_keys());
}

#[tokio::test]
async fn test_redis_other_database() {
    skip_if_not_enabled!();
    let _redis = redis_connections_lock().await;

    let target = target(BackendKind::KeyValue).with_redis_db(1);
    let result = with_connection(&target, &credentials(), &ConnectOptions::default(), |conn| {
        Box::pin(probe::run(conn))
    })
    .await
    .expect("Redis operations should run on db 1");
    assert!(result.all_passed());
}

#[tokio::test]
async fn test_connection_closed_when_scope_fails() {
    skip_if_not_enabled!();
    let _redis = redis_connections_lock().await;

    let before = redis_closed();
    let result: Result<(), ConnectionError> = with_connection(
        &target(BackendKind::KeyValue),
        &credentials(),
        &ConnectOptions::default(),
        |conn| {
            Box::pin(async move {
                assert_eq!(conn.kind(), BackendKind::KeyValue);
                Err(ConnectionError::operation(BackendKind::KeyValue, "scope failed"))
            })
        },
    )
    .await;

    let err = result.unwrap_err();
    assert!(matches!(err, ConnectionError::Operation { .. }), "{}", err);
    assert!(err.to_string().contains("scope failed"));
    assert_eq!(redis_closed(), before + 1);
}

#[tokio::test]
async fn test_connection_closed_when_scope_is_cancelled() {
    skip_if_not_enabled!();
    let _redis = redis_connections_lock().await;

    let target = target(BackendKind::KeyValue);
    let credentials = credentials();
    let options = ConnectOptions::default();

    let before = redis_closed();
    let scoped = with_connection(&target, &credentials, &options, |_conn| {
        Box::pin(async {
            tokio::time::sleep(Duration::from_secs(30)).await;
            Ok(())
        })
    });

    // Timing out drops the scope while the closure is still running
    let outcome = tokio::time::timeout(Duration::from_secs(3), scoped).await;
    assert!(outcome.is_err(), "scope should still be running at the deadline");
    assert_eq!(redis_closed(), before + 1);
}
