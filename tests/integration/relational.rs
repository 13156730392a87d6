//! Relational probe integration tests

use crate::{credentials, mysql_conn, skip_if_not_enabled, target};
use infra_probe::backend::{ConnectOptions, Connection};
use infra_probe::probe::{self, relational::TEST_TABLE, ProbeResult};
use infra_probe::{with_connection, BackendKind};
use mysql::prelude::*;

#[tokio::test]
async fn test_postgres_crud_all_passed() {
    skip_if_not_enabled!();

    let result = with_connection(
        &target(BackendKind::RelationalPostgres),
        &credentials(),
        &ConnectOptions::default(),
        |conn| Box::pin(probe::run(conn)),
    )
    .await
    .expect("PostgreSQL probe should run");

    assert!(matches!(result, ProbeResult::Crud(_)));
    assert!(result.all_passed(), "failed: {:?}", result.failed_keys());
}

#[tokio::test]
async fn test_postgres_crud_is_repeatable() {
    skip_if_not_enabled!();

    let defaults = credentials();
    let target = target(BackendKind::RelationalPostgres);
    for _ in 0..2 {
        let result = with_connection(&target, &defaults, &ConnectOptions::default(), |conn| {
            Box::pin(probe::run(conn))
        })
        .await
        .expect("PostgreSQL probe should run");
        assert!(result.all_passed());
    }
}

#[tokio::test]
async fn test_mysql_crud_leaves_no_table_behind() {
    skip_if_not_enabled!();

    let result = with_connection(
        &target(BackendKind::RelationalMysql),
        &credentials(),
        &ConnectOptions::default(),
        |conn| Box::pin(probe::run(conn)),
    )
    .await
    .expect("MySQL probe should run");
    assert!(result.all_passed(), "failed: {:?}", result.failed_keys());

    // Verify through an independent client
    let tables: Vec<String> = tokio::task::spawn_blocking(|| {
        let mut conn = mysql_conn();
        conn.query(format!("SHOW TABLES LIKE '{}'", TEST_TABLE))
            .expect("SHOW TABLES should succeed")
    })
    .await
    .unwrap();
    assert!(tables.is_empty(), "scratch table still exists");
}

#[tokio::test]
async fn test_connection_closed_after_scope() {
    skip_if_not_enabled!();

    let mut conn = Connection::open(
        &target(BackendKind::RelationalMysql),
        &credentials(),
        &ConnectOptions::default(),
    )
    .await
    .expect("MySQL should accept the connection");
    conn.ping().await.expect("ping should succeed");

    conn.close().await;
    assert!(conn.is_closed());
    assert!(conn.ping().await.is_err());
    // Second close is a no-op
    conn.close().await;
}

#[tokio::test]
async fn test_wrong_password_is_connect_error() {
    skip_if_not_enabled!();

    let mut defaults = credentials();
    defaults.postgres.password = Some("definitely-wrong".to_string());

    let err = Connection::open(
        &target(BackendKind::RelationalPostgres),
        &defaults,
        &ConnectOptions::default(),
    )
    .await
    .err()
    .expect("wrong password must be rejected");
    assert_eq!(err.backend(), BackendKind::RelationalPostgres);
}
