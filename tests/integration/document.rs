//! Document store probe integration tests

use crate::{credentials, skip_if_not_enabled, target};
use infra_probe::probe::{self, ProbeResult};
use infra_probe::{with_connection, BackendKind, ConnectOptions};

#[tokio::test]
async fn test_mongodb_crud_all_passed() {
    skip_if_not_enabled!();

    let result = with_connection(
        &target(BackendKind::Document),
        &credentials(),
        &ConnectOptions::default(),
        |conn| Box::pin(probe::run(conn)),
    )
    .await
    .expect("MongoDB probe should run");

    assert!(matches!(result, ProbeResult::Crud(_)));
    assert!(result.all_passed(), "failed: {:?}", result.failed_keys());
}

#[tokio::test]
async fn test_mongodb_ping() {
    skip_if_not_enabled!();

    with_connection(
        &target(BackendKind::Document),
        &credentials(),
        &ConnectOptions::default(),
        |conn| Box::pin(conn.ping()),
    )
    .await
    .expect("MongoDB should answer isMaster");
}
