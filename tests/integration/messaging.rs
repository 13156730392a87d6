//! Message queue integration tests

use crate::{credentials, skip_if_not_enabled, target};
use infra_probe::probe::{self, ProbeResult};
use infra_probe::{with_connection, BackendKind, ConnectOptions};

#[tokio::test]
async fn test_rabbitmq_basic_all_passed() {
    skip_if_not_enabled!();

    let result = with_connection(
        &target(BackendKind::MessageQueue),
        &credentials(),
        &ConnectOptions::default(),
        |conn| Box::pin(probe::run(conn)),
    )
    .await
    .expect("RabbitMQ round-trip should run");

    assert!(matches!(result, ProbeResult::Messaging(_)));
    assert!(result.all_passed(), "failed: {:?}", result.failed_keys());
}

#[tokio::test]
async fn test_rabbitmq_routing() {
    skip_if_not_enabled!();

    let result = with_connection(
        &target(BackendKind::MessageQueue),
        &credentials(),
        &ConnectOptions::default(),
        |conn| Box::pin(probe::run_routing(conn)),
    )
    .await
    .expect("RabbitMQ routing should run");

    assert_eq!(result.get("direct_routing"), Some(true));
    assert_eq!(result.get("topic_routing"), Some(true));
}

#[tokio::test]
async fn test_rabbitmq_persistence() {
    skip_if_not_enabled!();

    let result = with_connection(
        &target(BackendKind::MessageQueue),
        &credentials(),
        &ConnectOptions::default(),
        |conn| Box::pin(probe::run_persistence(conn)),
    )
    .await
    .expect("RabbitMQ persistence check should run");

    assert!(matches!(result, ProbeResult::Persistence(_)));
    assert!(result.all_passed(), "failed: {:?}", result.failed_keys());
}
