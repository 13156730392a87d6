//! Whole-stack health and load integration tests

use crate::{credentials, redis_connections_lock, skip_if_not_enabled, target, test_host};
use infra_probe::config::{HealthCheckConfig, LoadConfig, ReadinessConfig};
use infra_probe::load::simulate_load;
use infra_probe::{
    wait_for_service, BackendKind, ConnectOptions, HealthChecker, ServiceStatus,
};
use std::time::Duration;

fn all_targets() -> Vec<infra_probe::ServiceTarget> {
    [
        BackendKind::RelationalPostgres,
        BackendKind::RelationalMysql,
        BackendKind::Document,
        BackendKind::KeyValue,
        BackendKind::MessageQueue,
    ]
    .into_iter()
    .map(target)
    .collect()
}

#[tokio::test]
async fn test_every_port_is_ready() {
    skip_if_not_enabled!();

    for target in all_targets() {
        assert!(
            wait_for_service(target.host(), target.port(), Duration::from_secs(15)).await,
            "{} not reachable",
            target.addr()
        );
    }
}

#[tokio::test]
async fn test_stack_is_healthy() {
    skip_if_not_enabled!();
    let _redis = redis_connections_lock().await;

    let checker = HealthChecker::new(
        HealthCheckConfig::default(),
        ReadinessConfig::default(),
        credentials(),
    )
    .expect("HTTP client should build");
    let report = checker.check_all(all_targets(), Vec::new()).await;

    assert_eq!(report.len(), 5);
    assert!(report.all_healthy(), "{}", report.summary());
}

#[tokio::test]
async fn test_unused_port_is_unavailable() {
    skip_if_not_enabled!();

    let readiness = ReadinessConfig {
        timeout_ms: 1_000,
        ..Default::default()
    };
    let checker = HealthChecker::new(HealthCheckConfig::default(), readiness, credentials())
        .expect("HTTP client should build");
    let down = infra_probe::ServiceTarget::new("down", test_host(), 1, BackendKind::KeyValue)
        .expect("valid target");

    let health = checker.check_target(&down).await;
    assert_eq!(health.status, ServiceStatus::Unavailable);
}

#[tokio::test]
async fn test_load_simulation_passes() {
    skip_if_not_enabled!();
    let _redis = redis_connections_lock().await;

    let report = simulate_load(
        &all_targets(),
        &credentials(),
        &LoadConfig::default(),
        &ConnectOptions::default(),
    )
    .await;

    assert!(report.passed, "{:?}", report);
    assert_eq!(report.targets.len(), 3);
    assert_eq!(report.skipped.len(), 2);
}
