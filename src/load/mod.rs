//! Concurrent load simulation
//!
//! Several workers per target each open their own scoped connection and run a
//! burst of round-trips. Relational targets answer `SELECT i`, key-value
//! targets do SET/GET/DEL on per-worker keys. Other kinds are skipped.

use std::collections::BTreeMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use serde::Serialize;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backend::{with_connection, ConnectOptions, Connection, ConnectionError};
use crate::config::{CredentialDefaults, LoadConfig};
use crate::metrics;
use crate::target::{BackendKind, ServiceTarget};

/// Per-target worker tally
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct TargetLoad {
    pub kind: String,
    pub workers: usize,
    pub successful: usize,
    /// Round-trips completed by successful workers
    pub round_trips: usize,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct LoadReport {
    pub targets: BTreeMap<String, TargetLoad>,
    /// Targets whose kind has no load workload
    pub skipped: Vec<String>,
    pub elapsed_ms: u64,
    pub within_budget: bool,
    pub passed: bool,
}

impl LoadReport {
    /// Targets that fell short of the successful-worker threshold
    pub fn failed_targets(&self, min_successful: usize) -> Vec<&str> {
        self.targets
            .iter()
            .filter(|(_, t)| t.successful < min_successful)
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Kinds with a load workload
pub fn supports_load(kind: BackendKind) -> bool {
    matches!(
        kind,
        BackendKind::RelationalPostgres | BackendKind::RelationalMysql | BackendKind::KeyValue
    )
}

/// Run the load simulation against every supported target
pub async fn simulate_load(
    targets: &[ServiceTarget],
    defaults: &CredentialDefaults,
    config: &LoadConfig,
    options: &ConnectOptions,
) -> LoadReport {
    let defaults = Arc::new(defaults.clone());
    let options = *options;
    let relational_rounds = config.relational_rounds;
    let key_value_rounds = config.key_value_rounds;

    run_workers(targets.to_vec(), config, move |target, worker| {
        let defaults = defaults.clone();
        async move {
            let rounds = match target.kind() {
                BackendKind::KeyValue => key_value_rounds,
                _ => relational_rounds,
            };
            with_connection(&target, &defaults, &options, |conn| {
                Box::pin(round_trips(conn, worker, rounds))
            })
            .await
            .map_err(|e| e.to_string())
        }
    })
    .await
}

/// Start `workers_per_target` workers per supported target and tally them
///
/// A worker returns the number of round-trips it completed. Workers still
/// running when `max_duration` expires are aborted and count as failed.
pub async fn run_workers<F, Fut>(
    targets: Vec<ServiceTarget>,
    config: &LoadConfig,
    worker: F,
) -> LoadReport
where
    F: Fn(ServiceTarget, usize) -> Fut,
    Fut: Future<Output = Result<usize, String>> + Send + 'static,
{
    let started = Instant::now();
    let deadline = tokio::time::Instant::now() + config.max_duration();
    let semaphore = Arc::new(Semaphore::new(config.max_workers.max(1)));
    let mut report = LoadReport::default();
    let mut tasks = JoinSet::new();

    for target in targets {
        if !supports_load(target.kind()) {
            debug!(service = %target.name(), kind = target.kind().as_str(), "No load workload, skipping");
            report.skipped.push(target.name().to_string());
            continue;
        }
        report.targets.insert(
            target.name().to_string(),
            TargetLoad {
                kind: target.kind().as_str().to_string(),
                workers: config.workers_per_target,
                ..Default::default()
            },
        );

        for id in 0..config.workers_per_target {
            let semaphore = semaphore.clone();
            let name = target.name().to_string();
            let fut = worker(target.clone(), id);
            tasks.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok();
                (name, id, fut.await)
            });
        }
    }

    let mut within_budget = true;
    loop {
        match tokio::time::timeout_at(deadline, tasks.join_next()).await {
            Ok(Some(Ok((name, id, outcome)))) => {
                let Some(tally) = report.targets.get_mut(&name) else {
                    continue;
                };
                match outcome {
                    Ok(round_trips) => {
                        tally.successful += 1;
                        tally.round_trips += round_trips;
                    }
                    Err(e) => {
                        warn!(service = %name, worker = id, error = %e, "Load worker failed");
                        tally.errors.push(e);
                    }
                }
            }
            Ok(Some(Err(e))) => warn!(error = %e, "Load worker task failed"),
            Ok(None) => break,
            Err(_) => {
                warn!(
                    unfinished = tasks.len(),
                    budget_ms = config.max_duration_ms,
                    "Load simulation exceeded its time budget"
                );
                tasks.abort_all();
                within_budget = false;
                break;
            }
        }
    }

    let elapsed = started.elapsed();
    let failed: Vec<String> = report
        .failed_targets(config.min_successful_workers)
        .into_iter()
        .map(String::from)
        .collect();
    report.elapsed_ms = elapsed.as_millis() as u64;
    report.within_budget = within_budget;
    report.passed = within_budget && failed.is_empty();

    let outcome = if report.passed { "passed" } else { "failed" };
    let failed: Vec<&str> = failed.iter().map(String::as_str).collect();
    metrics::metrics().record_probe("load", outcome, elapsed, &failed);
    info!(
        targets = report.targets.len(),
        skipped = report.skipped.len(),
        elapsed_ms = report.elapsed_ms,
        passed = report.passed,
        "Load simulation finished"
    );
    report
}

async fn round_trips(
    conn: &mut Connection,
    worker: usize,
    rounds: usize,
) -> Result<usize, ConnectionError> {
    let kind = conn.kind();
    let op_err = |e: &dyn std::fmt::Display| ConnectionError::operation(kind, e);

    for i in 0..rounds {
        let matched = match &mut *conn {
            Connection::Postgres(pg) => {
                let row = pg
                    .client()?
                    .query_one(format!("SELECT {}::INT4", i).as_str(), &[])
                    .await
                    .map_err(|e| op_err(&e))?;
                let value: i32 = row.try_get(0).map_err(|e| op_err(&e))?;
                value as usize == i
            }
            Connection::Mysql(my) => {
                use mysql_async::prelude::Queryable;
                let value: Option<i64> = my
                    .conn()?
                    .query_first(format!("SELECT {}", i))
                    .await
                    .map_err(|e| op_err(&e))?;
                value == Some(i as i64)
            }
            Connection::Redis(redis) => {
                use fred::prelude::*;
                let client = redis.client()?;
                let key = format!("load_test_{}_{}", worker, i);
                let value = format!("value_{}", i);
                client
                    .set::<(), _, _>(key.as_str(), value.as_str(), None, None, false)
                    .await
                    .map_err(|e| op_err(&e))?;
                let got: Option<String> = client.get(key.as_str()).await.map_err(|e| op_err(&e))?;
                client
                    .del::<i64, _>(key.as_str())
                    .await
                    .map_err(|e| op_err(&e))?;
                got.as_deref() == Some(value.as_str())
            }
            Connection::Mongo(_) | Connection::RabbitMq(_) => {
                return Err(ConnectionError::operation(kind, "no load workload for this backend"));
            }
        };
        if !matched {
            return Err(ConnectionError::operation(
                kind,
                format!("round-trip {} returned an unexpected value", i),
            ));
        }
    }
    Ok(rounds)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    fn target(name: &str, kind: BackendKind) -> ServiceTarget {
        ServiceTarget::new(name, "127.0.0.1", kind.default_port(), kind).unwrap()
    }

    fn config() -> LoadConfig {
        LoadConfig {
            max_duration_ms: 5_000,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_all_workers_succeed() {
        let targets = vec![
            target("pg", BackendKind::RelationalPostgres),
            target("redis", BackendKind::KeyValue),
        ];
        let report = run_workers(targets, &config(), |_, _| async { Ok(10) }).await;

        assert!(report.passed);
        assert!(report.within_budget);
        assert_eq!(report.targets["pg"].successful, 3);
        assert_eq!(report.targets["redis"].round_trips, 30);
    }

    #[tokio::test]
    async fn test_two_of_three_is_enough() {
        let targets = vec![target("mysql", BackendKind::RelationalMysql)];
        let report = run_workers(targets, &config(), |_, id| async move {
            if id == 0 {
                Err("connection refused".to_string())
            } else {
                Ok(10)
            }
        })
        .await;

        assert!(report.passed);
        let tally = &report.targets["mysql"];
        assert_eq!(tally.successful, 2);
        assert_eq!(tally.errors, vec!["connection refused".to_string()]);
    }

    #[tokio::test]
    async fn test_one_of_three_fails() {
        let targets = vec![target("mysql", BackendKind::RelationalMysql)];
        let report = run_workers(targets, &config(), |_, id| async move {
            if id == 0 {
                Ok(10)
            } else {
                Err("boom".to_string())
            }
        })
        .await;

        assert!(!report.passed);
        assert_eq!(report.failed_targets(2), vec!["mysql"]);
    }

    #[tokio::test]
    async fn test_unsupported_kinds_are_skipped() {
        let calls = Arc::new(AtomicUsize::new(0));
        let targets = vec![
            target("mongo", BackendKind::Document),
            target("rabbit", BackendKind::MessageQueue),
        ];
        let counter = calls.clone();
        let report = run_workers(targets, &config(), move |_, _| {
            counter.fetch_add(1, Ordering::SeqCst);
            async { Ok(1) }
        })
        .await;

        assert!(report.targets.is_empty());
        assert_eq!(report.skipped, vec!["mongo".to_string(), "rabbit".to_string()]);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(report.passed);
    }

    #[tokio::test]
    async fn test_budget_exceeded_fails_run() {
        let targets = vec![target("pg", BackendKind::RelationalPostgres)];
        let config = LoadConfig {
            max_duration_ms: 100,
            ..Default::default()
        };
        let started = Instant::now();
        let report = run_workers(targets, &config, |_, _| async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;

        assert!(started.elapsed() < Duration::from_secs(2));
        assert!(!report.within_budget);
        assert!(!report.passed);
        assert_eq!(report.targets["pg"].successful, 0);
    }

    #[tokio::test]
    async fn test_workers_bounded_by_max_workers() {
        let running = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        let targets = vec![
            target("pg", BackendKind::RelationalPostgres),
            target("mysql", BackendKind::RelationalMysql),
            target("redis", BackendKind::KeyValue),
        ];
        let config = LoadConfig {
            max_workers: 4,
            ..config()
        };

        let report = run_workers(targets, &config, |_, _| {
            let running = running.clone();
            let peak = peak.clone();
            async move {
                let now = running.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(20)).await;
                running.fetch_sub(1, Ordering::SeqCst);
                Ok(1)
            }
        })
        .await;

        assert!(report.passed);
        assert!(peak.load(Ordering::SeqCst) <= 4);
    }

    #[test]
    fn test_supports_load() {
        assert!(supports_load(BackendKind::RelationalPostgres));
        assert!(supports_load(BackendKind::KeyValue));
        assert!(!supports_load(BackendKind::Document));
        assert!(!supports_load(BackendKind::MessageQueue));
    }
}
