//! Aggregated health checks
//!
//! Every service runs readiness, then connection, then probe on its own task.
//! A semaphore bounds how many run at once. One bad service never stops the
//! others: its failure becomes an entry in the report.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

use crate::backend::{with_connection, ConnectOptions};
use crate::config::{
    CheckDepth, Config, CredentialDefaults, HealthCheckConfig, ReadinessConfig, WebKind,
    WebServiceConfig,
};
use crate::metrics;
use crate::probe;
use crate::readiness::wait_for_service_with;
use crate::target::ServiceTarget;
use crate::web::{self, BasicAuth, HttpProber, WebError};

use super::state::{HealthReport, ServiceHealth, ServiceStatus};

/// Runs checks for data services and web services
#[derive(Clone)]
pub struct HealthChecker {
    config: HealthCheckConfig,
    readiness: ReadinessConfig,
    credentials: Arc<CredentialDefaults>,
    prober: HttpProber,
}

impl HealthChecker {
    pub fn new(
        config: HealthCheckConfig,
        readiness: ReadinessConfig,
        credentials: CredentialDefaults,
    ) -> Result<Self, WebError> {
        Ok(Self {
            config,
            readiness,
            credentials: Arc::new(credentials),
            prober: HttpProber::new()?,
        })
    }

    /// Build from a loaded configuration
    ///
    /// `credentials` usually comes from the environment; values in the config
    /// file take precedence over it.
    pub fn from_config(config: &Config, credentials: &CredentialDefaults) -> Result<Self, WebError> {
        Self::new(
            config.health.clone(),
            config.readiness.clone(),
            config.credentials.or(credentials),
        )
    }

    pub fn with_prober(mut self, prober: HttpProber) -> Self {
        self.prober = prober;
        self
    }

    pub fn config(&self) -> &HealthCheckConfig {
        &self.config
    }

    /// Readiness, then connection, then liveness or functional probe
    pub async fn check_target(&self, target: &ServiceTarget) -> ServiceHealth {
        let started = Instant::now();
        let kind = target.kind().as_str();
        let health = |status| ServiceHealth::new(status, kind, target.addr());

        let timeout = self.readiness.timeout();
        if !wait_for_service_with(target.host(), target.port(), timeout, &self.readiness).await {
            return health(ServiceStatus::Unavailable)
                .with_detail(format!(
                    "{} not reachable within {}ms",
                    target.addr(),
                    timeout.as_millis()
                ))
                .with_elapsed(started.elapsed());
        }

        let options = ConnectOptions::from(&self.config);
        let outcome = match self.config.depth {
            CheckDepth::Liveness => {
                with_connection(target, &self.credentials, &options, |conn| {
                    Box::pin(conn.ping())
                })
                .await
                .map(|()| None)
            }
            CheckDepth::Functional => {
                with_connection(target, &self.credentials, &options, |conn| {
                    Box::pin(probe::run(conn))
                })
                .await
                .map(Some)
            }
        };

        let result = match outcome {
            Ok(None) => health(ServiceStatus::Healthy),
            Ok(Some(report)) if report.all_passed() => {
                health(ServiceStatus::Healthy).with_probe(report)
            }
            Ok(Some(report)) => health(ServiceStatus::Error)
                .with_detail(format!("failed checks: {}", report.failed_keys().join(", ")))
                .with_probe(report),
            Err(e) => health(ServiceStatus::Error).with_detail(e.to_string()),
        };
        result.with_elapsed(started.elapsed())
    }

    /// HTTP readiness, primary endpoint status, then the service's catalog
    ///
    /// Any failed catalog check makes the service [`ServiceStatus::Error`].
    pub async fn check_web(&self, service: &WebServiceConfig) -> ServiceHealth {
        let started = Instant::now();
        let url = service.endpoint_url();
        let auth = service.auth().map(BasicAuth::from);
        let health = |status| ServiceHealth::new(status, web_kind_label(service.kind), url.clone());

        let timeout = self.config.web_timeout();
        if !self
            .prober
            .wait_for_web_service(&url, timeout, auth.as_ref())
            .await
        {
            return health(ServiceStatus::Unavailable)
                .with_detail(format!("{} did not answer within {}ms", url, timeout.as_millis()))
                .with_elapsed(started.elapsed());
        }

        let mut result = match self.prober.get(&url, auth.as_ref()).await {
            Ok(response) if response.status < 400 => health(ServiceStatus::Healthy),
            Ok(response) => {
                health(ServiceStatus::Error).with_detail(format!("HTTP {}", response.status))
            }
            Err(e) => health(ServiceStatus::Error).with_detail(e.to_string()),
        };

        if let Some(name) = &service.catalog {
            match web::catalog(name) {
                Some(checks) => {
                    let report = web::run_catalog(
                        &self.prober,
                        &service.name,
                        &service.url,
                        checks,
                        auth.as_ref(),
                        self.credentials.vault_token.as_deref(),
                    )
                    .await;
                    let failed = report.failed_keys();
                    if !failed.is_empty() {
                        result.status = ServiceStatus::Error;
                        if result.detail.is_none() {
                            result.detail = Some(format!("failed checks: {}", failed.join(", ")));
                        }
                    }
                    result = result.with_web(report);
                }
                None => {
                    warn!(service = %service.name, catalog = %name, "Unknown endpoint catalog");
                    result.status = ServiceStatus::Error;
                    result = result.with_detail(format!("unknown catalog {}", name));
                }
            }
        }

        result.with_elapsed(started.elapsed())
    }

    /// Check every target and web service on the worker pool
    pub async fn check_all(
        &self,
        targets: Vec<ServiceTarget>,
        web_services: Vec<WebServiceConfig>,
    ) -> HealthReport {
        let mut jobs: Vec<(String, Job)> = Vec::with_capacity(targets.len() + web_services.len());
        jobs.extend(
            targets
                .into_iter()
                .map(|t| (t.name().to_string(), Job::Data(t))),
        );
        jobs.extend(
            web_services
                .into_iter()
                .map(|w| (w.name.clone(), Job::Web(w))),
        );

        let checker = self.clone();
        let report = run_bounded(self.config.max_workers, jobs, move |job| {
            let checker = checker.clone();
            async move {
                match job {
                    Job::Data(target) => checker.check_target(&target).await,
                    Job::Web(service) => checker.check_web(&service).await,
                }
            }
        })
        .await;

        metrics::metrics().set_services_by_status(
            report.count(ServiceStatus::Healthy) as i64,
            report.count(ServiceStatus::Unavailable) as i64,
            report.count(ServiceStatus::Error) as i64,
        );
        report
    }
}

enum Job {
    Data(ServiceTarget),
    Web(WebServiceConfig),
}

fn web_kind_label(kind: WebKind) -> &'static str {
    match kind {
        WebKind::Web => "web",
        WebKind::Metrics => "metrics",
        WebKind::Security => "security",
    }
}

/// Run one check per named job with at most `max_workers` in flight
///
/// A job whose task panics is reported as [`ServiceStatus::Error`].
pub async fn run_bounded<J, F, Fut>(
    max_workers: usize,
    jobs: Vec<(String, J)>,
    check: F,
) -> HealthReport
where
    J: Send + 'static,
    F: Fn(J) -> Fut,
    Fut: Future<Output = ServiceHealth> + Send + 'static,
{
    let started = Instant::now();
    let semaphore = Arc::new(Semaphore::new(max_workers.max(1)));
    let mut tasks = JoinSet::new();
    let mut pending: HashSet<String> = HashSet::new();

    for (name, job) in jobs {
        if !pending.insert(name.clone()) {
            warn!(service = %name, "Duplicate service name, skipping");
            continue;
        }
        let semaphore = semaphore.clone();
        let fut = check(job);
        tasks.spawn(async move {
            let _permit = semaphore.acquire_owned().await.ok();
            debug!(service = %name, "Check started");
            (name, fut.await)
        });
    }

    let mut report = HealthReport::default();
    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok((name, health)) => {
                info!(
                    service = %name,
                    status = %health.status,
                    elapsed_ms = health.elapsed_ms,
                    "Check finished"
                );
                pending.remove(&name);
                report.insert(name, health);
            }
            Err(e) => {
                warn!(error = %e, "Check task failed");
            }
        }
    }

    // Tasks that panicked never reported back
    for name in pending {
        report.insert(
            name,
            ServiceHealth::new(ServiceStatus::Error, "unknown", "")
                .with_detail("check task panicked"),
        );
    }

    report.elapsed_ms = started.elapsed().as_millis() as u64;
    report
}
