//! Health report types

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use serde::Serialize;

use crate::probe::ProbeResult;
use crate::web::WebReport;

/// Health status of one service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceStatus {
    /// Reachable and every check passed
    Healthy,
    /// Port or URL never answered within the readiness budget
    Unavailable,
    /// Answered, but a connection, operation or check failed
    Error,
}

impl ServiceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Healthy => "healthy",
            Self::Unavailable => "unavailable",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for ServiceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.pad(self.as_str())
    }
}

/// Outcome for one service
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ServiceHealth {
    pub status: ServiceStatus,
    /// Backend or web kind label
    pub kind: String,
    /// host:port or URL that was checked
    pub target: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detail: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub probe: Option<ProbeResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub web: Option<WebReport>,
    pub elapsed_ms: u64,
}

impl ServiceHealth {
    pub fn new(status: ServiceStatus, kind: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            status,
            kind: kind.into(),
            target: target.into(),
            detail: None,
            probe: None,
            web: None,
            elapsed_ms: 0,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(detail.into());
        self
    }

    pub fn with_probe(mut self, probe: ProbeResult) -> Self {
        self.probe = Some(probe);
        self
    }

    pub fn with_web(mut self, web: WebReport) -> Self {
        self.web = Some(web);
        self
    }

    pub fn with_elapsed(mut self, elapsed: Duration) -> Self {
        self.elapsed_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn is_healthy(&self) -> bool {
        self.status == ServiceStatus::Healthy
    }
}

/// Per-service outcomes of one run, keyed by service name
#[derive(Debug, Clone, Default, Serialize)]
pub struct HealthReport {
    pub services: BTreeMap<String, ServiceHealth>,
    pub elapsed_ms: u64,
}

impl HealthReport {
    pub fn insert(&mut self, name: impl Into<String>, health: ServiceHealth) {
        self.services.insert(name.into(), health);
    }

    pub fn get(&self, name: &str) -> Option<&ServiceHealth> {
        self.services.get(name)
    }

    pub fn len(&self) -> usize {
        self.services.len()
    }

    pub fn is_empty(&self) -> bool {
        self.services.is_empty()
    }

    pub fn count(&self, status: ServiceStatus) -> usize {
        self.services.values().filter(|h| h.status == status).count()
    }

    pub fn all_healthy(&self) -> bool {
        self.services.values().all(ServiceHealth::is_healthy)
    }

    /// Names of services that are not healthy
    pub fn unhealthy(&self) -> Vec<&str> {
        self.services
            .iter()
            .filter(|(_, h)| !h.is_healthy())
            .map(|(name, _)| name.as_str())
            .collect()
    }

    /// Human-readable multi-line summary
    pub fn summary(&self) -> String {
        let mut out = String::new();
        for (name, health) in &self.services {
            let marker = if health.is_healthy() { "ok" } else { "FAIL" };
            out.push_str(&format!(
                "[{:>4}] {:<32} {:<11} {:<10} {:>6}ms",
                marker, name, health.status, health.kind, health.elapsed_ms
            ));
            if let Some(detail) = &health.detail {
                out.push_str(&format!("  {}", detail));
            }
            out.push('\n');
        }
        out.push_str(&format!(
            "{} services: {} healthy, {} unavailable, {} error ({}ms)\n",
            self.len(),
            self.count(ServiceStatus::Healthy),
            self.count(ServiceStatus::Unavailable),
            self.count(ServiceStatus::Error),
            self.elapsed_ms
        ));
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::CrudReport;

    fn sample() -> HealthReport {
        let mut report = HealthReport::default();
        report.insert(
            "pg",
            ServiceHealth::new(ServiceStatus::Healthy, "postgres", "localhost:5432")
                .with_probe(ProbeResult::Crud(CrudReport {
                    create: true,
                    read: true,
                    update: true,
                    delete: true,
                })),
        );
        report.insert(
            "redis",
            ServiceHealth::new(ServiceStatus::Unavailable, "redis", "localhost:6379")
                .with_detail("not reachable"),
        );
        report
    }

    #[test]
    fn test_counts_and_unhealthy() {
        let report = sample();
        assert_eq!(report.len(), 2);
        assert_eq!(report.count(ServiceStatus::Healthy), 1);
        assert_eq!(report.count(ServiceStatus::Unavailable), 1);
        assert!(!report.all_healthy());
        assert_eq!(report.unhealthy(), vec!["redis"]);
    }

    #[test]
    fn test_summary_mentions_every_service() {
        let summary = sample().summary();
        assert!(summary.contains("pg"));
        assert!(summary.contains("not reachable"));
        assert!(summary.contains("2 services: 1 healthy, 1 unavailable, 0 error"));
    }

    #[test]
    fn test_json_shape() {
        let json = serde_json::to_value(sample()).unwrap();
        assert_eq!(json["services"]["pg"]["status"], "healthy");
        assert_eq!(json["services"]["pg"]["probe"]["create"], true);
        assert_eq!(json["services"]["redis"]["status"], "unavailable");
        assert!(json["services"]["redis"].get("probe").is_none());
    }
}
