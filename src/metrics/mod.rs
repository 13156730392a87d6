//! Prometheus metrics for probe runs
//!
//! The registry is process-global; the CLI renders it in text format and can
//! drop it into a node-exporter textfile directory.

use std::path::Path;
use std::sync::OnceLock;
use std::time::Duration;

use prometheus::{
    Encoder, HistogramOpts, HistogramVec, IntCounterVec, IntGaugeVec, Opts, Registry, TextEncoder,
};

/// Global metrics registry
static METRICS: OnceLock<Metrics> = OnceLock::new();

/// Get the global metrics instance
pub fn metrics() -> &'static Metrics {
    METRICS.get_or_init(Metrics::new)
}

pub struct Metrics {
    /// Registry for all metrics
    pub registry: Registry,

    // Probe metrics
    /// Probe runs by backend and outcome (passed, failed, error)
    pub probes_total: IntCounterVec,
    /// Probe latency histogram (in seconds)
    pub probe_duration_seconds: HistogramVec,
    /// Failed probe steps by backend and step name
    pub probe_step_failures_total: IntCounterVec,

    // Connection metrics
    pub connections_opened_total: IntCounterVec,
    pub connections_closed_total: IntCounterVec,

    // Readiness metrics
    /// Time spent waiting for a TCP port, by outcome (reachable, timeout)
    pub readiness_wait_seconds: HistogramVec,

    // Report metrics
    /// Services by status in the last report
    pub services_by_status: IntGaugeVec,
    /// Web endpoint checks by service and result
    pub web_checks_total: IntCounterVec,
}

impl Metrics {
    pub fn new() -> Self {
        let registry = Registry::new();

        let probes_total = IntCounterVec::new(
            Opts::new("infra_probe_probes_total", "Total number of probe runs"),
            &["kind", "outcome"],
        )
        .expect("valid metric definition");

        let probe_duration_seconds = HistogramVec::new(
            HistogramOpts::new(
                "infra_probe_probe_duration_seconds",
                "Probe latency in seconds, connection included",
            )
            .buckets(vec![0.005, 0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0]),
            &["kind"],
        )
        .expect("valid metric definition");

        let probe_step_failures_total = IntCounterVec::new(
            Opts::new(
                "infra_probe_step_failures_total",
                "Total number of failed probe steps",
            ),
            &["kind", "step"],
        )
        .expect("valid metric definition");

        let connections_opened_total = IntCounterVec::new(
            Opts::new(
                "infra_probe_connections_opened_total",
                "Total number of backend connections opened",
            ),
            &["kind"],
        )
        .expect("valid metric definition");

        let connections_closed_total = IntCounterVec::new(
            Opts::new(
                "infra_probe_connections_closed_total",
                "Total number of backend connections released",
            ),
            &["kind"],
        )
        .expect("valid metric definition");

        let readiness_wait_seconds = HistogramVec::new(
            HistogramOpts::new(
                "infra_probe_readiness_wait_seconds",
                "Time spent waiting for a TCP port",
            )
            .buckets(vec![0.001, 0.01, 0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 15.0, 30.0, 60.0]),
            &["outcome"],
        )
        .expect("valid metric definition");

        let services_by_status = IntGaugeVec::new(
            Opts::new(
                "infra_probe_services",
                "Number of services by status in the last report",
            ),
            &["status"], // healthy, unavailable, error
        )
        .expect("valid metric definition");

        let web_checks_total = IntCounterVec::new(
            Opts::new(
                "infra_probe_web_checks_total",
                "Total number of web endpoint checks",
            ),
            &["service", "result"],
        )
        .expect("valid metric definition");

        for collector in [
            Box::new(probes_total.clone()) as Box<dyn prometheus::core::Collector>,
            Box::new(probe_duration_seconds.clone()),
            Box::new(probe_step_failures_total.clone()),
            Box::new(connections_opened_total.clone()),
            Box::new(connections_closed_total.clone()),
            Box::new(readiness_wait_seconds.clone()),
            Box::new(services_by_status.clone()),
            Box::new(web_checks_total.clone()),
        ] {
            registry
                .register(collector)
                .expect("metric names are unique");
        }

        Self {
            registry,
            probes_total,
            probe_duration_seconds,
            probe_step_failures_total,
            connections_opened_total,
            connections_closed_total,
            readiness_wait_seconds,
            services_by_status,
            web_checks_total,
        }
    }

    /// Record a finished probe and the steps that failed
    pub fn record_probe(&self, kind: &str, outcome: &str, elapsed: Duration, failed_steps: &[&str]) {
        self.probes_total.with_label_values(&[kind, outcome]).inc();
        self.probe_duration_seconds
            .with_label_values(&[kind])
            .observe(elapsed.as_secs_f64());
        for step in failed_steps {
            self.probe_step_failures_total
                .with_label_values(&[kind, step])
                .inc();
        }
    }

    pub fn record_connection_opened(&self, kind: &str) {
        self.connections_opened_total.with_label_values(&[kind]).inc();
    }

    pub fn record_connection_closed(&self, kind: &str) {
        self.connections_closed_total.with_label_values(&[kind]).inc();
    }

    /// Record how long a readiness wait took
    pub fn record_readiness_wait(&self, waited: Duration, reachable: bool) {
        let outcome = if reachable { "reachable" } else { "timeout" };
        self.readiness_wait_seconds
            .with_label_values(&[outcome])
            .observe(waited.as_secs_f64());
    }

    /// Update per-status service counts
    pub fn set_services_by_status(&self, healthy: i64, unavailable: i64, error: i64) {
        self.services_by_status
            .with_label_values(&["healthy"])
            .set(healthy);
        self.services_by_status
            .with_label_values(&["unavailable"])
            .set(unavailable);
        self.services_by_status
            .with_label_values(&["error"])
            .set(error);
    }

    /// Record a web endpoint check result
    pub fn record_web_check(&self, service: &str, passed: bool) {
        let result = if passed { "passed" } else { "failed" };
        self.web_checks_total
            .with_label_values(&[service, result])
            .inc();
    }

    /// Get metrics as Prometheus text format
    pub fn gather(&self) -> String {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        if encoder.encode(&metric_families, &mut buffer).is_err() {
            return String::new();
        }
        String::from_utf8_lossy(&buffer).into_owned()
    }

    /// Write the text format to a file, replacing it atomically
    pub fn write_textfile(&self, path: &Path) -> std::io::Result<()> {
        let tmp = path.with_extension("prom.tmp");
        std::fs::write(&tmp, self.gather())?;
        std::fs::rename(&tmp, path)
    }
}

impl Default for Metrics {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_record_probe_appears_in_text_output() {
        let m = Metrics::new();
        m.record_probe("redis", "failed", Duration::from_millis(12), &["expiry"]);
        m.record_connection_opened("redis");
        m.record_connection_closed("redis");

        let text = m.gather();
        assert!(text.contains("infra_probe_probes_total{kind=\"redis\",outcome=\"failed\"} 1"));
        assert!(text.contains("infra_probe_step_failures_total{kind=\"redis\",step=\"expiry\"} 1"));
        assert!(text.contains("infra_probe_connections_closed_total{kind=\"redis\"} 1"));
    }

    #[test]
    fn test_services_by_status_gauge() {
        let m = Metrics::new();
        m.set_services_by_status(3, 1, 0);
        assert_eq!(m.services_by_status.with_label_values(&["healthy"]).get(), 3);
        assert_eq!(m.services_by_status.with_label_values(&["unavailable"]).get(), 1);
        assert_eq!(m.services_by_status.with_label_values(&["error"]).get(), 0);
    }

    #[test]
    fn test_write_textfile() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("infra.prom");
        let m = Metrics::new();
        m.record_web_check("grafana", true);
        m.write_textfile(&path).unwrap();

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("infra_probe_web_checks_total"));
    }
}
