//! Endpoint check catalogs
//!
//! Each catalog is a fixed table of checks for one kind of console. A check
//! passes when the status is one of the accepted ones and every expectation on
//! the body holds.

use serde::Serialize;
use serde_json::{json, Value};
use tracing::debug;

use super::{BasicAuth, HttpProber, WebRequest, WebResponse};
use crate::config::join_url;
use crate::metrics;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

/// Expectation on a response body
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// String at a JSON pointer equals the value
    JsonEquals(&'static str, &'static str),
    /// Top-level object has all keys
    JsonHasKeys(&'static [&'static str]),
    /// Array at a JSON pointer is non-empty
    JsonNonEmpty(&'static str),
    /// Body is not blank
    NonEmptyBody,
    /// Prometheus text exposition with at least one sample, and a sample
    /// name starting with each prefix
    MetricFamilies(&'static [&'static str]),
}

#[derive(Debug, Clone, Copy)]
pub struct EndpointCheck {
    pub key: &'static str,
    pub method: HttpMethod,
    pub path: &'static str,
    pub accepted: &'static [u16],
    pub expect: &'static [Expect],
    /// Sends `X-Vault-Token`; skipped (failed) without a token
    pub needs_token: bool,
}

const OK: &[u16] = &[200];

const fn get(key: &'static str, path: &'static str) -> EndpointCheck {
    EndpointCheck {
        key,
        method: HttpMethod::Get,
        path,
        accepted: OK,
        expect: &[],
        needs_token: false,
    }
}

impl EndpointCheck {
    const fn accepting(mut self, accepted: &'static [u16]) -> Self {
        self.accepted = accepted;
        self
    }

    const fn expecting(mut self, expect: &'static [Expect]) -> Self {
        self.expect = expect;
        self
    }

    const fn post(mut self) -> Self {
        self.method = HttpMethod::Post;
        self
    }

    const fn with_token(mut self) -> Self {
        self.needs_token = true;
        self
    }
}

const GRAFANA: &[EndpointCheck] = &[
    get("health", "/api/health").expecting(&[Expect::JsonEquals("/database", "ok")]),
    get("user", "/api/user"),
    get("dashboards", "/api/search?type=dash-db"),
    get("datasources", "/api/datasources"),
];

const PROMETHEUS: &[EndpointCheck] = &[
    get("ready", "/-/ready"),
    get("targets", "/api/v1/targets").expecting(&[Expect::JsonEquals("/status", "success")]),
    get("query_up", "/api/v1/query?query=up").expecting(&[
        Expect::JsonEquals("/status", "success"),
        Expect::JsonNonEmpty("/data/result"),
    ]),
];

const VAULT: &[EndpointCheck] = &[
    get("server_status", "/v1/sys/health").accepting(&[200, 429, 472, 473]),
    get("seal_status", "/v1/sys/seal-status"),
    get("mounts", "/v1/sys/mounts").with_token(),
];

const KEYCLOAK: &[EndpointCheck] = &[
    get(
        "server_info",
        "/auth/realms/master/.well-known/openid-configuration",
    )
    .expecting(&[Expect::JsonHasKeys(&["issuer", "authorization_endpoint"])]),
    get("realms_accessible", "/auth/realms/master"),
    get("admin_console", "/auth/admin/").accepting(&[200, 401, 403]),
    get("health_check", "/health"),
];

const SONARQUBE: &[EndpointCheck] = &[
    get("system_status", "/api/system/status").expecting(&[Expect::JsonEquals("/status", "UP")]),
    get("authentication", "/api/authentication/validate").accepting(&[200, 401]),
    get("web_api", "/api/webservices/list"),
    get("security_config", "/api/permissions/search_templates").accepting(&[200, 401, 403]),
];

const MAILHOG: &[EndpointCheck] = &[
    get("web_interface", "/"),
    get("messages_endpoint", "/api/v1/messages"),
    get("smtp_info", "/api/v2/info"),
];

const ALERTMANAGER: &[EndpointCheck] = &[
    get("status_check", "/-/healthy"),
    get("config_check", "/api/v1/status"),
    get("alerts_endpoint", "/api/v1/alerts"),
    get("silences_endpoint", "/api/v1/silences"),
];

const WEBHOOK_LISTENER: &[EndpointCheck] = &[
    get("server_accessible", "/").accepting(&[200, 404, 405]),
    get("webhook_endpoint", "/webhook")
        .post()
        .accepting(&[200, 400, 422]),
    get("health_check", "/health"),
];

const EXPORTER: &[EndpointCheck] =
    &[get("metrics", "/metrics").expecting(&[Expect::MetricFamilies(&[])])];

const NODE_EXPORTER: &[EndpointCheck] = &[get("metrics", "/metrics").expecting(&[
    Expect::MetricFamilies(&["node_cpu", "node_memory", "node_filesystem"]),
])];

const CADVISOR: &[EndpointCheck] = &[get("metrics", "/metrics")
    .expecting(&[Expect::MetricFamilies(&["container_cpu", "container_memory"])])];

const POSTGRES_EXPORTER: &[EndpointCheck] =
    &[get("metrics", "/metrics").expecting(&[Expect::MetricFamilies(&["pg_up", "pg_stat"])])];

/// Every known catalog name
pub const CATALOG_NAMES: [&str; 12] = [
    "grafana",
    "prometheus",
    "vault",
    "keycloak",
    "sonarqube",
    "mailhog",
    "alertmanager",
    "webhook-listener",
    "exporter",
    "node-exporter",
    "cadvisor",
    "postgres-exporter",
];

/// Look up a catalog by name
pub fn catalog(name: &str) -> Option<&'static [EndpointCheck]> {
    let checks = match name {
        "grafana" => GRAFANA,
        "prometheus" => PROMETHEUS,
        "vault" => VAULT,
        "keycloak" => KEYCLOAK,
        "sonarqube" => SONARQUBE,
        "mailhog" => MAILHOG,
        "alertmanager" => ALERTMANAGER,
        "webhook-listener" => WEBHOOK_LISTENER,
        "exporter" => EXPORTER,
        "node-exporter" => NODE_EXPORTER,
        "cadvisor" => CADVISOR,
        "postgres-exporter" => POSTGRES_EXPORTER,
        _ => return None,
    };
    Some(checks)
}

/// Does `response` satisfy `check`?
pub fn evaluate(check: &EndpointCheck, response: &WebResponse) -> bool {
    if !check.accepted.contains(&response.status) {
        return false;
    }
    if check.expect.is_empty() {
        return true;
    }

    let json = response.json();
    check.expect.iter().all(|expect| match expect {
        Expect::NonEmptyBody => !response.body.trim().is_empty(),
        Expect::JsonEquals(pointer, expected) => json
            .as_ref()
            .and_then(|v| v.pointer(pointer))
            .and_then(Value::as_str)
            == Some(*expected),
        Expect::JsonHasKeys(keys) => json
            .as_ref()
            .and_then(Value::as_object)
            .is_some_and(|obj| keys.iter().all(|k| obj.contains_key(*k))),
        Expect::JsonNonEmpty(pointer) => json
            .as_ref()
            .and_then(|v| v.pointer(pointer))
            .and_then(Value::as_array)
            .is_some_and(|a| !a.is_empty()),
        Expect::MetricFamilies(prefixes) => has_metric_families(&response.body, prefixes),
    })
}

/// Metric name of every sample line, skipping `#` comments
fn sample_names(body: &str) -> impl Iterator<Item = &str> {
    body.lines()
        .map(str::trim)
        .filter(|line| !line.is_empty() && !line.starts_with('#'))
        .filter_map(|line| {
            let end = line
                .find(|c: char| !(c.is_ascii_alphanumeric() || c == '_' || c == ':'))
                .unwrap_or(line.len());
            let name = &line[..end];
            (!name.is_empty()).then_some(name)
        })
}

fn has_metric_families(body: &str, prefixes: &[&str]) -> bool {
    let names: Vec<&str> = sample_names(body).collect();
    !names.is_empty()
        && prefixes
            .iter()
            .all(|prefix| names.iter().any(|name| name.starts_with(prefix)))
}

/// Result of one endpoint check
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebCheckOutcome {
    pub key: &'static str,
    pub passed: bool,
    /// HTTP status, absent when the request itself failed
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<u16>,
}

/// Outcome of one catalog run
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct WebReport {
    pub service: String,
    pub checks: Vec<WebCheckOutcome>,
}

impl WebReport {
    pub fn entries(&self) -> Vec<(&'static str, bool)> {
        self.checks.iter().map(|c| (c.key, c.passed)).collect()
    }

    pub fn all_passed(&self) -> bool {
        self.checks.iter().all(|c| c.passed)
    }

    pub fn failed_keys(&self) -> Vec<&'static str> {
        self.checks
            .iter()
            .filter(|c| !c.passed)
            .map(|c| c.key)
            .collect()
    }
}

/// Run every check of a catalog against `base_url`
///
/// A request error fails that check only; the remaining checks still run.
pub async fn run_catalog(
    prober: &HttpProber,
    service: &str,
    base_url: &str,
    checks: &[EndpointCheck],
    auth: Option<&BasicAuth>,
    vault_token: Option<&str>,
) -> WebReport {
    let mut outcomes = Vec::with_capacity(checks.len());

    for check in checks {
        let url = join_url(base_url, check.path);

        let outcome = if check.needs_token && vault_token.is_none() {
            debug!(service = %service, check = check.key, "No token, check skipped");
            WebCheckOutcome {
                key: check.key,
                passed: false,
                status: None,
            }
        } else {
            let mut request = WebRequest::get(&url).with_auth(auth);
            request.method = check.method;
            if check.method == HttpMethod::Post {
                request.json = Some(json!({ "test": "connectivity" }));
            }
            if let (true, Some(token)) = (check.needs_token, vault_token) {
                request = request.with_header("X-Vault-Token", token);
            }

            match prober.send(&request).await {
                Ok(response) => WebCheckOutcome {
                    key: check.key,
                    passed: evaluate(check, &response),
                    status: Some(response.status),
                },
                Err(e) => {
                    debug!(service = %service, check = check.key, error = %e, "Check request failed");
                    WebCheckOutcome {
                        key: check.key,
                        passed: false,
                        status: None,
                    }
                }
            }
        };

        metrics::metrics().record_web_check(service, outcome.passed);
        outcomes.push(outcome);
    }

    WebReport {
        service: service.to_string(),
        checks: outcomes,
    }
}
