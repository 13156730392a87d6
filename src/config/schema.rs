use std::env;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::target::{BackendKind, Credentials, ServiceTarget};

use super::ConfigError;

#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// TCP readiness polling
    #[serde(default)]
    pub readiness: ReadinessConfig,
    /// Aggregated health checks
    #[serde(default)]
    pub health: HealthCheckConfig,
    /// Load simulation
    #[serde(default)]
    pub load: LoadConfig,
    /// Output of the command-line runner
    #[serde(default)]
    pub report: ReportConfig,
    /// Default credentials per backend kind
    #[serde(default)]
    pub credentials: CredentialDefaults,
    /// Data services (databases, broker)
    #[serde(default)]
    pub services: Vec<ServiceConfig>,
    /// HTTP services (consoles, exporters, security services)
    #[serde(default)]
    pub web: Vec<WebServiceConfig>,
}

// ============================================================================
// Readiness Configuration
// ============================================================================

/// TCP readiness polling configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ReadinessConfig {
    /// Total time to wait for a port (milliseconds)
    #[serde(default = "default_readiness_timeout_ms")]
    pub timeout_ms: u64,
    /// Timeout of a single connect attempt (milliseconds)
    #[serde(default = "default_attempt_timeout_ms")]
    pub attempt_timeout_ms: u64,
    /// Pause between attempts (milliseconds)
    #[serde(default = "default_retry_interval_ms")]
    pub retry_interval_ms: u64,
}

fn default_readiness_timeout_ms() -> u64 {
    15_000
}

fn default_attempt_timeout_ms() -> u64 {
    1_000
}

fn default_retry_interval_ms() -> u64 {
    1_000
}

impl Default for ReadinessConfig {
    fn default() -> Self {
        Self {
            timeout_ms: default_readiness_timeout_ms(),
            attempt_timeout_ms: default_attempt_timeout_ms(),
            retry_interval_ms: default_retry_interval_ms(),
        }
    }
}

impl ReadinessConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }

    pub fn attempt_timeout(&self) -> Duration {
        Duration::from_millis(self.attempt_timeout_ms)
    }

    pub fn retry_interval(&self) -> Duration {
        Duration::from_millis(self.retry_interval_ms)
    }
}

// ============================================================================
// Health Check Configuration
// ============================================================================

/// How deep a health check goes once the port is reachable
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CheckDepth {
    /// Connect and run the backend's liveness command only
    Liveness,
    /// Connect and run the full functional probe
    #[default]
    Functional,
}

/// Aggregated health check configuration
#[derive(Debug, Clone, Deserialize)]
pub struct HealthCheckConfig {
    /// Size of the worker pool running independent checks
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// Timeout for establishing a backend session (milliseconds)
    #[serde(default = "default_connect_timeout_ms")]
    pub connect_timeout_ms: u64,
    /// Liveness or functional checks
    #[serde(default)]
    pub depth: CheckDepth,
    /// Total time to wait for an HTTP service (milliseconds)
    #[serde(default = "default_web_timeout_ms")]
    pub web_timeout_ms: u64,
}

fn default_max_workers() -> usize {
    5
}

fn default_connect_timeout_ms() -> u64 {
    10_000
}

fn default_web_timeout_ms() -> u64 {
    10_000
}

impl Default for HealthCheckConfig {
    fn default() -> Self {
        Self {
            max_workers: default_max_workers(),
            connect_timeout_ms: default_connect_timeout_ms(),
            depth: CheckDepth::default(),
            web_timeout_ms: default_web_timeout_ms(),
        }
    }
}

impl HealthCheckConfig {
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_millis(self.connect_timeout_ms)
    }

    pub fn web_timeout(&self) -> Duration {
        Duration::from_millis(self.web_timeout_ms)
    }
}

// ============================================================================
// Load Simulation Configuration
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
pub struct LoadConfig {
    /// Concurrent workers started per target
    #[serde(default = "default_workers_per_target")]
    pub workers_per_target: usize,
    /// Upper bound on workers running at the same time
    #[serde(default = "default_max_workers")]
    pub max_workers: usize,
    /// `SELECT` round-trips per relational worker
    #[serde(default = "default_relational_rounds")]
    pub relational_rounds: usize,
    /// SET/GET/DEL round-trips per key-value worker
    #[serde(default = "default_key_value_rounds")]
    pub key_value_rounds: usize,
    /// Minimum successful workers per target
    #[serde(default = "default_min_successful_workers")]
    pub min_successful_workers: usize,
    /// Whole simulation must finish within this budget (milliseconds)
    #[serde(default = "default_max_duration_ms")]
    pub max_duration_ms: u64,
}

fn default_workers_per_target() -> usize {
    3
}

fn default_relational_rounds() -> usize {
    10
}

fn default_key_value_rounds() -> usize {
    20
}

fn default_min_successful_workers() -> usize {
    2
}

fn default_max_duration_ms() -> u64 {
    60_000
}

impl Default for LoadConfig {
    fn default() -> Self {
        Self {
            workers_per_target: default_workers_per_target(),
            max_workers: default_max_workers(),
            relational_rounds: default_relational_rounds(),
            key_value_rounds: default_key_value_rounds(),
            min_successful_workers: default_min_successful_workers(),
            max_duration_ms: default_max_duration_ms(),
        }
    }
}

impl LoadConfig {
    pub fn max_duration(&self) -> Duration {
        Duration::from_millis(self.max_duration_ms)
    }
}

// ============================================================================
// Report Configuration
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ReportFormat {
    #[default]
    Summary,
    Json,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct ReportConfig {
    #[serde(default)]
    pub format: ReportFormat,
    /// Write Prometheus text metrics here after the run (node-exporter textfile collector)
    #[serde(default)]
    pub metrics_textfile: Option<PathBuf>,
    /// Also run the load simulation
    #[serde(default)]
    pub run_load: bool,
}

// ============================================================================
// Credentials
// ============================================================================

/// Default credentials per backend kind
///
/// Used whenever a target does not carry its own credentials. The library never
/// reads the environment itself; callers build this explicitly, e.g. with
/// [`CredentialDefaults::from_env`].
#[derive(Debug, Clone, Default, Deserialize)]
pub struct CredentialDefaults {
    #[serde(default)]
    pub postgres: Credentials,
    #[serde(default)]
    pub mysql: Credentials,
    #[serde(default)]
    pub mongodb: Credentials,
    #[serde(default)]
    pub redis: Credentials,
    #[serde(default)]
    pub rabbitmq: Credentials,
    /// Token for authenticated Vault endpoints
    #[serde(default)]
    pub vault_token: Option<String>,
}

impl CredentialDefaults {
    /// Read the docker-compose environment variables
    pub fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build from an arbitrary variable lookup
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let creds = |user: Option<&str>, password: &str, database: Option<&str>| Credentials {
            user: user.and_then(&lookup),
            password: lookup(password),
            database: database.and_then(&lookup),
        };

        Self {
            postgres: creds(Some("POSTGRES_USER"), "POSTGRES_PASSWORD", Some("POSTGRES_DB")),
            mysql: creds(Some("MYSQL_USER"), "MYSQL_PASSWORD", Some("MYSQL_DATABASE")),
            mongodb: creds(
                Some("MONGO_INITDB_ROOT_USERNAME"),
                "MONGO_INITDB_ROOT_PASSWORD",
                Some("MONGO_INITDB_DATABASE"),
            ),
            redis: creds(None, "REDIS_PASSWORD", None),
            rabbitmq: creds(Some("RABBIT_USER"), "RABBIT_PASSWORD", Some("RABBIT_VHOST")),
            vault_token: lookup("VAULT_DEV_ROOT_TOKEN_ID"),
        }
    }

    /// Field-by-field fallback: values set on `self` win over `other`
    pub fn or(&self, other: &CredentialDefaults) -> CredentialDefaults {
        CredentialDefaults {
            postgres: self.postgres.or(&other.postgres),
            mysql: self.mysql.or(&other.mysql),
            mongodb: self.mongodb.or(&other.mongodb),
            redis: self.redis.or(&other.redis),
            rabbitmq: self.rabbitmq.or(&other.rabbitmq),
            vault_token: self
                .vault_token
                .clone()
                .filter(|t| !t.is_empty())
                .or_else(|| other.vault_token.clone()),
        }
    }

    /// Defaults for a backend kind
    pub fn for_kind(&self, kind: BackendKind) -> &Credentials {
        match kind {
            BackendKind::RelationalPostgres => &self.postgres,
            BackendKind::RelationalMysql => &self.mysql,
            BackendKind::Document => &self.mongodb,
            BackendKind::KeyValue => &self.redis,
            BackendKind::MessageQueue => &self.rabbitmq,
        }
    }
}

// ============================================================================
// Service Configuration
// ============================================================================

/// One data service entry (`[[services]]`)
#[derive(Debug, Clone, Deserialize)]
pub struct ServiceConfig {
    /// Unique service name (container name in the compose stack)
    pub name: String,
    /// Hostname or IP
    #[serde(default = "default_host")]
    pub host: String,
    /// Port number (backend default when omitted)
    #[serde(default)]
    pub port: Option<u16>,
    /// Backend kind
    pub kind: BackendKind,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Database name, or virtual host for the message queue
    #[serde(default)]
    pub database: Option<String>,
    /// Redis logical database
    #[serde(default)]
    pub db: Option<u8>,
}

fn default_host() -> String {
    "localhost".to_string()
}

impl ServiceConfig {
    pub fn new(name: impl Into<String>, kind: BackendKind) -> Self {
        Self {
            name: name.into(),
            host: default_host(),
            port: None,
            kind,
            user: None,
            password: None,
            database: None,
            db: None,
        }
    }

    /// Convert to a validated target
    pub fn to_target(&self) -> Result<ServiceTarget, ConfigError> {
        let port = self.port.unwrap_or_else(|| self.kind.default_port());
        let credentials = Credentials {
            user: self.user.clone(),
            password: self.password.clone(),
            database: self.database.clone(),
        };

        let mut target = ServiceTarget::new(&self.name, &self.host, port, self.kind)?
            .with_credentials(credentials);
        if let Some(db) = self.db {
            target = target.with_redis_db(db);
        }
        if self.kind == BackendKind::MessageQueue {
            if let Some(vhost) = &self.database {
                target = target.with_vhost(vhost.clone());
            }
        }
        Ok(target)
    }
}

// ============================================================================
// Web Service Configuration
// ============================================================================

/// Category of an HTTP service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum WebKind {
    #[default]
    Web,
    Metrics,
    Security,
}

/// One HTTP service entry (`[[web]]`)
#[derive(Debug, Clone, Deserialize)]
pub struct WebServiceConfig {
    /// Unique service name
    pub name: String,
    /// Base URL, e.g. `http://localhost:3000`
    pub url: String,
    /// Primary endpoint used for readiness
    #[serde(default = "default_endpoint")]
    pub endpoint: String,
    #[serde(default)]
    pub kind: WebKind,
    /// Basic auth username
    #[serde(default)]
    pub username: Option<String>,
    /// Basic auth password
    #[serde(default)]
    pub password: Option<String>,
    /// Endpoint catalog to run once the service answers
    #[serde(default)]
    pub catalog: Option<String>,
}

fn default_endpoint() -> String {
    "/".to_string()
}

impl WebServiceConfig {
    pub fn new(name: impl Into<String>, url: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            url: url.into(),
            endpoint: endpoint.into(),
            kind: WebKind::default(),
            username: None,
            password: None,
            catalog: None,
        }
    }

    pub fn with_kind(mut self, kind: WebKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_basic_auth(mut self, username: impl Into<String>, password: impl Into<String>) -> Self {
        self.username = Some(username.into());
        self.password = Some(password.into());
        self
    }

    pub fn with_catalog(mut self, catalog: impl Into<String>) -> Self {
        self.catalog = Some(catalog.into());
        self
    }

    /// Full URL of the primary endpoint
    pub fn endpoint_url(&self) -> String {
        join_url(&self.url, &self.endpoint)
    }

    /// Basic auth pair, if configured
    pub fn auth(&self) -> Option<(String, String)> {
        self.username
            .as_ref()
            .map(|u| (u.clone(), self.password.clone().unwrap_or_default()))
    }
}

/// Join a base URL and a path without doubling the slash
pub fn join_url(base: &str, path: &str) -> String {
    match (base.ends_with('/'), path.starts_with('/')) {
        (true, true) => format!("{}{}", base, &path[1..]),
        (false, false) if !path.is_empty() => format!("{}/{}", base, path),
        _ => format!("{}{}", base, path),
    }
}

impl Default for Config {
    /// The local docker-compose stack
    fn default() -> Self {
        Self {
            readiness: ReadinessConfig::default(),
            health: HealthCheckConfig::default(),
            load: LoadConfig::default(),
            report: ReportConfig::default(),
            credentials: CredentialDefaults::default(),
            services: vec![
                ServiceConfig::new("infra-default-postgres", BackendKind::RelationalPostgres),
                ServiceConfig::new("infra-default-mysql", BackendKind::RelationalMysql),
                ServiceConfig::new("infra-default-mongo", BackendKind::Document),
                ServiceConfig::new("infra-default-redis", BackendKind::KeyValue),
            ],
            web: vec![
                WebServiceConfig::new("infra-default-grafana", "http://localhost:3000", "/api/health")
                    .with_basic_auth("admin", "admin")
                    .with_catalog("grafana"),
                WebServiceConfig::new("infra-default-prometheus", "http://localhost:9090", "/-/healthy")
                    .with_catalog("prometheus"),
                WebServiceConfig::new("node-exporter", "http://localhost:9100", "/metrics")
                    .with_kind(WebKind::Metrics)
                    .with_catalog("node-exporter"),
                WebServiceConfig::new("cadvisor", "http://localhost:8080", "/metrics")
                    .with_kind(WebKind::Metrics)
                    .with_catalog("cadvisor"),
            ],
        }
    }
}

impl Config {
    /// Validated data service targets
    pub fn targets(&self) -> Result<Vec<ServiceTarget>, ConfigError> {
        self.services.iter().map(ServiceConfig::to_target).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::Backend;
    use std::collections::HashMap;

    #[test]
    fn test_parse_minimal_config() {
        let toml = r#"
[[services]]
name = "pg"
kind = "relational-postgres"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.services.len(), 1);
        assert_eq!(config.services[0].host, "localhost"); // default
        assert_eq!(config.readiness.timeout_ms, 15_000); // default
        assert_eq!(config.health.max_workers, 5); // default
        assert_eq!(config.health.depth, CheckDepth::Functional);
        assert!(config.web.is_empty());

        let targets = config.targets().unwrap();
        assert_eq!(targets[0].port(), 5432);
        assert_eq!(targets[0].backend(), &Backend::Postgres);
    }

    #[test]
    fn test_parse_full_config() {
        let toml = r#"
[readiness]
timeout_ms = 5000
attempt_timeout_ms = 500
retry_interval_ms = 250

[health]
max_workers = 2
depth = "liveness"

[report]
format = "json"
metrics_textfile = "/var/lib/node_exporter/infra.prom"

[credentials.postgres]
user = "testuser"
password = "testpass"
database = "testdb"

[[services]]
name = "cache"
host = "redis.local"
port = 6380
kind = "redis"
db = 2

[[services]]
name = "broker"
kind = "rabbitmq"
database = "staging"

[[web]]
name = "grafana"
url = "http://localhost:3000"
endpoint = "/api/health"
username = "admin"
password = "admin"
catalog = "grafana"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.readiness.retry_interval(), Duration::from_millis(250));
        assert_eq!(config.health.max_workers, 2);
        assert_eq!(config.health.depth, CheckDepth::Liveness);
        assert_eq!(config.report.format, ReportFormat::Json);
        assert!(config.report.metrics_textfile.is_some());
        assert_eq!(config.credentials.postgres.user.as_deref(), Some("testuser"));

        let targets = config.targets().unwrap();
        assert_eq!(targets[0].addr(), "redis.local:6380");
        assert_eq!(targets[0].backend(), &Backend::Redis { db: 2 });
        assert_eq!(targets[1].port(), 5672);
        assert_eq!(
            targets[1].backend(),
            &Backend::RabbitMq {
                vhost: Some("staging".to_string())
            }
        );

        assert_eq!(config.web[0].endpoint_url(), "http://localhost:3000/api/health");
        assert_eq!(
            config.web[0].auth(),
            Some(("admin".to_string(), "admin".to_string()))
        );
    }

    #[test]
    fn test_invalid_port_rejected() {
        let toml = r#"
[[services]]
name = "pg"
port = 0
kind = "postgres"
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert!(matches!(config.targets(), Err(ConfigError::InvalidTarget(_))));
    }

    #[test]
    fn test_default_config_is_compose_stack() {
        let config = Config::default();
        let targets = config.targets().unwrap();
        let ports: Vec<u16> = targets.iter().map(|t| t.port()).collect();
        assert_eq!(ports, vec![5432, 3306, 27017, 6379]);
        assert_eq!(config.web.len(), 4);
    }

    #[test]
    fn test_credentials_from_lookup() {
        let vars: HashMap<&str, &str> = [
            ("POSTGRES_USER", "pg_user"),
            ("POSTGRES_PASSWORD", "pg_pass"),
            ("POSTGRES_DB", "pg_db"),
            ("REDIS_PASSWORD", "redis_pass"),
            ("VAULT_DEV_ROOT_TOKEN_ID", "root"),
        ]
        .into_iter()
        .collect();

        let defaults = CredentialDefaults::from_lookup(|k| vars.get(k).map(|v| v.to_string()));
        assert_eq!(defaults.postgres.user.as_deref(), Some("pg_user"));
        assert_eq!(defaults.postgres.database.as_deref(), Some("pg_db"));
        assert_eq!(defaults.redis.password.as_deref(), Some("redis_pass"));
        assert!(defaults.redis.user.is_none());
        assert!(defaults.mysql.is_empty());
        assert_eq!(defaults.vault_token.as_deref(), Some("root"));
    }

    #[test]
    fn test_credential_defaults_merge() {
        let file = CredentialDefaults {
            mysql: Credentials::new("file_user", "file_pass", None),
            ..Default::default()
        };
        let env = CredentialDefaults {
            mysql: Credentials::new("env_user", "env_pass", Some("env_db".to_string())),
            vault_token: Some("token".to_string()),
            ..Default::default()
        };

        let merged = file.or(&env);
        assert_eq!(merged.mysql.user.as_deref(), Some("file_user"));
        assert_eq!(merged.mysql.database.as_deref(), Some("env_db"));
        assert_eq!(merged.vault_token.as_deref(), Some("token"));
        assert_eq!(
            merged.for_kind(BackendKind::RelationalMysql).password.as_deref(),
            Some("file_pass")
        );
    }

    #[test]
    fn test_join_url() {
        assert_eq!(join_url("http://h:1", "/x"), "http://h:1/x");
        assert_eq!(join_url("http://h:1/", "/x"), "http://h:1/x");
        assert_eq!(join_url("http://h:1", "x"), "http://h:1/x");
        assert_eq!(join_url("http://h:1/", "x"), "http://h:1/x");
        assert_eq!(join_url("http://h:1", ""), "http://h:1");
    }
}
