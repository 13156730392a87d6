//! Service target descriptors
//!
//! A `ServiceTarget` names one infrastructure service: where it listens, which
//! backend speaks on that port and (optionally) which credentials to use.
//! Targets are validated once at construction and never change afterwards.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::config::ConfigError;

/// Closed set of backend kinds that can be probed
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum BackendKind {
    #[serde(alias = "postgres", alias = "postgresql")]
    RelationalPostgres,
    #[serde(alias = "mysql")]
    RelationalMysql,
    #[serde(alias = "mongodb", alias = "mongo")]
    Document,
    #[serde(alias = "redis")]
    KeyValue,
    #[serde(alias = "rabbitmq", alias = "amqp")]
    MessageQueue,
}

impl BackendKind {
    /// Short label used in metrics and log fields
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::RelationalPostgres => "postgres",
            Self::RelationalMysql => "mysql",
            Self::Document => "mongodb",
            Self::KeyValue => "redis",
            Self::MessageQueue => "rabbitmq",
        }
    }

    /// Conventional port for the backend
    pub fn default_port(&self) -> u16 {
        match self {
            Self::RelationalPostgres => 5432,
            Self::RelationalMysql => 3306,
            Self::Document => 27017,
            Self::KeyValue => 6379,
            Self::MessageQueue => 5672,
        }
    }
}

impl fmt::Display for BackendKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::RelationalPostgres => "PostgreSQL",
            Self::RelationalMysql => "MySQL",
            Self::Document => "MongoDB",
            Self::KeyValue => "Redis",
            Self::MessageQueue => "RabbitMQ",
        };
        f.write_str(name)
    }
}

/// Backend variant with its driver-specific options, resolved at target construction
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backend {
    Postgres,
    Mysql,
    Mongo,
    /// Redis logical database index
    Redis { db: u8 },
    /// RabbitMQ virtual host, `None` falls back to the credential database
    RabbitMq { vhost: Option<String> },
}

impl Backend {
    fn for_kind(kind: BackendKind) -> Self {
        match kind {
            BackendKind::RelationalPostgres => Self::Postgres,
            BackendKind::RelationalMysql => Self::Mysql,
            BackendKind::Document => Self::Mongo,
            BackendKind::KeyValue => Self::Redis { db: 0 },
            BackendKind::MessageQueue => Self::RabbitMq { vhost: None },
        }
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Postgres => BackendKind::RelationalPostgres,
            Self::Mysql => BackendKind::RelationalMysql,
            Self::Mongo => BackendKind::Document,
            Self::Redis { .. } => BackendKind::KeyValue,
            Self::RabbitMq { .. } => BackendKind::MessageQueue,
        }
    }
}

/// Optional credentials; any field left empty falls back to the caller's defaults
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    /// Database name (relational), or virtual host (message queue)
    #[serde(default)]
    pub database: Option<String>,
}

impl Credentials {
    pub fn new(
        user: impl Into<String>,
        password: impl Into<String>,
        database: Option<String>,
    ) -> Self {
        Self {
            user: Some(user.into()),
            password: Some(password.into()),
            database,
        }
    }

    /// Field-by-field fallback: values set on `self` win over `fallback`
    pub fn or(&self, fallback: &Credentials) -> Credentials {
        Credentials {
            user: non_empty(&self.user).or_else(|| non_empty(&fallback.user)),
            password: non_empty(&self.password).or_else(|| non_empty(&fallback.password)),
            database: non_empty(&self.database).or_else(|| non_empty(&fallback.database)),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.user.is_none() && self.password.is_none() && self.database.is_none()
    }
}

fn non_empty(value: &Option<String>) -> Option<String> {
    value.as_ref().filter(|v| !v.is_empty()).cloned()
}

/// Address and credential descriptor for one infrastructure service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceTarget {
    name: String,
    host: String,
    port: u16,
    backend: Backend,
    credentials: Option<Credentials>,
}

impl ServiceTarget {
    /// Create a validated target with the backend's default options
    pub fn new(
        name: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        kind: BackendKind,
    ) -> Result<Self, ConfigError> {
        let name = name.into();
        let host = host.into();

        if name.trim().is_empty() {
            return Err(ConfigError::InvalidTarget("service name is empty".into()));
        }
        if host.trim().is_empty() {
            return Err(ConfigError::InvalidTarget(format!("{}: host is empty", name)));
        }
        if port == 0 {
            return Err(ConfigError::InvalidTarget(format!(
                "{}: port must be in 1-65535",
                name
            )));
        }

        Ok(Self {
            name,
            host,
            port,
            backend: Backend::for_kind(kind),
            credentials: None,
        })
    }

    pub fn with_credentials(mut self, credentials: Credentials) -> Self {
        self.credentials = if credentials.is_empty() {
            None
        } else {
            Some(credentials)
        };
        self
    }

    /// Select the Redis logical database (ignored for other backends)
    pub fn with_redis_db(mut self, db: u8) -> Self {
        if let Backend::Redis { db: ref mut current } = self.backend {
            *current = db;
        }
        self
    }

    /// Select the RabbitMQ virtual host (ignored for other backends)
    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        if let Backend::RabbitMq { vhost: ref mut current } = self.backend {
            *current = Some(vhost.into());
        }
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn backend(&self) -> &Backend {
        &self.backend
    }

    pub fn kind(&self) -> BackendKind {
        self.backend.kind()
    }

    pub fn credentials(&self) -> Option<&Credentials> {
        self.credentials.as_ref()
    }

    /// Address string (host:port)
    pub fn addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}
