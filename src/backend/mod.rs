//! Scoped backend connections
//!
//! One driver per backend kind behind the closed [`Connection`] enum. A
//! connection is opened for exactly one probe and released exactly once:
//! explicitly through [`Connection::close`], or as a fallback when the handle
//! is dropped (a cancelled probe future, a panic in the caller).

mod amqp;
mod mongo;
mod mysql;
mod postgres;
mod redis;

pub use amqp::AmqpConnection;
pub use mongo::MongoConnection;
pub use mysql::MysqlConnection;
pub use postgres::PostgresConnection;
pub use redis::RedisConnection;

use std::future::Future;
use std::time::{Duration, Instant};

use futures::future::BoxFuture;
use tracing::{debug, warn};

use crate::config::{CredentialDefaults, HealthCheckConfig};
use crate::metrics;
use crate::target::{Backend, BackendKind, Credentials, ServiceTarget};

/// Connection tuning
#[derive(Debug, Clone, Copy)]
pub struct ConnectOptions {
    /// Upper bound on establishing a session, authentication included
    pub connect_timeout: Duration,
}

impl Default for ConnectOptions {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl From<&HealthCheckConfig> for ConnectOptions {
    fn from(config: &HealthCheckConfig) -> Self {
        Self {
            connect_timeout: config.connect_timeout(),
        }
    }
}

/// A live client session for one backend
pub enum Connection {
    Postgres(PostgresConnection),
    Mysql(MysqlConnection),
    Mongo(MongoConnection),
    Redis(RedisConnection),
    RabbitMq(AmqpConnection),
}

impl Connection {
    /// Open a session to `target`
    ///
    /// Credentials are resolved field by field: the target's own values first,
    /// then `defaults` for the target's kind.
    pub async fn open(
        target: &ServiceTarget,
        defaults: &CredentialDefaults,
        options: &ConnectOptions,
    ) -> Result<Self, ConnectionError> {
        let kind = target.kind();
        let credentials = resolve_credentials(target, defaults);
        let started = Instant::now();

        debug!(
            service = %target.name(),
            addr = %target.addr(),
            backend = kind.as_str(),
            "Opening connection"
        );

        let connect = async {
            let host = target.host();
            let port = target.port();
            match target.backend() {
                Backend::Postgres => PostgresConnection::connect(host, port, &credentials)
                    .await
                    .map(Connection::Postgres),
                Backend::Mysql => MysqlConnection::connect(host, port, &credentials)
                    .await
                    .map(Connection::Mysql),
                Backend::Mongo => MongoConnection::connect(host, port, &credentials, options)
                    .await
                    .map(Connection::Mongo),
                Backend::Redis { db } => {
                    RedisConnection::connect(host, port, *db, &credentials, options)
                        .await
                        .map(Connection::Redis)
                }
                Backend::RabbitMq { vhost } => {
                    AmqpConnection::connect(host, port, vhost.as_deref(), &credentials)
                        .await
                        .map(Connection::RabbitMq)
                }
            }
        };

        let connection = match tokio::time::timeout(options.connect_timeout, connect).await {
            Ok(result) => result?,
            Err(_) => {
                warn!(
                    service = %target.name(),
                    timeout_ms = options.connect_timeout.as_millis() as u64,
                    "Connection attempt timed out"
                );
                return Err(ConnectionError::Timeout {
                    backend: kind,
                    timeout: options.connect_timeout,
                });
            }
        };

        metrics::metrics().record_connection_opened(kind.as_str());
        debug!(
            service = %target.name(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Connection established"
        );
        Ok(connection)
    }

    pub fn kind(&self) -> BackendKind {
        match self {
            Self::Postgres(_) => BackendKind::RelationalPostgres,
            Self::Mysql(_) => BackendKind::RelationalMysql,
            Self::Mongo(_) => BackendKind::Document,
            Self::Redis(_) => BackendKind::KeyValue,
            Self::RabbitMq(_) => BackendKind::MessageQueue,
        }
    }

    /// Cheapest command that proves the session is usable
    pub async fn ping(&mut self) -> Result<(), ConnectionError> {
        match self {
            Self::Postgres(c) => c.ping().await,
            Self::Mysql(c) => c.ping().await,
            Self::Mongo(c) => c.ping().await,
            Self::Redis(c) => c.ping().await,
            Self::RabbitMq(c) => c.ping().await,
        }
    }

    /// Release the session; further calls are no-ops
    pub async fn close(&mut self) {
        match self {
            Self::Postgres(c) => c.close().await,
            Self::Mysql(c) => c.close().await,
            Self::Mongo(c) => c.close().await,
            Self::Redis(c) => c.close().await,
            Self::RabbitMq(c) => c.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            Self::Postgres(c) => c.is_closed(),
            Self::Mysql(c) => c.is_closed(),
            Self::Mongo(c) => c.is_closed(),
            Self::Redis(c) => c.is_closed(),
            Self::RabbitMq(c) => c.is_closed(),
        }
    }
}

/// Open a connection, run `f` with it, and close it on every path
///
/// The result of `f` is returned unchanged; a failure to open is returned
/// without calling `f`.
pub async fn with_connection<T, F>(
    target: &ServiceTarget,
    defaults: &CredentialDefaults,
    options: &ConnectOptions,
    f: F,
) -> Result<T, ConnectionError>
where
    F: for<'c> FnOnce(&'c mut Connection) -> BoxFuture<'c, Result<T, ConnectionError>>,
{
    let mut connection = Connection::open(target, defaults, options).await?;
    let result = f(&mut connection).await;
    connection.close().await;
    result
}

/// Merge the target's credentials over the caller's defaults
pub fn resolve_credentials(target: &ServiceTarget, defaults: &CredentialDefaults) -> Credentials {
    let fallback = defaults.for_kind(target.kind());
    match target.credentials() {
        Some(explicit) => explicit.or(fallback),
        None => fallback.or(&Credentials::default()),
    }
}

/// Fetch a required credential field
pub(crate) fn require<'a>(
    value: &'a Option<String>,
    backend: BackendKind,
    field: &'static str,
) -> Result<&'a str, ConnectionError> {
    value
        .as_deref()
        .filter(|v| !v.is_empty())
        .ok_or(ConnectionError::MissingCredentials { backend, field })
}

/// Count a released connection
pub(crate) fn record_release(kind: BackendKind) {
    metrics::metrics().record_connection_closed(kind.as_str());
    debug!(backend = kind.as_str(), "Connection released");
}

/// Run a release future from `Drop`, if a runtime is available
pub(crate) fn release_in_background<F>(kind: BackendKind, release: F)
where
    F: Future<Output = ()> + Send + 'static,
{
    record_release(kind);
    match tokio::runtime::Handle::try_current() {
        Ok(handle) => {
            handle.spawn(release);
        }
        Err(_) => {
            debug!(backend = kind.as_str(), "No runtime, dropping connection in place");
        }
    }
}

/// Connection errors
#[derive(Debug, thiserror::Error)]
pub enum ConnectionError {
    #[error("{backend} connection failed: {message}")]
    Connect {
        backend: BackendKind,
        message: String,
    },

    #[error("{backend} connection requires a {field}")]
    MissingCredentials {
        backend: BackendKind,
        field: &'static str,
    },

    #[error("{backend} operation failed: {message}")]
    Operation {
        backend: BackendKind,
        message: String,
    },

    #[error("{backend} connection timed out after {timeout:?}")]
    Timeout {
        backend: BackendKind,
        timeout: Duration,
    },
}

impl ConnectionError {
    pub(crate) fn connect(backend: BackendKind, err: impl std::fmt::Display) -> Self {
        Self::Connect {
            backend,
            message: err.to_string(),
        }
    }

    /// Failure inside an open connection, for callers of [`with_connection`]
    pub fn operation(backend: BackendKind, err: impl std::fmt::Display) -> Self {
        Self::Operation {
            backend,
            message: err.to_string(),
        }
    }

    pub(crate) fn closed(backend: BackendKind) -> Self {
        Self::Operation {
            backend,
            message: "connection already closed".to_string(),
        }
    }

    pub fn backend(&self) -> BackendKind {
        match self {
            Self::Connect { backend, .. }
            | Self::MissingCredentials { backend, .. }
            | Self::Operation { backend, .. }
            | Self::Timeout { backend, .. } => *backend,
        }
    }
}
