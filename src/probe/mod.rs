//! Functional probes
//!
//! Each backend kind runs a fixed sequence of operations against scratch
//! objects and reports one boolean per category. A record always carries its
//! full key set; a category that was never reached stays `false`. Driver
//! errors abort the sequence and surface as [`ConnectionError::Operation`].

pub mod document;
pub mod key_value;
pub mod messaging;
pub mod relational;

use std::time::Instant;

use serde::Serialize;
use tracing::{debug, warn};

use crate::backend::{Connection, ConnectionError};
use crate::metrics;

pub use messaging::{PersistenceReport, RoutingReport};

/// Relational and document CRUD outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CrudReport {
    pub create: bool,
    pub read: bool,
    pub update: bool,
    pub delete: bool,
}

/// Key-value outcome, one flag per data type plus expiry
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct KeyValueReport {
    pub string_ops: bool,
    pub hash_ops: bool,
    pub list_ops: bool,
    pub set_ops: bool,
    pub expiry: bool,
}

/// Basic queue round-trip outcome
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct MessagingReport {
    pub queue_declare: bool,
    pub message_publish: bool,
    pub message_consume: bool,
    pub queue_delete: bool,
}

impl CrudReport {
    pub fn entries(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("create", self.create),
            ("read", self.read),
            ("update", self.update),
            ("delete", self.delete),
        ]
    }
}

impl KeyValueReport {
    pub fn entries(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("string_ops", self.string_ops),
            ("hash_ops", self.hash_ops),
            ("list_ops", self.list_ops),
            ("set_ops", self.set_ops),
            ("expiry", self.expiry),
        ]
    }
}

impl MessagingReport {
    pub fn entries(&self) -> Vec<(&'static str, bool)> {
        vec![
            ("queue_declare", self.queue_declare),
            ("message_publish", self.message_publish),
            ("message_consume", self.message_consume),
            ("queue_delete", self.queue_delete),
        ]
    }
}

/// Outcome of one functional probe
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(untagged)]
pub enum ProbeResult {
    Crud(CrudReport),
    KeyValue(KeyValueReport),
    Messaging(MessagingReport),
    Routing(RoutingReport),
    Persistence(PersistenceReport),
}

impl ProbeResult {
    /// Ordered `(name, passed)` view
    pub fn entries(&self) -> Vec<(&'static str, bool)> {
        match self {
            Self::Crud(r) => r.entries(),
            Self::KeyValue(r) => r.entries(),
            Self::Messaging(r) => r.entries(),
            Self::Routing(r) => r.entries(),
            Self::Persistence(r) => r.entries(),
        }
    }

    pub fn all_passed(&self) -> bool {
        self.entries().iter().all(|(_, passed)| *passed)
    }

    pub fn failed_keys(&self) -> Vec<&'static str> {
        self.entries()
            .into_iter()
            .filter(|(_, passed)| !passed)
            .map(|(key, _)| key)
            .collect()
    }

    pub fn get(&self, key: &str) -> Option<bool> {
        self.entries()
            .into_iter()
            .find(|(k, _)| *k == key)
            .map(|(_, v)| v)
    }
}

/// Run the standard probe for the connection's backend kind
pub async fn run(connection: &mut Connection) -> Result<ProbeResult, ConnectionError> {
    let kind = connection.kind();
    let started = Instant::now();

    let result = match connection {
        Connection::Postgres(c) => relational::postgres_crud(c).await.map(ProbeResult::Crud),
        Connection::Mysql(c) => relational::mysql_crud(c).await.map(ProbeResult::Crud),
        Connection::Mongo(c) => document::crud(c).await.map(ProbeResult::Crud),
        Connection::Redis(c) => key_value::operations(c).await.map(ProbeResult::KeyValue),
        Connection::RabbitMq(c) => messaging::basic(c).await.map(ProbeResult::Messaging),
    };

    record(kind.as_str(), started, &result);
    result
}

/// Run the exchange routing probe; only meaningful for the message queue
pub async fn run_routing(connection: &mut Connection) -> Result<ProbeResult, ConnectionError> {
    let kind = connection.kind();
    let started = Instant::now();

    let result = match connection {
        Connection::RabbitMq(c) => messaging::routing(c).await.map(ProbeResult::Routing),
        _ => Err(ConnectionError::Operation {
            backend: kind,
            message: "routing probe requires a message queue".to_string(),
        }),
    };

    record(kind.as_str(), started, &result);
    result
}

/// Run the durable queue and persistent message probe; message queue only
pub async fn run_persistence(connection: &mut Connection) -> Result<ProbeResult, ConnectionError> {
    let kind = connection.kind();
    let started = Instant::now();

    let result = match connection {
        Connection::RabbitMq(c) => messaging::persistence(c).await.map(ProbeResult::Persistence),
        _ => Err(ConnectionError::Operation {
            backend: kind,
            message: "persistence probe requires a message queue".to_string(),
        }),
    };

    record(kind.as_str(), started, &result);
    result
}

fn record(kind: &str, started: Instant, result: &Result<ProbeResult, ConnectionError>) {
    let elapsed = started.elapsed();
    match result {
        Ok(report) => {
            let failed = report.failed_keys();
            let outcome = if failed.is_empty() { "passed" } else { "failed" };
            metrics::metrics().record_probe(kind, outcome, elapsed, &failed);
            debug!(
                backend = kind,
                outcome = outcome,
                elapsed_ms = elapsed.as_millis() as u64,
                "Probe finished"
            );
        }
        Err(e) => {
            metrics::metrics().record_probe(kind, "error", elapsed, &[]);
            warn!(backend = kind, error = %e, "Probe aborted");
        }
    }
}

/// Short random suffix for scratch object names
pub(crate) fn unique_suffix() -> String {
    let id = uuid::Uuid::new_v4().simple().to_string();
    id[..8].to_string()
}
