//! Readiness and functional probes for a docker-compose infrastructure stack
//!
//! The crate dials out to databases, a message broker and HTTP consoles over
//! their standard protocols and checks that they answer the way a working
//! stack should. Nothing here reads the environment: callers pass targets,
//! credentials and tuning explicitly.

pub mod backend;
pub mod config;
pub mod health;
pub mod load;
pub mod metrics;
pub mod probe;
pub mod readiness;
pub mod target;
pub mod web;

pub use backend::{with_connection, ConnectOptions, Connection, ConnectionError};
pub use config::{load_config, Config, ConfigError, CredentialDefaults};
pub use health::{HealthChecker, HealthReport, ServiceHealth, ServiceStatus};
pub use probe::ProbeResult;
pub use readiness::{wait_for_service, wait_for_service_with};
pub use target::{Backend, BackendKind, Credentials, ServiceTarget};
