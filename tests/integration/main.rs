//! Integration test entry point
//!
//! Needs the compose stack running. Run with:
//! INFRA_PROBE_RUN_INTEGRATION_TESTS=1 cargo test --test integration
//!
//! Environment variables:
//! - INFRA_PROBE_RUN_INTEGRATION_TESTS: Set to "1" to enable integration tests
//! - INFRA_PROBE_TEST_HOST: Host of every service (default: 127.0.0.1)
//! - POSTGRES_*, MYSQL_*, MONGO_INITDB_*, REDIS_PASSWORD, RABBIT_*: credentials,
//!   read the same way the command-line runner reads them

mod document;
mod health;
mod key_value;
mod messaging;
mod relational;

use std::env;

use infra_probe::{BackendKind, CredentialDefaults, ServiceTarget};
use mysql::{OptsBuilder, Pool, PooledConn};
use tokio::sync::{Mutex, MutexGuard};

/// Serializes tests that open Redis connections, so one test can read exact
/// deltas of the global `connections_closed_total{kind="redis"}` counter
static REDIS_CONNECTIONS: Mutex<()> = Mutex::const_new(());

pub async fn redis_connections_lock() -> MutexGuard<'static, ()> {
    REDIS_CONNECTIONS.lock().await
}

/// Check if integration tests should run
pub fn should_run_integration_tests() -> bool {
    env::var("INFRA_PROBE_RUN_INTEGRATION_TESTS")
        .map(|v| v == "1")
        .unwrap_or(false)
}

/// Skip test if integration tests are not enabled
#[macro_export]
macro_rules! skip_if_not_enabled {
    () => {
        if !crate::should_run_integration_tests() {
            eprintln!("Skipping integration test (set INFRA_PROBE_RUN_INTEGRATION_TESTS=1 to run)");
            return;
        }
    };
}

pub fn test_host() -> String {
    env::var("INFRA_PROBE_TEST_HOST").unwrap_or_else(|_| "127.0.0.1".to_string())
}

/// Credentials from the environment, with the compose stack's `.env` values as fallback
pub fn credentials() -> CredentialDefaults {
    dotenvy::dotenv().ok();
    CredentialDefaults::from_env()
}

/// Target for `kind` on its standard port
pub fn target(kind: BackendKind) -> ServiceTarget {
    ServiceTarget::new(
        format!("it-{}", kind.as_str()),
        test_host(),
        kind.default_port(),
        kind,
    )
    .expect("valid test target")
}

/// Independent MySQL session, bypassing the crate under test
pub fn mysql_conn() -> PooledConn {
    let creds = credentials().mysql;
    let opts = OptsBuilder::new()
        .ip_or_hostname(Some(test_host()))
        .tcp_port(BackendKind::RelationalMysql.default_port())
        .user(creds.user)
        .pass(creds.password)
        .db_name(creds.database);
    Pool::new(opts)
        .expect("Failed to create MySQL pool")
        .get_conn()
        .expect("Failed to get MySQL connection")
}
